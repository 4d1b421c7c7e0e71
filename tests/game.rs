use std::collections::VecDeque;
use std::time::Duration;

use opencv::{
    core::{self, Mat, Point, Scalar},
    imgproc,
    prelude::*,
};

use foosbot::{
    calibration::{MarkerDetector, MarkerObservation},
    controller::RowCommander,
    display::{DiagnosticFrame, RenderAction, Renderer},
    frame::FrameSource,
    motor::{Axis, DryRunDriver, MotorDriver},
    worker::{Dispatch, RowCommand, RowStatus},
    Config, Error, GameController, GameState, InlineRows, RowPool,
};

struct NoMarkers;

impl MarkerDetector for NoMarkers {
    fn detect(&mut self, _: &Mat) -> Result<Vec<MarkerObservation>, Error> {
        Ok(Vec::new())
    }
}

struct Scripted(VecDeque<Mat>);

impl FrameSource for Scripted {
    fn next_frame(&mut self) -> Result<Option<Mat>, Error> {
        Ok(self.0.pop_front())
    }
}

/// Stops the game after a fixed number of frames.
struct StopAfter {
    frames: usize,
    seen: usize,
}

impl Renderer for StopAfter {
    fn render(&mut self, frame: &DiagnosticFrame<'_>) -> Result<RenderAction, Error> {
        self.seen += 1;
        assert_eq!(frame.rectified.cols(), 640);

        Ok(if self.seen >= self.frames {
            RenderAction::Stop
        } else {
            RenderAction::Continue
        })
    }
}

/// Camera already looking straight down at the rectified field, quick motors.
fn bench_config() -> Config {
    let mut config = Config::default();
    config.calibration.default_corners = [[0.0, 0.0], [639.0, 0.0], [639.0, 359.0], [0.0, 359.0]];

    for row in &mut config.rows {
        row.motor.dwell_us = 0;
        row.motor.strike_hold_ms = 0;
    }

    config
}

fn blank() -> Mat {
    Mat::new_rows_cols_with_default(360, 640, core::CV_8UC3, Scalar::all(0.0)).unwrap()
}

fn ball_at(x: i32, y: i32) -> Mat {
    let mut frame = blank();
    imgproc::circle(
        &mut frame,
        Point::new(x, y),
        10,
        Scalar::new(150.0, 200.0, 192.0, 0.0),
        -1,
        imgproc::LINE_8,
        0,
    )
    .unwrap();

    frame
}

fn inline_rows(config: &Config) -> InlineRows<DryRunDriver> {
    InlineRows::new(config, |r| DryRunDriver::new(r.index))
}

#[test]
fn empty_table_runs_to_the_end_of_the_footage() {
    let config = bench_config();
    let mut game =
        GameController::with_marker_detector(&config, NoMarkers, inline_rows(&config)).unwrap();
    let mut source = Scripted((0..5).map(|_| blank()).collect());

    let score = game.run(&mut source, None).unwrap();

    assert_eq!((score.a, score.b), (0, 0));
    assert_eq!(game.stats().frames(), 5);
    assert_eq!(game.state(), GameState::Stopped);
    assert!(!game.tracker().state().in_play());
}

#[test]
fn game_start_centres_actuated_rows() {
    let config = bench_config();
    let mut game =
        GameController::with_marker_detector(&config, NoMarkers, inline_rows(&config)).unwrap();

    game.run(&mut Scripted(VecDeque::new()), None).unwrap();

    let rows = game.commander();
    assert_eq!(rows.linear_position(0), Some(58.0));
    assert_eq!(rows.linear_position(1), Some(91.0));
    assert_eq!(rows.linear_position(3), Some(29.0));
    assert_eq!(rows.linear_position(5), Some(58.0));
    assert_eq!(rows.linear_position(2), None);
}

#[test]
fn display_can_end_the_game() {
    let config = bench_config();
    let mut game =
        GameController::with_marker_detector(&config, NoMarkers, inline_rows(&config)).unwrap();
    let mut source = Scripted((0..10).map(|_| blank()).collect());
    let mut window = StopAfter { frames: 3, seen: 0 };

    game.run(&mut source, Some(&mut window)).unwrap();

    assert_eq!(window.seen, 3);
    assert_eq!(game.stats().frames(), 3);
    assert_eq!(source.0.len(), 7);
    assert!(game.stop_handle().is_stopped());
}

#[test]
fn stop_before_start_processes_nothing() {
    let config = bench_config();
    let mut game =
        GameController::with_marker_detector(&config, NoMarkers, inline_rows(&config)).unwrap();
    game.stop_handle().stop();

    let mut source = Scripted((0..3).map(|_| blank()).collect());
    game.run(&mut source, None).unwrap();

    assert_eq!(game.stats().frames(), 0);
    assert_eq!(source.0.len(), 3);
}

#[test]
fn ball_vanishing_in_the_left_goal_scores_for_a() {
    let mut config = bench_config();
    config.table.wall_margin_px = 20.0;

    let mut game =
        GameController::with_marker_detector(&config, NoMarkers, inline_rows(&config)).unwrap();

    let mut frames: VecDeque<Mat> = [59, 47, 35, 23, 11].iter().map(|&x| ball_at(x, 180)).collect();
    frames.extend((0..3).map(|_| blank()));

    let score = game.run(&mut Scripted(frames), None).unwrap();

    assert_eq!((score.a, score.b), (1, 0));
    assert!(!game.tracker().state().in_play());

    // The goalie swung at the ball on its way in and is back at rest.
    let goalie = game.commander().actuator(0).unwrap();
    assert!(goalie.driver().steps(Axis::Rotational) > 0);
    assert_eq!(goalie.row().angle, 0.0);
}

#[test]
fn ball_followed_across_frames() {
    let config = bench_config();
    let mut game =
        GameController::with_marker_detector(&config, NoMarkers, inline_rows(&config)).unwrap();

    game.step(&ball_at(300, 200)).unwrap();
    let report = game.step(&ball_at(290, 204)).unwrap();

    assert_eq!(report.stats.frames(), 2);
    assert_eq!(report.score.a + report.score.b, 0);

    let ball = game.tracker().state();
    assert!(ball.detected());

    let delta = ball.delta();
    assert!((delta.x + 10.0).abs() < 1.5, "dx {}", delta.x);
    assert!((delta.y - 4.0).abs() < 1.5, "dy {}", delta.y);

    // The first midfield rod, at x 280.46, is within reach.
    assert!(report.issued.iter().any(|i| i.row == 3));
}

#[test]
fn pool_runs_maneuvers_off_thread() {
    let config = bench_config();
    let mut pool = RowPool::spawn(&config, |r| {
        Box::new(DryRunDriver::new(r.index)) as Box<dyn MotorDriver>
    })
    .unwrap();

    assert_eq!(pool.handles().len(), 4);
    assert_eq!(pool.dispatch(0, RowCommand::MoveTo(10.0)).unwrap(), Dispatch::Sent);
    assert_eq!(pool.dispatch(2, RowCommand::Center).unwrap(), Dispatch::Refused);

    pool.settle(Duration::from_secs(2));

    let goalie = pool.handle(0).unwrap();
    assert_eq!(goalie.status(), RowStatus::Idle);
    assert_eq!(goalie.last_result(), Some(&Ok(10)));
    assert_eq!(pool.linear_position(0), Some(10.0));
}

#[test]
fn rejected_command_leaves_row_usable() {
    let config = bench_config();
    let mut pool = RowPool::spawn(&config, |r| {
        Box::new(DryRunDriver::new(r.index)) as Box<dyn MotorDriver>
    })
    .unwrap();

    pool.dispatch(1, RowCommand::MoveTo(500.0)).unwrap();
    pool.settle(Duration::from_secs(2));
    assert!(matches!(pool.handle(1).unwrap().last_result(), Some(Err(_))));

    assert_eq!(pool.dispatch(1, RowCommand::MoveTo(5.0)).unwrap(), Dispatch::Sent);
    pool.settle(Duration::from_secs(2));
    assert_eq!(pool.linear_position(1), Some(5.0));
}

#[test]
fn config_file_overrides_defaults() {
    let path = std::env::temp_dir().join(format!("foosbot-{}.toml", std::process::id()));
    std::fs::write(
        &path,
        r#"
[table]
goal_width_px = 100.0

[controller]
intercept = true
reach_threshold = 25.0
"#,
    )
    .unwrap();

    let config = Config::from_file(&path).unwrap();
    std::fs::remove_file(&path).unwrap();

    assert_eq!(config.table.goal_width_px, 100.0);
    assert_eq!(config.table.width_px, 640);
    assert!(config.controller.intercept);
    assert_eq!(config.controller.reach_threshold, 25.0);
    assert_eq!(config.rows.len(), 8);
    assert_eq!(config.ball, Config::default().ball);
}

#[test]
fn malformed_config_is_rejected() {
    assert!(matches!(
        Config::from_toml("[table\nwidth_px = 3"),
        Err(Error::ConfigParseError(_))
    ));

    assert!(matches!(
        Config::from_toml("[ball]\nblur_kernel = 4\n"),
        Err(Error::Config(_))
    ));

    assert!(Config::from_file("/nonexistent/foosbot.toml").is_err());
}
