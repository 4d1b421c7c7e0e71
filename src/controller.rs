//! Per-frame game loop: rectify, track, strike.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use nalgebra as na;
use opencv::core::Mat;

use crate::calibration::{ArucoMarkerDetector, MarkerDetector, TableCalibrator};
use crate::config::Config;
use crate::detection::PlayerDetection;
use crate::detector::PlayerDetector;
use crate::display::{DiagnosticFrame, RenderAction, Renderer};
use crate::error::Error;
use crate::frame::FrameSource;
use crate::tracker::{BallTracker, Score, TrackEvent};
use crate::worker::{Dispatch, RowCommand};

/// Frame rate assumed before any time has elapsed.
pub const FALLBACK_FPS: f32 = 30.0;

/// Where row commands go. Implemented by the threaded worker pool and by the
/// inline executor.
pub trait RowCommander {
    fn dispatch(&mut self, row: u8, command: RowCommand) -> Result<Dispatch, Error>;

    /// Last known linear position of an actuated row.
    fn linear_position(&self, row: u8) -> Option<f32>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameState {
    Active,
    Stopped,
}

/// Cloneable stop signal shared with renderers, signal handlers and the like.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[inline]
    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct FrameStats {
    started: Instant,
    frames: u64,
}

impl FrameStats {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
            frames: 0,
        }
    }

    #[inline]
    fn tick(&mut self) {
        self.frames += 1;
    }

    #[inline]
    pub fn frames(&self) -> u64 {
        self.frames
    }

    #[inline]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn fps(&self) -> f32 {
        let secs = self.elapsed().as_secs_f32();

        if self.frames == 0 || secs <= 0.0 {
            FALLBACK_FPS
        } else {
            self.frames as f32 / secs
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RowGeometry {
    pub index: u8,
    pub x: f32,
    pub players: u8,
    pub spacing: f32,
    pub max_linear_travel: f32,
    pub step_size: f32,
    pub actuated: bool,
}

impl RowGeometry {
    /// Y of figure `player` with the rod slid to `linear_position`.
    #[inline]
    pub fn player_y(&self, player: u8, linear_position: f32, row_margin: f32) -> f32 {
        row_margin + linear_position + player as f32 * self.spacing
    }

    /// Rod slide that puts some figure at `y`, choosing the one needing the
    /// shortest move from `current`.
    pub fn position_for(&self, y: f32, row_margin: f32, current: f32) -> Option<f32> {
        (0..self.players)
            .map(|i| y - self.player_y(i, 0.0, row_margin))
            .filter(|pos| (0.0..=self.max_linear_travel).contains(pos))
            .min_by(|a, b| (a - current).abs().total_cmp(&(b - current).abs()))
    }
}

#[derive(Debug, Clone)]
pub struct RowLayout {
    rows: Vec<RowGeometry>,
    row_margin: f32,
}

impl RowLayout {
    pub fn from_config(config: &Config) -> Self {
        let mut rows: Vec<_> = config
            .rows
            .iter()
            .map(|r| RowGeometry {
                index: r.index,
                x: r.x,
                players: r.players,
                spacing: r.spacing,
                max_linear_travel: r.max_linear_travel,
                step_size: r.motor.step_size,
                actuated: r.actuated,
            })
            .collect();

        rows.sort_by(|a, b| a.x.total_cmp(&b.x));

        Self {
            rows,
            row_margin: config.players.row_margin,
        }
    }

    #[inline]
    pub fn rows(&self) -> &[RowGeometry] {
        &self.rows
    }

    #[inline]
    pub fn row_margin(&self) -> f32 {
        self.row_margin
    }

    pub fn actuated(&self) -> impl Iterator<Item = &RowGeometry> {
        self.rows.iter().filter(|r| r.actuated)
    }

    /// Row nearest to `x`, actuated or not.
    pub fn closest_row(&self, x: f32) -> Option<&RowGeometry> {
        self.rows
            .iter()
            .min_by(|a, b| (a.x - x).abs().total_cmp(&(b.x - x).abs()))
    }

    /// First row, goal to goal, whose figures can reach a ball at `x`.
    pub fn controlling_row(&self, x: f32, reach: f32) -> Option<&RowGeometry> {
        self.rows.iter().find(|r| (r.x - x).abs() < reach)
    }
}

/// Angle of approach in degrees: 90 is straight along the x axis, below 90
/// the ball drifts toward +y, above toward -y.
pub fn approach_angle(delta: na::Vector2<f32>) -> f32 {
    if delta.x == 0.0 && delta.y == 0.0 {
        return 90.0;
    }

    delta.x.abs().atan2(delta.y).to_degrees()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Issued {
    pub row: u8,
    pub command: RowCommand,
    pub dispatch: Dispatch,
}

pub struct StepReport {
    pub rectified: Mat,
    pub calibration_updated: bool,
    pub event: TrackEvent,
    pub issued: Vec<Issued>,
    pub players: Vec<PlayerDetection>,
    pub score: Score,
    pub stats: FrameStats,
}

pub struct GameController<C, M = ArucoMarkerDetector> {
    calibrator: TableCalibrator<M>,
    tracker: BallTracker,
    players: Option<PlayerDetector>,
    layout: RowLayout,
    commander: C,
    reach: f32,
    intercept: bool,
    px_per_cm: f32,
    stats: FrameStats,
    state: GameState,
    stop: StopHandle,
}

impl<C: RowCommander> GameController<C, ArucoMarkerDetector> {
    pub fn new(config: &Config, commander: C) -> Result<Self, Error> {
        let markers = ArucoMarkerDetector::new(config.calibration.dictionary)?;

        Self::with_marker_detector(config, markers, commander)
    }
}

impl<C: RowCommander, M: MarkerDetector> GameController<C, M> {
    pub fn with_marker_detector(config: &Config, markers: M, commander: C) -> Result<Self, Error> {
        let players = if config.players.enabled {
            Some(PlayerDetector::new(config)?)
        } else {
            None
        };

        Ok(Self {
            calibrator: TableCalibrator::new(config, markers)?,
            tracker: BallTracker::new(config)?,
            players,
            layout: RowLayout::from_config(config),
            commander,
            reach: config.controller.reach_threshold,
            intercept: config.controller.intercept,
            px_per_cm: config.table.px_per_cm(),
            stats: FrameStats::start(),
            state: GameState::Stopped,
            stop: StopHandle::new(),
        })
    }

    #[inline]
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    #[inline]
    pub fn state(&self) -> GameState {
        self.state
    }

    #[inline]
    pub fn stats(&self) -> &FrameStats {
        &self.stats
    }

    #[inline]
    pub fn score(&self) -> Score {
        self.tracker.score()
    }

    #[inline]
    pub fn tracker(&self) -> &BallTracker {
        &self.tracker
    }

    #[inline]
    pub fn tracker_mut(&mut self) -> &mut BallTracker {
        &mut self.tracker
    }

    #[inline]
    pub fn layout(&self) -> &RowLayout {
        &self.layout
    }

    #[inline]
    pub fn commander(&self) -> &C {
        &self.commander
    }

    /// Processes one raw frame.
    pub fn step(&mut self, raw: &Mat) -> Result<StepReport, Error> {
        let (rectified, calibration_updated) = self.calibrator.calibrate(raw)?;
        if calibration_updated {
            log::debug!("calibration refreshed");
        }

        let event = self.tracker.update(&rectified)?;

        let players = match &self.players {
            Some(detector) => detector.detect(&rectified)?,
            None => Vec::new(),
        };

        let issued = self.act();
        self.stats.tick();

        Ok(StepReport {
            rectified,
            calibration_updated,
            event,
            issued,
            players,
            score: self.tracker.score(),
            stats: self.stats.clone(),
        })
    }

    /// Sends this frame's row commands for the current ball state.
    ///
    /// Every actuated row within reach of the ball strikes. With interception
    /// on, rows the ball is heading for slide a figure into its path.
    pub fn act(&mut self) -> Vec<Issued> {
        let ball = self.tracker.state();
        let mut issued = Vec::new();

        if !ball.in_play() {
            return issued;
        }

        let pos = if ball.detected() {
            ball.position()
        } else {
            ball.projected()
        };

        let pos = match pos {
            Some(p) => p,
            None => return issued,
        };

        let delta = ball.delta();
        let margin = self.layout.row_margin();

        for row in self.layout.actuated() {
            let command = if (pos.x - row.x).abs() < self.reach {
                RowCommand::Kick {
                    angle: approach_angle(delta),
                    dx: delta.x,
                    dy: delta.y,
                }
            } else if self.intercept {
                let target = self
                    .tracker
                    .predictor()
                    .intercept_at(ball, row.x)
                    .zip(self.commander.linear_position(row.index))
                    .and_then(|(y, current)| {
                        row.position_for(y, margin, current)
                            .filter(|t| (t - current).abs() >= row.step_size)
                    });

                match target {
                    Some(t) => RowCommand::MoveTo(t),
                    None => continue,
                }
            } else {
                continue;
            };

            match self.commander.dispatch(row.index, command) {
                Ok(dispatch) => {
                    if dispatch == Dispatch::Sent {
                        log::debug!("row {}: {:?}", row.index, command);
                    }

                    issued.push(Issued {
                        row: row.index,
                        command,
                        dispatch,
                    });
                }

                Err(err) => log::error!("row {}: {}", row.index, err),
            }
        }

        issued
    }

    /// Runs until the source runs dry or a stop is requested.
    pub fn run<S: FrameSource + ?Sized>(
        &mut self,
        source: &mut S,
        mut renderer: Option<&mut dyn Renderer>,
    ) -> Result<Score, Error> {
        self.state = GameState::Active;
        self.stats = FrameStats::start();

        for row in self.layout.actuated() {
            if let Err(err) = self.commander.dispatch(row.index, RowCommand::Center) {
                log::error!("row {}: {}", row.index, err);
            }
        }

        log::info!("game started");

        while !self.stop.is_stopped() {
            let raw = match source.next_frame()? {
                Some(frame) => frame,
                None => {
                    log::info!("frame source exhausted");
                    break;
                }
            };

            let report = self.step(&raw)?;

            if let Some(r) = renderer.as_deref_mut() {
                let diag = DiagnosticFrame {
                    rectified: &report.rectified,
                    mask: self.tracker.mask(),
                    ball: self.tracker.state(),
                    players: &report.players,
                    score: report.score,
                    stats: &self.stats,
                    calibration: self.calibrator.frame(),
                    calibration_updated: report.calibration_updated,
                    goal_zone: self.tracker.predictor().goal_zone(),
                    goal_shot: self
                        .tracker
                        .predictor()
                        .projected_goal_intersection(self.tracker.state()),
                    rows: &self.layout,
                    reach: self.reach,
                    px_per_cm: self.px_per_cm,
                };

                if r.render(&diag)? == RenderAction::Stop {
                    log::info!("stop requested from display");
                    self.stop.stop();
                }
            }
        }

        self.state = GameState::Stopped;

        let score = self.tracker.score();
        log::info!(
            "game over after {} frames ({:.1}s), score {} : {}",
            self.stats.frames(),
            self.stats.elapsed().as_secs_f32(),
            score.a,
            score.b
        );

        Ok(score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::MarkerObservation;
    use crate::detection::Detection;
    use approx::assert_abs_diff_eq;

    struct NoMarkers;

    impl MarkerDetector for NoMarkers {
        fn detect(&mut self, _: &Mat) -> Result<Vec<MarkerObservation>, Error> {
            Ok(Vec::new())
        }
    }

    #[derive(Default)]
    struct Recorder {
        sent: Vec<(u8, RowCommand)>,
    }

    impl RowCommander for Recorder {
        fn dispatch(&mut self, row: u8, command: RowCommand) -> Result<Dispatch, Error> {
            self.sent.push((row, command));
            Ok(Dispatch::Sent)
        }

        fn linear_position(&self, _: u8) -> Option<f32> {
            Some(0.0)
        }
    }

    fn controller(config: &Config) -> GameController<Recorder, NoMarkers> {
        GameController::with_marker_detector(config, NoMarkers, Recorder::default()).unwrap()
    }

    fn see(c: &mut GameController<Recorder, NoMarkers>, x: f32, y: f32) {
        c.tracker_mut().observe(Some(Detection { x, y, area: 80.0 }));
    }

    #[test]
    fn approach_angle_convention() {
        assert_abs_diff_eq!(approach_angle(na::Vector2::new(-10.0, 0.0)), 90.0);
        assert_abs_diff_eq!(approach_angle(na::Vector2::new(10.0, 10.0)), 45.0, epsilon = 1e-4);
        assert_abs_diff_eq!(approach_angle(na::Vector2::new(-10.0, -10.0)), 135.0, epsilon = 1e-4);
        assert_abs_diff_eq!(approach_angle(na::Vector2::zeros()), 90.0);
    }

    #[test]
    fn closest_and_controlling_rows() {
        let layout = RowLayout::from_config(&Config::default());

        assert_eq!(layout.closest_row(130.0).unwrap().index, 1);
        assert_eq!(layout.closest_row(-50.0).unwrap().index, 0);
        assert_eq!(layout.controlling_row(290.0, 30.0).unwrap().index, 3);
        assert_eq!(layout.controlling_row(240.0, 30.0), None);
    }

    #[test]
    fn player_band_position() {
        let layout = RowLayout::from_config(&Config::default());
        let goalie = &layout.rows()[0];

        // middle figure covers 114.54 ..= 231.91
        assert_abs_diff_eq!(goalie.position_for(180.0, 17.0, 0.0).unwrap(), 65.46, epsilon = 1e-3);
        assert_abs_diff_eq!(goalie.player_y(1, 65.46, 17.0), 180.0, epsilon = 1e-3);
        assert_eq!(goalie.position_for(5.0, 17.0, 0.0), None);
    }

    #[test]
    fn row_within_reach_strikes() {
        let mut c = controller(&Config::default());
        see(&mut c, 140.0, 100.0);
        see(&mut c, 130.0, 102.0);

        let issued = c.act();

        assert_eq!(issued.len(), 1);
        assert_eq!(issued[0].row, 1);
        match issued[0].command {
            RowCommand::Kick { angle, dx, dy } => {
                assert_abs_diff_eq!(dx, -10.0);
                assert_abs_diff_eq!(dy, 2.0);
                assert_abs_diff_eq!(angle, 10.0f32.atan2(2.0).to_degrees(), epsilon = 1e-4);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn no_position_no_commands() {
        let mut c = controller(&Config::default());

        assert!(c.act().is_empty());
        assert!(c.commander().sent.is_empty());
    }

    #[test]
    fn occluded_ball_uses_projection() {
        let mut c = controller(&Config::default());
        see(&mut c, 170.0, 180.0);
        see(&mut c, 160.0, 180.0);
        assert!(c.act().is_empty());

        c.tracker_mut().observe(None);
        let issued = c.act();

        assert_eq!(issued.len(), 1);
        assert_eq!(issued[0].row, 1);
    }

    #[test]
    fn dead_ball_is_left_alone() {
        let mut c = controller(&Config::default());
        see(&mut c, 14.0, 180.0);
        see(&mut c, 8.0, 180.0);
        assert_eq!(c.tracker_mut().observe(None), TrackEvent::Goal(crate::tracker::Side::A));

        assert!(c.act().is_empty());
    }

    #[test]
    fn interception_slides_rows_into_path() {
        let mut config = Config::default();
        config.controller.intercept = true;

        let mut c = controller(&config);
        see(&mut c, 420.0, 180.0);
        see(&mut c, 400.0, 180.0);

        let moves: Vec<(u8, f32)> = c
            .act()
            .iter()
            .filter_map(|i| match i.command {
                RowCommand::MoveTo(t) => Some((i.row, t)),
                _ => None,
            })
            .collect();

        assert_eq!(moves.len(), 3);
        assert_eq!(moves[0].0, 0);
        assert_abs_diff_eq!(moves[0].1, 65.46, epsilon = 1e-3);
        assert_eq!(moves[1].0, 1);
        assert_abs_diff_eq!(moves[1].1, 31.23, epsilon = 1e-3);
        assert_eq!(moves[2].0, 3);
        assert_abs_diff_eq!(moves[2].1, 26.1, epsilon = 1e-3);
    }

    #[test]
    fn stop_handle_is_shared() {
        let c = controller(&Config::default());
        let handle = c.stop_handle();

        handle.stop();
        assert!(c.stop_handle().is_stopped());
    }

    #[test]
    fn fps_falls_back_before_first_frame() {
        assert_abs_diff_eq!(FrameStats::start().fps(), FALLBACK_FPS);
    }
}
