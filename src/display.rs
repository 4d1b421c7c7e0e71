//! Operator view of the tracking state.

use nalgebra as na;
use opencv::{
    core::{self, Mat, Point, Rect, Scalar},
    highgui, imgproc,
    prelude::*,
};

use crate::calibration::CalibrationFrame;
use crate::controller::{FrameStats, RowLayout};
use crate::detection::PlayerDetection;
use crate::error::Error;
use crate::geometry::GoalZone;
use crate::predictor::GoalShot;
use crate::tracker::{BallState, Score};

const PANEL_HEIGHT: i32 = 184;
const GOAL_BAND_WIDTH: i32 = 4;

/// Everything a renderer may want to show for one processed frame.
pub struct DiagnosticFrame<'a> {
    pub rectified: &'a Mat,
    pub mask: &'a Mat,
    pub ball: &'a BallState,
    pub players: &'a [PlayerDetection],
    pub score: Score,
    pub stats: &'a FrameStats,
    pub calibration: &'a CalibrationFrame,
    pub calibration_updated: bool,
    pub goal_zone: GoalZone,
    /// Goal mouth crossing of the current heading, if any
    pub goal_shot: Option<GoalShot>,
    pub rows: &'a RowLayout,
    /// Distance along x at which a row can strike
    pub reach: f32,
    pub px_per_cm: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderAction {
    Continue,
    /// Operator asked to end the game
    Stop,
}

pub trait Renderer {
    fn render(&mut self, frame: &DiagnosticFrame<'_>) -> Result<RenderAction, Error>;
}

/// Text shown under the field.
pub fn status_lines(frame: &DiagnosticFrame<'_>) -> Vec<String> {
    let ball = frame.ball;
    let fps = frame.stats.fps();

    let whereabouts = match ball.position() {
        Some(p) if ball.detected() => format!("ball ({:.0}, {:.0})", p.x, p.y),
        Some(p) if ball.in_play() => format!(
            "ball ({:.0}, {:.0}), lost for {} frames",
            p.x,
            p.y,
            ball.lost_frames()
        ),
        Some(_) => "ball out of play".to_string(),
        None => "ball not seen yet".to_string(),
    };

    let wall = match ball.wall_hit() {
        Some(hit) => format!(
            "next wall {:?} at ({:.0}, {:.0})",
            hit.wall, hit.point.x, hit.point.y
        ),
        None => "next wall -".to_string(),
    };

    let shot = match frame.goal_shot {
        Some(shot) => format!("shot on goal {:?} at y {:.0}", shot.side, shot.point.y),
        None => "shot on goal -".to_string(),
    };

    let control = match ball.position() {
        Some(p) => match frame.rows.controlling_row(p.x, frame.reach) {
            Some(row) => format!("row {} in control", row.index),
            None => match frame.rows.closest_row(p.x) {
                Some(row) => format!("nearest row {}", row.index),
                None => "no rows".to_string(),
            },
        },
        None => "row -".to_string(),
    };

    let corners = frame
        .calibration
        .corners
        .iter()
        .map(|c| format!("({:.0}, {:.0})", c.x, c.y))
        .collect::<Vec<_>>()
        .join(" ");

    vec![
        format!("score {} : {}", frame.score.a, frame.score.b),
        format!(
            "time {:.1}s  frames {}  fps {:.1}{}",
            frame.stats.elapsed().as_secs_f32(),
            frame.stats.frames(),
            fps,
            if frame.calibration_updated { "  [cal]" } else { "" }
        ),
        whereabouts,
        format!(
            "speed {:.2} m/s  delta ({:.1}, {:.1})",
            ball.speed_mps(frame.px_per_cm, fps),
            ball.delta().x,
            ball.delta().y
        ),
        wall,
        shot,
        control,
        format!("corners {}", corners),
    ]
}

#[inline]
fn px(p: na::Point2<f32>) -> Point {
    Point::new(p.x.round() as i32, p.y.round() as i32)
}

/// Rectified frame with overlays and a status panel underneath.
pub fn compose(frame: &DiagnosticFrame<'_>) -> Result<Mat, Error> {
    let width = frame.rectified.cols();
    let height = frame.rectified.rows();

    let mut canvas = Mat::default();
    core::copy_make_border(
        frame.rectified,
        &mut canvas,
        0,
        PANEL_HEIGHT,
        0,
        0,
        core::BORDER_CONSTANT,
        Scalar::all(0.0),
    )?;

    let yellow = Scalar::new(0.0, 255.0, 255.0, 0.0);
    let green = Scalar::new(0.0, 255.0, 0.0, 0.0);
    let orange = Scalar::new(0.0, 128.0, 255.0, 0.0);
    let red = Scalar::new(0.0, 0.0, 255.0, 0.0);
    let blue = Scalar::new(255.0, 0.0, 0.0, 0.0);
    let gray = Scalar::all(128.0);
    let white = Scalar::all(255.0);

    let lower = frame.goal_zone.lower.round() as i32;
    let band = (frame.goal_zone.upper - frame.goal_zone.lower).round() as i32;
    for x in [0, width - GOAL_BAND_WIDTH] {
        imgproc::rectangle(
            &mut canvas,
            Rect::new(x, lower, GOAL_BAND_WIDTH, band),
            yellow,
            -1,
            imgproc::LINE_8,
            0,
        )?;
    }

    for row in frame.rows.rows() {
        let x = row.x.round() as i32;
        let color = if row.actuated { green } else { gray };

        imgproc::line(
            &mut canvas,
            Point::new(x, 0),
            Point::new(x, height - 1),
            color,
            1,
            imgproc::LINE_8,
            0,
        )?;
    }

    for p in frame.players {
        let b = p.blob;
        imgproc::rectangle(
            &mut canvas,
            Rect::new(b.x as i32, b.y as i32, b.w as i32, b.h as i32),
            white,
            1,
            imgproc::LINE_8,
            0,
        )?;
    }

    let ball = frame.ball;
    if let Some(pos) = ball.position() {
        if let Some(hit) = ball.wall_hit() {
            imgproc::line(&mut canvas, px(pos), px(hit.point), red, 1, imgproc::LINE_AA, 0)?;
            imgproc::circle(&mut canvas, px(hit.point), 4, red, -1, imgproc::LINE_AA, 0)?;
        }

        if let Some(shot) = frame.goal_shot {
            imgproc::circle(&mut canvas, px(shot.point), 6, yellow, 2, imgproc::LINE_AA, 0)?;
        }

        if let Some(next) = ball.projected() {
            imgproc::circle(&mut canvas, px(next), 3, blue, -1, imgproc::LINE_AA, 0)?;
        }

        let color = if ball.detected() { green } else { orange };
        imgproc::circle(&mut canvas, px(pos), 8, color, 2, imgproc::LINE_AA, 0)?;
    }

    for (i, line) in status_lines(frame).iter().enumerate() {
        imgproc::put_text(
            &mut canvas,
            line,
            Point::new(10, height + 22 + 20 * i as i32),
            imgproc::FONT_HERSHEY_SIMPLEX,
            0.5,
            white,
            1,
            imgproc::LINE_AA,
            false,
        )?;
    }

    Ok(canvas)
}

/// HighGUI windows; `q` or Esc stops the game.
pub struct HighguiRenderer {
    window: String,
    mask_window: Option<String>,
}

impl HighguiRenderer {
    pub fn new(window: &str, show_mask: bool) -> Result<Self, Error> {
        highgui::named_window(window, highgui::WINDOW_AUTOSIZE)?;

        let mask_window = if show_mask {
            let name = format!("{} mask", window);
            highgui::named_window(&name, highgui::WINDOW_AUTOSIZE)?;
            Some(name)
        } else {
            None
        };

        Ok(Self {
            window: window.to_string(),
            mask_window,
        })
    }
}

impl Renderer for HighguiRenderer {
    fn render(&mut self, frame: &DiagnosticFrame<'_>) -> Result<RenderAction, Error> {
        let canvas = compose(frame)?;
        highgui::imshow(&self.window, &canvas)?;

        if let Some(name) = &self.mask_window {
            if frame.mask.rows() > 0 {
                highgui::imshow(name, frame.mask)?;
            }
        }

        let key = highgui::wait_key(1)?;

        Ok(if key == 27 || key == 'q' as i32 {
            RenderAction::Stop
        } else {
            RenderAction::Continue
        })
    }
}

impl Drop for HighguiRenderer {
    fn drop(&mut self) {
        if let Err(err) = highgui::destroy_all_windows() {
            log::debug!("closing windows: {}", err);
        }
    }
}
