use nalgebra as na;
use opencv::core::Mat;
use serde_derive::{Deserialize, Serialize};

use crate::circular_queue::CircularQueue;
use crate::config::Config;
use crate::detection::Detection;
use crate::detector::BallDetector;
use crate::error::Error;
use crate::geometry::WallHit;
use crate::predictor::TrajectoryPredictor;

/// Table side. A goal in the left wall (x = 0) is credited to `A`, one in the
/// right wall to `B`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    A,
    B,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Score {
    pub a: u32,
    pub b: u32,
}

impl Score {
    #[inline]
    fn credit(&mut self, side: Side) {
        match side {
            Side::A => self.a += 1,
            Side::B => self.b += 1,
        }
    }
}

/// What a single observation did to the ball state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackEvent {
    Detected,
    /// In play but not seen this frame
    Occluded,
    /// Not in play and not seen
    Idle,
    Goal(Side),
}

#[derive(Debug, Clone)]
pub struct BallState {
    history: CircularQueue<na::Point2<f32>>,
    delta: na::Vector2<f32>,
    projected: Option<na::Point2<f32>>,
    wall_hit: Option<WallHit>,
    area: f32,
    lost_frames: u32,
    in_play: bool,
    detected: bool,
}

impl BallState {
    pub fn new(capacity: usize) -> Self {
        Self {
            history: CircularQueue::with_capacity(capacity),
            delta: na::Vector2::zeros(),
            projected: None,
            wall_hit: None,
            area: 0.0,
            lost_frames: 0,
            in_play: false,
            detected: false,
        }
    }

    /// Last known position.
    #[inline]
    pub fn position(&self) -> Option<na::Point2<f32>> {
        self.history.latest().copied()
    }

    #[inline]
    pub fn history(&self) -> &CircularQueue<na::Point2<f32>> {
        &self.history
    }

    /// Per-frame displacement estimate.
    #[inline]
    pub fn delta(&self) -> na::Vector2<f32> {
        self.delta
    }

    /// Expected position on the next frame.
    #[inline]
    pub fn projected(&self) -> Option<na::Point2<f32>> {
        self.projected
    }

    #[inline]
    pub fn wall_hit(&self) -> Option<WallHit> {
        self.wall_hit
    }

    /// Blob area of the latest detection, in pixels.
    #[inline]
    pub fn area(&self) -> f32 {
        self.area
    }

    #[inline]
    pub fn lost_frames(&self) -> u32 {
        self.lost_frames
    }

    #[inline]
    pub fn in_play(&self) -> bool {
        self.in_play
    }

    #[inline]
    pub fn detected(&self) -> bool {
        self.detected
    }

    /// Ball speed in metres per second.
    pub fn speed_mps(&self, px_per_cm: f32, fps: f32) -> f32 {
        if px_per_cm <= 0.0 {
            return 0.0;
        }

        self.delta.norm() * fps / px_per_cm / 100.0
    }

    /// Appends a position and recomputes the velocity estimate.
    ///
    /// With three or more points the displacement is averaged over the last
    /// two frames. Displacements whose L1 norm is below `noise_threshold` are
    /// zeroed.
    pub(crate) fn record(&mut self, pos: na::Point2<f32>, noise_threshold: f32) {
        self.history.push(pos);

        let delta = match (self.history.nth_latest(1), self.history.nth_latest(2)) {
            (Some(_), Some(p2)) => (pos - p2) / 2.0,
            (Some(p1), None) => pos - p1,
            _ => na::Vector2::zeros(),
        };

        self.delta = if delta.x.abs() + delta.y.abs() < noise_threshold {
            na::Vector2::zeros()
        } else {
            delta
        };

        self.projected = Some(pos + self.delta);
    }
}

/// Follows the ball from frame to frame and keeps the score.
pub struct BallTracker {
    detector: BallDetector,
    predictor: TrajectoryPredictor,
    state: BallState,
    score: Score,
    noise_threshold: f32,
    goal_lost_frames: u32,
    wall_margin: f32,
    width: f32,
}

impl BallTracker {
    pub fn new(config: &Config) -> Result<Self, Error> {
        Ok(Self {
            detector: BallDetector::new(&config.ball)?,
            predictor: TrajectoryPredictor::new(&config.table),
            state: BallState::new(config.ball.history_capacity),
            score: Score::default(),
            noise_threshold: config.ball.noise_threshold,
            goal_lost_frames: config.ball.goal_lost_frames,
            wall_margin: config.table.wall_margin_px,
            width: config.table.width(),
        })
    }

    /// Detects the ball in a rectified frame and folds the result in.
    pub fn update(&mut self, frame: &Mat) -> Result<TrackEvent, Error> {
        let detection = self.detector.detect(frame)?;

        Ok(self.observe(detection))
    }

    pub fn observe(&mut self, detection: Option<Detection>) -> TrackEvent {
        let det = match detection {
            Some(det) => det,
            None => return self.lost(),
        };

        if !self.state.in_play {
            log::info!("ball in play at ({:.1}, {:.1})", det.x, det.y);
        }

        self.state.record(det.center(), self.noise_threshold);
        self.state.area = det.area;
        self.state.lost_frames = 0;
        self.state.in_play = true;
        self.state.detected = true;
        self.state.wall_hit = self.predictor.projected_wall_position(&self.state);

        TrackEvent::Detected
    }

    fn lost(&mut self) -> TrackEvent {
        self.state.detected = false;
        self.state.lost_frames = self.state.lost_frames.saturating_add(1);

        if !self.state.in_play {
            return TrackEvent::Idle;
        }

        match self.goal_side() {
            Some(side) => {
                self.state.in_play = false;
                self.score.credit(side);

                log::info!(
                    "goal for side {:?}, score {} : {}",
                    side,
                    self.score.a,
                    self.score.b
                );

                TrackEvent::Goal(side)
            }

            None => {
                log::trace!("ball lost for {} frames", self.state.lost_frames);
                TrackEvent::Occluded
            }
        }
    }

    /// A ball that vanishes right at a goal mouth went in.
    fn goal_side(&self) -> Option<Side> {
        if self.state.lost_frames > self.goal_lost_frames {
            return None;
        }

        let last = self.state.position()?;
        let projected = self.state.projected?;

        if !self.predictor.goal_zone().contains(projected.y) {
            return None;
        }

        if last.x < self.wall_margin && projected.x < self.wall_margin {
            Some(Side::A)
        } else if last.x > self.width - self.wall_margin && projected.x > self.width - self.wall_margin
        {
            Some(Side::B)
        } else {
            None
        }
    }

    #[inline]
    pub fn state(&self) -> &BallState {
        &self.state
    }

    #[inline]
    pub fn score(&self) -> Score {
        self.score
    }

    #[inline]
    pub fn predictor(&self) -> &TrajectoryPredictor {
        &self.predictor
    }

    /// Ball mask of the latest `update`.
    #[inline]
    pub fn mask(&self) -> &Mat {
        self.detector.mask()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn tracker() -> BallTracker {
        BallTracker::new(&Config::default()).unwrap()
    }

    fn at(x: f32, y: f32) -> Option<Detection> {
        Some(Detection { x, y, area: 80.0 })
    }

    #[test]
    fn velocity_from_two_points() {
        let mut t = tracker();
        t.observe(at(100.0, 100.0));
        t.observe(at(110.0, 108.0));

        let s = t.state();
        assert_abs_diff_eq!(s.delta().x, 10.0);
        assert_abs_diff_eq!(s.delta().y, 8.0);
        assert_abs_diff_eq!(s.projected().unwrap().x, 120.0);
        assert_abs_diff_eq!(s.projected().unwrap().y, 116.0);
    }

    #[test]
    fn velocity_averages_over_two_frames() {
        let mut t = tracker();
        t.observe(at(100.0, 100.0));
        t.observe(at(104.0, 100.0));
        t.observe(at(120.0, 110.0));

        assert_abs_diff_eq!(t.state().delta().x, 10.0);
        assert_abs_diff_eq!(t.state().delta().y, 5.0);
    }

    #[test]
    fn jitter_is_suppressed() {
        let mut t = tracker();
        t.observe(at(100.0, 100.0));
        t.observe(at(101.0, 100.5));

        let s = t.state();
        assert_eq!(s.delta(), na::Vector2::zeros());
        assert_eq!(s.projected(), s.position());
        assert_eq!(s.wall_hit(), None);
    }

    #[test]
    fn single_detection_is_stationary() {
        let mut t = tracker();

        assert_eq!(t.observe(at(300.0, 200.0)), TrackEvent::Detected);
        assert!(t.state().in_play());
        assert_eq!(t.state().delta(), na::Vector2::zeros());
    }

    #[test]
    fn history_is_bounded() {
        let mut t = tracker();
        for i in 0..40 {
            t.observe(at(100.0 + 3.0 * i as f32, 180.0));
        }

        assert_eq!(t.state().history().len(), 30);
        assert_abs_diff_eq!(t.state().position().unwrap().x, 217.0);
    }

    #[test]
    fn goal_in_left_wall_counts_once() {
        let mut t = tracker();
        t.observe(at(14.0, 180.0));
        t.observe(at(11.0, 180.0));
        t.observe(at(8.0, 180.0));
        assert_abs_diff_eq!(t.state().projected().unwrap().x, 5.0);

        assert_eq!(t.observe(None), TrackEvent::Goal(Side::A));
        assert_eq!(t.score(), Score { a: 1, b: 0 });
        assert!(!t.state().in_play());

        assert_eq!(t.observe(None), TrackEvent::Idle);
        assert_eq!(t.state().lost_frames(), 2);
        assert_eq!(t.score(), Score { a: 1, b: 0 });
    }

    #[test]
    fn goal_in_right_wall_credits_b() {
        let mut t = tracker();
        t.observe(at(620.0, 190.0));
        t.observe(at(632.0, 192.0));

        assert_eq!(t.observe(None), TrackEvent::Goal(Side::B));
        assert_eq!(t.score(), Score { a: 0, b: 1 });
    }

    #[test]
    fn occlusion_mid_field_is_not_a_goal() {
        let mut t = tracker();
        t.observe(at(300.0, 180.0));
        t.observe(at(290.0, 180.0));

        assert_eq!(t.observe(None), TrackEvent::Occluded);
        assert_eq!(t.state().lost_frames(), 1);
        assert!(t.state().in_play());
        assert_eq!(t.score(), Score::default());
    }

    #[test]
    fn ball_beside_goal_mouth_is_not_a_goal() {
        let mut t = tracker();
        t.observe(at(9.0, 40.0));
        t.observe(at(6.0, 38.0));

        assert_eq!(t.observe(None), TrackEvent::Occluded);
        assert_eq!(t.score(), Score::default());
    }

    #[test]
    fn late_disappearance_is_not_a_goal() {
        let mut t = tracker();
        t.observe(at(20.0, 180.0));
        t.observe(at(15.0, 180.0));

        // Lost away from the wall, so the first lost frame is no goal either.
        assert_eq!(t.observe(None), TrackEvent::Occluded);
        assert_eq!(t.observe(None), TrackEvent::Occluded);
        assert_eq!(t.state().lost_frames(), 2);
        assert_eq!(t.score(), Score::default());
    }

    #[test]
    fn redetection_resets_lost_frames() {
        let mut t = tracker();
        t.observe(at(300.0, 180.0));
        t.observe(None);
        t.observe(None);
        t.observe(at(305.0, 181.0));

        assert_eq!(t.state().lost_frames(), 0);
        assert!(t.state().detected());
    }

    #[test]
    fn nothing_seen_is_idle() {
        let mut t = tracker();

        assert_eq!(t.observe(None), TrackEvent::Idle);
        assert_eq!(t.state().position(), None);
        assert_eq!(t.state().lost_frames(), 1);

        assert_eq!(t.observe(None), TrackEvent::Idle);
        assert_eq!(t.state().lost_frames(), 2);
    }

    #[test]
    fn speed_in_metres_per_second() {
        let mut t = tracker();
        t.observe(at(100.0, 100.0));
        t.observe(at(130.0, 140.0));

        // 50 px/frame at 30 fps over 640 px / 118.75 cm
        let speed = t.state().speed_mps(640.0 / 118.75, 30.0);
        assert_abs_diff_eq!(speed, 50.0 * 30.0 / (640.0 / 118.75) / 100.0, epsilon = 1e-4);
    }
}
