use nalgebra as na;

use crate::config::TableConfig;
use crate::geometry::{nearest_wall_intersection, reflected_y_at, GoalZone, WallHit};
use crate::tracker::{BallState, Side};

/// Shot that, left alone, ends up in a goal mouth.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GoalShot {
    /// Side credited if the shot goes in
    pub side: Side,
    pub point: na::Point2<f32>,
}

/// Linear extrapolation of the ball path over the rectified field.
#[derive(Debug, Clone)]
pub struct TrajectoryPredictor {
    width: f32,
    height: f32,
    goal_zone: GoalZone,
}

impl TrajectoryPredictor {
    pub fn new(table: &TableConfig) -> Self {
        Self {
            width: table.width(),
            height: table.height(),
            goal_zone: table.goal_zone(),
        }
    }

    #[inline]
    pub fn goal_zone(&self) -> GoalZone {
        self.goal_zone
    }

    /// First wall the ball reaches on its current heading.
    pub fn projected_wall_position(&self, state: &BallState) -> Option<WallHit> {
        nearest_wall_intersection(state.position()?, state.delta(), self.width, self.height)
    }

    /// Where the ball crosses the goal line it is heading to, bounces off the
    /// long walls included, if that crossing falls in the goal mouth.
    pub fn projected_goal_intersection(&self, state: &BallState) -> Option<GoalShot> {
        let last = state.position()?;
        let delta = state.delta();

        let (side, goal_x) = if delta.x < 0.0 {
            (Side::A, 0.0)
        } else if delta.x > 0.0 {
            (Side::B, self.width)
        } else {
            return None;
        };

        let y = reflected_y_at(last, delta, goal_x, self.height)?;

        if self.goal_zone.contains(y) {
            Some(GoalShot {
                side,
                point: na::Point2::new(goal_x, y),
            })
        } else {
            None
        }
    }

    /// Y at which the ball will cross the vertical line `x`. Only for a ball
    /// still moving toward that line.
    pub fn intercept_at(&self, state: &BallState, x: f32) -> Option<f32> {
        let last = state.position()?;
        let delta = state.delta();

        if (x - last.x) * delta.x <= 0.0 {
            return None;
        }

        reflected_y_at(last, delta, x, self.height)
    }
}
