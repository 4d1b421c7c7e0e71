//! Straight-line extrapolation on the rectified playing field.
//!
//! Coordinates are rectified pixels: x runs from the left goal (0) to the
//! right goal (W), y from the "bottom" long wall (0) to the "top" one (H).

use nalgebra as na;

/// Evaluates the line through `(x1, y1)` and `(x2, y2)` at `xi`.
///
/// `None` when the two points share the same x, i.e. there is no motion along
/// the interpolation axis.
#[inline]
pub fn interpolate(xi: f32, x1: f32, y1: f32, x2: f32, y2: f32) -> Option<f32> {
    if x1 == x2 {
        return None;
    }

    Some((xi - x1) * (y2 - y1) / (x2 - x1) + y1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wall {
    /// x = 0
    Left,
    /// x = W
    Right,
    /// y = 0
    Bottom,
    /// y = H
    Top,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WallHit {
    pub wall: Wall,
    pub point: na::Point2<f32>,
}

/// Vertical goal band `[lower, upper]` shared by both short walls.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GoalZone {
    pub lower: f32,
    pub upper: f32,
}

impl GoalZone {
    #[inline]
    pub fn contains(&self, y: f32) -> bool {
        y >= self.lower && y <= self.upper
    }
}

/// The wall the object reaches first if it keeps moving by `delta` per frame
/// from `last`.
///
/// Each moving axis proposes the wall it heads to, with the perpendicular
/// coordinate found by interpolating through `last - delta` and `last`.
/// Proposals whose perpendicular coordinate lies off the field are dropped;
/// of the remaining ones the one reached in fewer frames wins. `None` for a
/// stationary object or when no proposal survives.
pub fn nearest_wall_intersection(
    last: na::Point2<f32>,
    delta: na::Vector2<f32>,
    width: f32,
    height: f32,
) -> Option<WallHit> {
    let prev = last - delta;
    let mut best: Option<(f32, WallHit)> = None;

    let mut consider = |frames: f32, hit: WallHit| {
        if best.map_or(true, |(t, _)| frames < t) {
            best = Some((frames, hit));
        }
    };

    if delta.x != 0.0 {
        let (wall, wall_x) = if delta.x < 0.0 {
            (Wall::Left, 0.0)
        } else {
            (Wall::Right, width)
        };

        if let Some(y) = interpolate(wall_x, prev.x, prev.y, last.x, last.y) {
            if (0.0..=height).contains(&y) {
                let frames = (wall_x - last.x) / delta.x;
                consider(
                    frames,
                    WallHit {
                        wall,
                        point: na::Point2::new(wall_x, y),
                    },
                );
            }
        }
    }

    if delta.y != 0.0 {
        let (wall, wall_y) = if delta.y < 0.0 {
            (Wall::Bottom, 0.0)
        } else {
            (Wall::Top, height)
        };

        if let Some(x) = interpolate(wall_y, prev.y, prev.x, last.y, last.x) {
            if (0.0..=width).contains(&x) {
                let frames = (wall_y - last.y) / delta.y;
                consider(
                    frames,
                    WallHit {
                        wall,
                        point: na::Point2::new(x, wall_y),
                    },
                );
            }
        }
    }

    best.map(|(_, hit)| hit)
}

/// Y at which the path crosses `x`, with bounces off the long walls folded
/// back onto `[0, height]`. `None` without horizontal motion.
pub fn reflected_y_at(
    last: na::Point2<f32>,
    delta: na::Vector2<f32>,
    x: f32,
    height: f32,
) -> Option<f32> {
    let prev = last - delta;
    let y = interpolate(x, prev.x, prev.y, last.x, last.y)?;

    Some(fold_into(y, height))
}

/// Mirror-folds `v` into `[0, size]`, as a ball bouncing between two walls.
#[inline]
fn fold_into(v: f32, size: f32) -> f32 {
    if size <= 0.0 {
        return 0.0;
    }

    let period = 2.0 * size;
    let v = v.rem_euclid(period);

    if v > size {
        period - v
    } else {
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const W: f32 = 640.0;
    const H: f32 = 360.0;

    #[test]
    fn interpolates_through_two_points() {
        let y = interpolate(20.0, 0.0, 0.0, 10.0, 5.0).unwrap();

        assert_abs_diff_eq!(y, 10.0);
    }

    #[test]
    fn interpolate_rejects_vertical_line() {
        assert_eq!(interpolate(5.0, 3.0, 1.0, 3.0, 9.0), None);
    }

    #[test]
    fn horizontal_motion_hits_left_wall_at_same_y() {
        let hit = nearest_wall_intersection(
            na::Point2::new(300.0, 180.0),
            na::Vector2::new(-20.0, 0.0),
            W,
            H,
        )
        .unwrap();

        assert_eq!(hit.wall, Wall::Left);
        assert_abs_diff_eq!(hit.point.x, 0.0);
        assert_abs_diff_eq!(hit.point.y, 180.0);
    }

    #[test]
    fn vertical_motion_hits_long_walls() {
        let up = nearest_wall_intersection(
            na::Point2::new(100.0, 200.0),
            na::Vector2::new(0.0, 5.0),
            W,
            H,
        )
        .unwrap();
        assert_eq!(up.wall, Wall::Top);
        assert_abs_diff_eq!(up.point.x, 100.0);
        assert_abs_diff_eq!(up.point.y, H);

        let down = nearest_wall_intersection(
            na::Point2::new(100.0, 200.0),
            na::Vector2::new(0.0, -5.0),
            W,
            H,
        )
        .unwrap();
        assert_eq!(down.wall, Wall::Bottom);
        assert_abs_diff_eq!(down.point.y, 0.0);
    }

    #[test]
    fn stationary_object_has_no_wall() {
        let hit = nearest_wall_intersection(
            na::Point2::new(100.0, 100.0),
            na::Vector2::zeros(),
            W,
            H,
        );

        assert_eq!(hit, None);
    }

    #[test]
    fn diagonal_motion_picks_first_contact() {
        // Reaches y = 360 after 10 frames, x = 640 only after 40.
        let hit = nearest_wall_intersection(
            na::Point2::new(240.0, 260.0),
            na::Vector2::new(10.0, 10.0),
            W,
            H,
        )
        .unwrap();

        assert_eq!(hit.wall, Wall::Top);
        assert_abs_diff_eq!(hit.point.x, 340.0, epsilon = 1e-3);
    }

    #[test]
    fn diagonal_motion_toward_goal() {
        let hit = nearest_wall_intersection(
            na::Point2::new(100.0, 180.0),
            na::Vector2::new(-10.0, 2.0),
            W,
            H,
        )
        .unwrap();

        assert_eq!(hit.wall, Wall::Left);
        assert_abs_diff_eq!(hit.point.y, 200.0, epsilon = 1e-3);
    }

    #[test]
    fn start_outside_field_has_no_wall() {
        let hit = nearest_wall_intersection(
            na::Point2::new(-50.0, 500.0),
            na::Vector2::new(-1.0, 30.0),
            W,
            H,
        );

        assert_eq!(hit, None);
    }

    #[test]
    fn reflected_y_folds_off_long_walls() {
        // Straight line would cross x = 0 at y = -40.
        let y = reflected_y_at(
            na::Point2::new(100.0, 60.0),
            na::Vector2::new(-10.0, -10.0),
            0.0,
            H,
        )
        .unwrap();
        assert_abs_diff_eq!(y, 40.0, epsilon = 1e-3);

        // Crosses x = 620 at y = 382, 22 px past the top wall.
        let y = reflected_y_at(
            na::Point2::new(600.0, 380.0),
            na::Vector2::new(10.0, 1.0),
            620.0,
            H,
        )
        .unwrap();
        assert_abs_diff_eq!(y, 338.0, epsilon = 1e-3);

        // Two bounces: y = -400 folds to 400, then to 320.
        let y = reflected_y_at(
            na::Point2::new(100.0, 0.0),
            na::Vector2::new(-10.0, -40.0),
            0.0,
            H,
        )
        .unwrap();
        assert_abs_diff_eq!(y, 320.0, epsilon = 1e-3);
    }

    #[test]
    fn reflected_y_needs_horizontal_motion() {
        assert_eq!(
            reflected_y_at(na::Point2::new(10.0, 10.0), na::Vector2::new(0.0, 3.0), 0.0, H),
            None
        );
    }

    #[test]
    fn goal_zone_is_inclusive() {
        let zone = GoalZone {
            lower: 133.79,
            upper: 226.2,
        };

        assert!(zone.contains(133.79));
        assert!(zone.contains(180.0));
        assert!(!zone.contains(226.3));
    }
}
