//! Load-time constants for the whole system.
//!
//! Every section carries `Default` values measured on the reference table, so
//! `Config::default()` (or an empty TOML file) gives a working setup. Nothing in
//! here changes after [`Config::validate`] has passed.

use std::path::Path;

use nalgebra as na;
use serde_derive::{Deserialize, Serialize};

use crate::error::Error;
use crate::geometry::GoalZone;

/// Inclusive HSV window, OpenCV convention (H in 0..=180).
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct HsvRange {
    pub lower: [u8; 3],
    pub upper: [u8; 3],
}

impl HsvRange {
    pub const fn new(lower: [u8; 3], upper: [u8; 3]) -> Self {
        Self { lower, upper }
    }

    fn validate(&self, what: &str) -> Result<(), Error> {
        if self.lower[0] > 180 || self.upper[0] > 180 {
            return Err(Error::Config(format!("{}: hue must be within 0..=180", what)));
        }

        if self.lower.iter().zip(self.upper.iter()).any(|(l, u)| l > u) {
            return Err(Error::Config(format!(
                "{}: lower bound {:?} exceeds upper bound {:?}",
                what, self.lower, self.upper
            )));
        }

        Ok(())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct TableConfig {
    /// Playing field length along the x axis (goal to goal), in cm
    pub length_cm: f32,
    /// Playing field width along the y axis, in cm
    pub width_cm: f32,
    /// Rectified frame size in pixels
    pub width_px: u32,
    pub height_px: u32,
    /// Goal mouth width at the height of the ball, in rectified pixels
    pub goal_width_px: f32,
    /// How close to a short wall the ball has to be for a goal to count
    pub wall_margin_px: f32,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            length_cm: 118.75,
            width_cm: 67.31,
            width_px: 640,
            height_px: 360,
            goal_width_px: 92.41,
            wall_margin_px: 10.0,
        }
    }
}

impl TableConfig {
    #[inline]
    pub fn width(&self) -> f32 {
        self.width_px as f32
    }

    #[inline]
    pub fn height(&self) -> f32 {
        self.height_px as f32
    }

    #[inline]
    pub fn px_per_cm(&self) -> f32 {
        self.width() / self.length_cm
    }

    /// Goal band centred on each short wall.
    pub fn goal_zone(&self) -> GoalZone {
        let lower = (self.height() - self.goal_width_px) / 2.0;

        GoalZone {
            lower,
            upper: self.height() - lower,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerDictionary {
    #[serde(rename = "4x4_50")]
    Dict4x4_50,
    #[serde(rename = "4x4_100")]
    Dict4x4_100,
    #[serde(rename = "4x4_250")]
    Dict4x4_250,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct CalibrationConfig {
    pub dictionary: MarkerDictionary,
    /// Which of the four marker polygon corners is taken as the marker position
    pub reference_corner: usize,
    /// Offset from the reference corner to the true table corner, per marker id
    pub marker_offsets: [[f32; 2]; 4],
    /// Table corners (tl, tr, br, bl) in raw camera pixels, used until all four
    /// markers have been seen together
    pub default_corners: [[f32; 2]; 4],
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            dictionary: MarkerDictionary::Dict4x4_50,
            reference_corner: 0,
            marker_offsets: [[0.0, 0.0]; 4],
            default_corners: [[62.0, 124.0], [546.0, 132.0], [550.0, 410.0], [49.0, 400.0]],
        }
    }
}

impl CalibrationConfig {
    pub fn default_corners(&self) -> [na::Point2<f32>; 4] {
        self.default_corners.map(|[x, y]| na::Point2::new(x, y))
    }

    pub fn marker_offset(&self, id: usize) -> na::Vector2<f32> {
        let [dx, dy] = self.marker_offsets[id];
        na::Vector2::new(dx, dy)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct BallConfig {
    pub hsv: HsvRange,
    /// Gaussian blur kernel size (odd)
    pub blur_kernel: i32,
    pub morph_iterations: i32,
    pub history_capacity: usize,
    /// |dx| + |dy| below this is treated as jitter
    pub noise_threshold: f32,
    /// A disappearance counts as a goal only within this many lost frames
    pub goal_lost_frames: u32,
}

impl Default for BallConfig {
    fn default() -> Self {
        Self {
            hsv: HsvRange::new([25, 30, 150], [45, 100, 255]),
            blur_kernel: 11,
            morph_iterations: 2,
            history_capacity: 30,
            noise_threshold: 2.0,
            goal_lost_frames: 1,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct PlayersConfig {
    pub enabled: bool,
    /// Red wraps around the hue circle, so it is the union of several windows
    pub red: Vec<HsvRange>,
    pub blue: Vec<HsvRange>,
    pub red_rows: Vec<u8>,
    pub blue_rows: Vec<u8>,
    pub morph_iterations: i32,
    /// Height of the rod bumpers; blobs touching it are the bumpers, not players
    pub row_margin: f32,
    pub min_player_height: f32,
}

impl Default for PlayersConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            red: vec![
                HsvRange::new([0, 0, 0], [10, 255, 255]),
                HsvRange::new([170, 0, 0], [180, 255, 255]),
            ],
            blue: vec![HsvRange::new([85, 0, 0], [110, 255, 255])],
            red_rows: vec![0, 1, 3, 5],
            blue_rows: vec![2, 4, 6, 7],
            morph_iterations: 4,
            row_margin: 17.0,
            min_player_height: 9.0,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct MotorConfig {
    /// Linear travel per step pulse, in rectified pixels
    pub step_size: f32,
    pub steps_per_revolution: u32,
    /// Half period of a step pulse
    pub dwell_us: u64,
    pub min_angle: f32,
    pub max_angle: f32,
    /// Rotation reached at the end of a strike
    pub strike_angle: f32,
    /// Pause at the end of the strike before recoiling
    pub strike_hold_ms: u64,
}

impl Default for MotorConfig {
    fn default() -> Self {
        Self {
            step_size: 1.0,
            steps_per_revolution: 200,
            dwell_us: 2200,
            min_angle: -90.0,
            max_angle: 90.0,
            strike_angle: 90.0,
            strike_hold_ms: 20,
        }
    }
}

impl MotorConfig {
    #[inline]
    pub fn angle_step(&self) -> f32 {
        360.0 / self.steps_per_revolution as f32
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RowConfig {
    pub index: u8,
    /// Rod position along the x axis, in rectified pixels
    pub x: f32,
    pub players: u8,
    pub spacing: f32,
    pub max_linear_travel: f32,
    #[serde(default)]
    pub actuated: bool,
    /// Defensive rest position; the middle of the travel when absent
    #[serde(default)]
    pub default_position: Option<f32>,
    #[serde(default)]
    pub motor: MotorConfig,
}

impl RowConfig {
    pub fn rest_position(&self) -> f32 {
        self.default_position
            .unwrap_or((self.max_linear_travel / 2.0).floor())
    }
}

pub const ROW_SPACING_PX: f32 = 79.09;
pub const FIRST_ROW_X_PX: f32 = 43.19;

fn default_rows() -> Vec<RowConfig> {
    // (players, spacing, travel) per rod, goal to goal
    const GOALIE: (u8, f32, f32) = (3, 97.54, 116.37);
    const DEFENSE: (u8, f32, f32) = (2, 131.77, 183.11);
    const MIDFIELD: (u8, f32, f32) = (5, 68.45, 58.18);
    const OFFENSE: (u8, f32, f32) = (3, 97.54, 116.37);

    let layout = [
        (GOALIE, true),
        (DEFENSE, true),
        (OFFENSE, false),
        (MIDFIELD, true),
        (MIDFIELD, false),
        (OFFENSE, true),
        (DEFENSE, false),
        (GOALIE, false),
    ];

    layout
        .iter()
        .enumerate()
        .map(|(idx, &((players, spacing, travel), actuated))| RowConfig {
            index: idx as u8,
            x: ((FIRST_ROW_X_PX + ROW_SPACING_PX * idx as f32) * 100.0).round() / 100.0,
            players,
            spacing,
            max_linear_travel: travel,
            actuated,
            default_position: None,
            motor: MotorConfig::default(),
        })
        .collect()
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ControllerConfig {
    /// Horizontal distance from a rod within which that rod strikes
    pub reach_threshold: f32,
    /// Move actuated rows in front of the predicted ball path
    pub intercept: bool,
    /// A maneuver not acknowledged within this time faults the row
    pub maneuver_timeout_ms: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            reach_threshold: 30.0,
            intercept: false,
            maneuver_timeout_ms: 2000,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct CameraConfig {
    pub index: i32,
    pub width: u32,
    pub height: u32,
    /// How long to wait for the first frame before giving up
    pub warmup_ms: u64,
    /// Repeating the same frame for longer than this is logged as a stall
    pub stall_warning_ms: u64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            index: 0,
            width: 1280,
            height: 720,
            warmup_ms: 5000,
            stall_warning_ms: 1000,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub camera: CameraConfig,
    pub table: TableConfig,
    pub calibration: CalibrationConfig,
    pub ball: BallConfig,
    pub players: PlayersConfig,
    pub rows: Vec<RowConfig>,
    pub controller: ControllerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera: CameraConfig::default(),
            table: TableConfig::default(),
            calibration: CalibrationConfig::default(),
            ball: BallConfig::default(),
            players: PlayersConfig::default(),
            rows: default_rows(),
            controller: ControllerConfig::default(),
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_toml(&text)?;

        log::info!("loaded config from {}", path.as_ref().display());

        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, Error> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;

        Ok(config)
    }

    pub fn row(&self, index: u8) -> Option<&RowConfig> {
        self.rows.iter().find(|r| r.index == index)
    }

    pub fn validate(&self) -> Result<(), Error> {
        let t = &self.table;
        if t.width_px == 0 || t.height_px == 0 || t.length_cm <= 0.0 || t.width_cm <= 0.0 {
            return Err(Error::Config("table dimensions must be positive".into()));
        }

        if t.goal_width_px <= 0.0 || t.goal_width_px > t.height() {
            return Err(Error::Config(format!(
                "goal width {} must be within (0, {}]",
                t.goal_width_px, t.height_px
            )));
        }

        if t.wall_margin_px < 0.0 {
            return Err(Error::Config("wall margin must not be negative".into()));
        }

        if self.calibration.reference_corner > 3 {
            return Err(Error::Config("marker reference corner must be 0..=3".into()));
        }

        self.ball.hsv.validate("ball.hsv")?;

        if self.ball.history_capacity == 0 {
            return Err(Error::Config("ball history capacity must be at least 1".into()));
        }

        if self.ball.blur_kernel <= 0 || self.ball.blur_kernel % 2 == 0 {
            return Err(Error::Config("blur kernel must be a positive odd number".into()));
        }

        if self.ball.noise_threshold < 0.0 {
            return Err(Error::Config("noise threshold must not be negative".into()));
        }

        for range in self.players.red.iter().chain(self.players.blue.iter()) {
            range.validate("players")?;
        }

        let mut seen = [false; 8];
        for row in &self.rows {
            let idx = row.index as usize;
            if idx >= seen.len() {
                return Err(Error::Config(format!("row index {} out of range 0..8", idx)));
            }

            if seen[idx] {
                return Err(Error::Config(format!("row {} configured twice", idx)));
            }
            seen[idx] = true;

            if row.x < 0.0 || row.x > t.width() {
                return Err(Error::Config(format!("row {}: x {} off the table", idx, row.x)));
            }

            if row.max_linear_travel < 0.0 {
                return Err(Error::Config(format!("row {}: negative linear travel", idx)));
            }

            let rest = row.rest_position();
            if rest < 0.0 || rest > row.max_linear_travel {
                return Err(Error::Config(format!(
                    "row {}: rest position {} outside [0, {}]",
                    idx, rest, row.max_linear_travel
                )));
            }

            let m = &row.motor;
            if m.step_size <= 0.0 || m.steps_per_revolution == 0 {
                return Err(Error::Config(format!("row {}: step size must be positive", idx)));
            }

            if m.min_angle > 0.0 || m.max_angle < 0.0 || m.min_angle < -180.0 || m.max_angle > 180.0
            {
                return Err(Error::Config(format!(
                    "row {}: angle bounds [{}, {}] must contain 0 and stay within ±180",
                    idx, m.min_angle, m.max_angle
                )));
            }

            if m.strike_angle < m.min_angle || m.strike_angle > m.max_angle {
                return Err(Error::Config(format!(
                    "row {}: strike angle {} outside angle bounds",
                    idx, m.strike_angle
                )));
            }
        }

        if self.camera.width == 0 || self.camera.height == 0 || self.camera.warmup_ms == 0 {
            return Err(Error::Config(
                "camera size and warm-up time must be positive".into(),
            ));
        }

        if self.controller.reach_threshold < 0.0 {
            return Err(Error::Config("reach threshold must not be negative".into()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn defaults_are_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn goal_zone_matches_table_measurements() {
        let zone = TableConfig::default().goal_zone();

        assert_abs_diff_eq!(zone.lower, 133.795, epsilon = 1e-3);
        assert_abs_diff_eq!(zone.upper, 226.205, epsilon = 1e-3);
    }

    #[test]
    fn default_rows_follow_rod_layout() {
        let config = Config::default();

        assert_eq!(config.rows.len(), 8);
        assert_abs_diff_eq!(config.rows[0].x, 43.19, epsilon = 1e-3);
        assert_abs_diff_eq!(config.rows[7].x, 596.82, epsilon = 1e-3);

        let actuated: Vec<u8> = config
            .rows
            .iter()
            .filter(|r| r.actuated)
            .map(|r| r.index)
            .collect();
        assert_eq!(actuated, vec![0, 1, 3, 5]);
        assert_abs_diff_eq!(config.rows[0].rest_position(), 58.0);
    }

    #[test]
    fn empty_toml_yields_defaults() {
        let config = Config::from_toml("").unwrap();

        assert_eq!(config, Config::default());
    }

    #[test]
    fn partial_toml_overrides_section() {
        let config = Config::from_toml(
            r#"
            [ball]
            hsv = { lower = [20, 40, 100], upper = [40, 120, 250] }
            history_capacity = 10

            [controller]
            reach_threshold = 25.0
            "#,
        )
        .unwrap();

        assert_eq!(config.ball.hsv.lower, [20, 40, 100]);
        assert_eq!(config.ball.history_capacity, 10);
        assert_eq!(config.ball.blur_kernel, 11);
        assert_abs_diff_eq!(config.controller.reach_threshold, 25.0);
    }

    #[test]
    fn rejects_inverted_hsv_window() {
        let mut config = Config::default();
        config.ball.hsv = HsvRange::new([45, 30, 150], [25, 100, 255]);

        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn rejects_hue_above_180() {
        let mut config = Config::default();
        config.ball.hsv = HsvRange::new([170, 0, 0], [200, 255, 255]);

        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_duplicate_rows() {
        let mut config = Config::default();
        config.rows[1].index = 0;

        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_dimensions() {
        let mut config = Config::default();
        config.table.height_px = 0;

        assert!(config.validate().is_err());
    }

    #[test]
    fn camera_timing_from_toml() {
        let config = Config::from_toml("[camera]\nindex = 2\nstall_warning_ms = 250\n").unwrap();

        assert_eq!(config.camera.index, 2);
        assert_eq!(config.camera.stall_warning_ms, 250);
        assert_eq!(config.camera.warmup_ms, 5000);

        assert!(Config::from_toml("[camera]\nwarmup_ms = 0\n").is_err());
    }

    #[test]
    fn rejects_strike_angle_outside_bounds() {
        let mut config = Config::default();
        config.rows[0].motor.strike_angle = 120.0;

        assert!(config.validate().is_err());
    }
}
