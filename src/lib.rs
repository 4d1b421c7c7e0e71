pub mod actuator;
pub mod calibration;
pub mod config;
pub mod controller;
pub mod detection;
pub mod detector;
pub mod display;
pub mod error;
pub mod frame;
pub mod geometry;
pub mod motor;
pub mod predictor;
pub mod tracker;
pub mod worker;

mod circular_queue;

pub use actuator::{Row, RowActuator};
pub use calibration::{CalibrationFrame, TableCalibrator};
pub use config::Config;
pub use controller::{GameController, GameState, RowCommander, StopHandle};
pub use detection::Detection;
pub use error::{ActuatorError, Error};
pub use tracker::{BallState, BallTracker, Score, Side};
pub use worker::{InlineRows, RowPool};
