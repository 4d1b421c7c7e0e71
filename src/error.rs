use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("OpenCV Error: {0}")]
    OpenCvError(#[from] opencv::Error),

    #[error("IO Error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Config Parse Error: {0}")]
    ConfigParseError(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Config(String),

    #[error("Frame acquisition failed: {0}")]
    AcquisitionFailed(String),

    #[error("Actuator worker for row {0} is disconnected")]
    WorkerDisconnected(u8),
}

/// Rejection reasons for a single actuator request. A rejected request never
/// moves the motors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ActuatorError {
    #[error("row {row}: linear target {target} outside [0, {max}]")]
    LinearOutOfRange { row: u8, target: f32, max: f32 },

    #[error("row {row}: angle target {target} outside [{min}, {max}]")]
    AngleOutOfRange {
        row: u8,
        target: f32,
        min: f32,
        max: f32,
    },

    #[error("row {row}: no {axis:?} motor attached")]
    MissingAxis { row: u8, axis: crate::motor::Axis },

    #[error("row {row}: motor driver failure: {reason}")]
    Driver { row: u8, reason: String },
}
