//! Stepper motor driver seam.
//!
//! Every row owns up to two step/direction drivers: one sliding the rod, one
//! rotating it. The actuator only ever talks to [`MotorDriver`]; the GPIO or
//! serial plumbing behind it lives with the integrator.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    Linear,
    Rotational,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

/// Motion sense along an axis. `Forward` increases the coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    #[inline]
    pub fn of(delta: f32) -> Self {
        if delta < 0.0 {
            Direction::Backward
        } else {
            Direction::Forward
        }
    }

    #[inline]
    pub fn reversed(self) -> Self {
        match self {
            Direction::Forward => Direction::Backward,
            Direction::Backward => Direction::Forward,
        }
    }

    #[inline]
    pub fn sign(self) -> f32 {
        match self {
            Direction::Forward => 1.0,
            Direction::Backward => -1.0,
        }
    }

    /// Level of the direction line.
    #[inline]
    pub fn level(self) -> Level {
        match self {
            Direction::Forward => Level::High,
            Direction::Backward => Level::Low,
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct DriverError(pub String);

pub trait MotorDriver: Send {
    /// Whether a motor is wired to `axis`.
    fn has_axis(&self, axis: Axis) -> bool;

    fn set_direction(&mut self, axis: Axis, direction: Direction) -> Result<(), DriverError>;

    /// Drives the step line of `axis` to `level`; a low-to-high edge is one step.
    fn step_pulse(&mut self, axis: Axis, level: Level) -> Result<(), DriverError>;

    fn set_enabled(&mut self, axis: Axis, enabled: bool) -> Result<(), DriverError>;
}

impl<T: MotorDriver + ?Sized> MotorDriver for Box<T> {
    #[inline]
    fn has_axis(&self, axis: Axis) -> bool {
        (**self).has_axis(axis)
    }

    #[inline]
    fn set_direction(&mut self, axis: Axis, direction: Direction) -> Result<(), DriverError> {
        (**self).set_direction(axis, direction)
    }

    #[inline]
    fn step_pulse(&mut self, axis: Axis, level: Level) -> Result<(), DriverError> {
        (**self).step_pulse(axis, level)
    }

    #[inline]
    fn set_enabled(&mut self, axis: Axis, enabled: bool) -> Result<(), DriverError> {
        (**self).set_enabled(axis, enabled)
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct AxisCounters {
    steps: u64,
    direction: Option<Direction>,
    enabled: bool,
    level_high: bool,
}

/// Driver without hardware. Counts steps and logs at trace level, which makes
/// it usable both for dry runs and for checking the actuator.
#[derive(Debug, Clone)]
pub struct DryRunDriver {
    row: u8,
    linear: Option<AxisCounters>,
    rotational: Option<AxisCounters>,
}

impl DryRunDriver {
    pub fn new(row: u8) -> Self {
        Self {
            row,
            linear: Some(AxisCounters::default()),
            rotational: Some(AxisCounters::default()),
        }
    }

    /// Driver for a rod whose rotation motor is not fitted.
    pub fn linear_only(row: u8) -> Self {
        Self {
            rotational: None,
            ..Self::new(row)
        }
    }

    fn counters(&self, axis: Axis) -> Option<&AxisCounters> {
        match axis {
            Axis::Linear => self.linear.as_ref(),
            Axis::Rotational => self.rotational.as_ref(),
        }
    }

    fn counters_mut(&mut self, axis: Axis) -> Result<&mut AxisCounters, DriverError> {
        let row = self.row;
        match axis {
            Axis::Linear => self.linear.as_mut(),
            Axis::Rotational => self.rotational.as_mut(),
        }
        .ok_or_else(|| DriverError(format!("row {}: no {:?} motor", row, axis)))
    }

    /// Rising edges seen on the step line of `axis`.
    pub fn steps(&self, axis: Axis) -> u64 {
        self.counters(axis).map_or(0, |c| c.steps)
    }

    pub fn direction(&self, axis: Axis) -> Option<Direction> {
        self.counters(axis).and_then(|c| c.direction)
    }

    pub fn is_enabled(&self, axis: Axis) -> bool {
        self.counters(axis).map_or(false, |c| c.enabled)
    }
}

impl MotorDriver for DryRunDriver {
    fn has_axis(&self, axis: Axis) -> bool {
        self.counters(axis).is_some()
    }

    fn set_direction(&mut self, axis: Axis, direction: Direction) -> Result<(), DriverError> {
        self.counters_mut(axis)?.direction = Some(direction);
        log::trace!(
            "row {}: {:?} direction {:?} (line {:?})",
            self.row,
            axis,
            direction,
            direction.level()
        );

        Ok(())
    }

    fn step_pulse(&mut self, axis: Axis, level: Level) -> Result<(), DriverError> {
        let c = self.counters_mut(axis)?;
        let high = level == Level::High;

        if high && !c.level_high {
            c.steps += 1;
        }
        c.level_high = high;

        Ok(())
    }

    fn set_enabled(&mut self, axis: Axis, enabled: bool) -> Result<(), DriverError> {
        self.counters_mut(axis)?.enabled = enabled;
        log::debug!("row {}: {:?} motor enabled = {}", self.row, axis, enabled);

        Ok(())
    }
}
