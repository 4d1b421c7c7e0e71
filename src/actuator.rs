//! Per-row stepper control: sliding, rotating and the angled strike.

use std::thread;
use std::time::Duration;

use serde_derive::{Deserialize, Serialize};

use crate::config::RowConfig;
use crate::error::ActuatorError;
use crate::motor::{Axis, Direction, DriverError, Level, MotorDriver};

/// Guards the pulse count against `ceil` of a quotient that lands a hair above
/// an integer.
const PULSE_EPSILON: f32 = 1e-4;

/// Approach angles this close to 90° count as dead-on.
const DEAD_ON_TOLERANCE: f32 = 1e-3;

#[inline]
fn pulses_for(distance: f32, step: f32) -> u32 {
    ((distance.abs() / step) - PULSE_EPSILON).ceil().max(0.0) as u32
}

/// Current pose of one rod.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Row {
    pub index: u8,
    pub x: f32,
    pub players: u8,
    pub spacing: f32,
    /// 0 is the rod pulled all the way to the motor side
    pub linear_position: f32,
    /// 0° figures hang down facing the goal, ±90° lie flat
    pub angle: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MotorLimits {
    pub max_linear_travel: f32,
    pub min_angle: f32,
    pub max_angle: f32,
    pub step_size: f32,
    pub angle_step: f32,
    pub dwell: Duration,
    pub strike_angle: f32,
    pub strike_hold: Duration,
}

impl MotorLimits {
    pub fn from_config(row: &RowConfig) -> Self {
        let m = &row.motor;

        Self {
            max_linear_travel: row.max_linear_travel,
            min_angle: m.min_angle,
            max_angle: m.max_angle,
            step_size: m.step_size,
            angle_step: m.angle_step(),
            dwell: Duration::from_micros(m.dwell_us),
            strike_angle: m.strike_angle,
            strike_hold: Duration::from_millis(m.strike_hold_ms),
        }
    }
}

/// Share of the rotation pulses mirrored on the linear axis during a strike,
/// and the sense of that lateral follow-through.
///
/// Dead-on approaches get none, steep ones (≤ 45° or ≥ 135°) one linear step
/// per rotation step, anything in between `|dy / dx|` of it.
pub fn lateral_throttle(angle: f32, dx: f32, dy: f32) -> (f32, Direction) {
    let direction = if angle < 90.0 {
        Direction::Forward
    } else {
        Direction::Backward
    };

    if (angle - 90.0).abs() < DEAD_ON_TOLERANCE {
        return (0.0, direction);
    }

    if angle <= 45.0 || angle >= 135.0 || dx == 0.0 {
        return (1.0, direction);
    }

    ((dy / dx).abs().min(1.0), direction)
}

pub struct RowActuator<D> {
    row: Row,
    limits: MotorLimits,
    rest_position: f32,
    driver: D,
}

impl<D: MotorDriver> RowActuator<D> {
    pub fn new(config: &RowConfig, driver: D) -> Self {
        Self {
            row: Row {
                index: config.index,
                x: config.x,
                players: config.players,
                spacing: config.spacing,
                linear_position: 0.0,
                angle: 0.0,
            },
            limits: MotorLimits::from_config(config),
            rest_position: config.rest_position(),
            driver,
        }
    }

    #[inline]
    pub fn row(&self) -> &Row {
        &self.row
    }

    #[inline]
    pub fn limits(&self) -> &MotorLimits {
        &self.limits
    }

    #[inline]
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Powers the fitted motors.
    pub fn start(&mut self) -> Result<(), ActuatorError> {
        self.set_enabled(true)?;
        log::info!("row {}: motors enabled", self.row.index);

        Ok(())
    }

    /// Releases the fitted motors.
    pub fn stop(&mut self) -> Result<(), ActuatorError> {
        self.set_enabled(false)?;
        log::info!("row {}: motors released", self.row.index);

        Ok(())
    }

    pub fn move_to(&mut self, target: f32) -> Result<u32, ActuatorError> {
        let row = self.row.index;

        if target == self.row.linear_position {
            log::debug!("row {}: already at linear position {}", row, target);
            return Ok(0);
        }

        if !(0.0..=self.limits.max_linear_travel).contains(&target) {
            return self.reject(ActuatorError::LinearOutOfRange {
                row,
                target,
                max: self.limits.max_linear_travel,
            });
        }

        self.require(Axis::Linear)?;

        let pulses = self.step_to(Axis::Linear, target)?;
        log::debug!("row {}: moved to {} in {} pulses", row, target, pulses);

        Ok(pulses)
    }

    pub fn rotate_to(&mut self, target: f32) -> Result<u32, ActuatorError> {
        let row = self.row.index;

        if target == self.row.angle {
            log::debug!("row {}: already at angle {}", row, target);
            return Ok(0);
        }

        if !(self.limits.min_angle..=self.limits.max_angle).contains(&target) {
            return self.reject(ActuatorError::AngleOutOfRange {
                row,
                target,
                min: self.limits.min_angle,
                max: self.limits.max_angle,
            });
        }

        self.require(Axis::Rotational)?;

        let pulses = self.step_to(Axis::Rotational, target)?;
        log::debug!("row {}: rotated to {}° in {} pulses", row, target, pulses);

        Ok(pulses)
    }

    /// Strike-and-recoil for a ball approaching at `angle` degrees, with
    /// `(dx, dy)` its per-frame displacement.
    ///
    /// The rod always swings to the strike angle at full rate and comes back.
    /// Only the lateral follow-through is throttled; if it would leave the
    /// travel range it is dropped and the strike goes straight.
    pub fn kick_angle(&mut self, angle: f32, dx: f32, dy: f32) -> Result<u32, ActuatorError> {
        let row = self.row.index;

        if !(0.0..=180.0).contains(&angle) {
            return self.reject(ActuatorError::AngleOutOfRange {
                row,
                target: angle,
                min: 0.0,
                max: 180.0,
            });
        }

        self.require(Axis::Rotational)?;

        let origin_angle = self.row.angle;
        let origin_position = self.row.linear_position;
        let strike_angle = self.limits.strike_angle;

        let rotation = pulses_for(strike_angle - origin_angle, self.limits.angle_step);
        if strike_angle <= origin_angle || rotation == 0 {
            log::warn!("row {}: rotor at {}°, no room to strike", row, origin_angle);
            return Ok(0);
        }

        let (throttle, lateral) = lateral_throttle(angle, dx, dy);
        let mut linear = (rotation as f32 * throttle).floor() as u32;
        let mut lateral_target =
            origin_position + lateral.sign() * self.limits.step_size * linear as f32;

        if linear > 0
            && (!self.driver.has_axis(Axis::Linear)
                || !(0.0..=self.limits.max_linear_travel).contains(&lateral_target))
        {
            log::warn!(
                "row {}: lateral follow-through to {} unavailable, striking straight",
                row,
                lateral_target
            );
            linear = 0;
            lateral_target = origin_position;
        }

        log::info!(
            "row {}: strike at {:.1}° ({} rotation, {} {:?} linear pulses)",
            row,
            angle,
            rotation,
            linear,
            lateral
        );

        self.sweep(
            rotation,
            linear,
            Direction::Forward,
            lateral,
            strike_angle,
            lateral_target,
        )?;

        if !self.limits.strike_hold.is_zero() {
            thread::sleep(self.limits.strike_hold);
        }

        self.sweep(
            rotation,
            linear,
            Direction::Backward,
            lateral.reversed(),
            origin_angle,
            origin_position,
        )?;

        Ok(2 * (rotation + linear))
    }

    /// Back to the defensive rest position.
    #[inline]
    pub fn center(&mut self) -> Result<u32, ActuatorError> {
        self.move_to(self.rest_position)
    }

    fn reject(&self, err: ActuatorError) -> Result<u32, ActuatorError> {
        log::error!("{}", err);
        Err(err)
    }

    fn require(&self, axis: Axis) -> Result<(), ActuatorError> {
        if self.driver.has_axis(axis) {
            return Ok(());
        }

        let err = ActuatorError::MissingAxis {
            row: self.row.index,
            axis,
        };
        log::error!("{}", err);

        Err(err)
    }

    fn driver_error(&self, err: DriverError) -> ActuatorError {
        let err = ActuatorError::Driver {
            row: self.row.index,
            reason: err.0,
        };
        log::error!("{}", err);

        err
    }

    fn set_enabled(&mut self, enabled: bool) -> Result<(), ActuatorError> {
        for axis in [Axis::Linear, Axis::Rotational] {
            if self.driver.has_axis(axis) {
                if let Err(e) = self.driver.set_enabled(axis, enabled) {
                    return Err(self.driver_error(e));
                }
            }
        }

        Ok(())
    }

    fn set_direction(&mut self, axis: Axis, direction: Direction) -> Result<(), ActuatorError> {
        match self.driver.set_direction(axis, direction) {
            Ok(()) => Ok(()),
            Err(e) => Err(self.driver_error(e)),
        }
    }

    /// One step on every axis in `axes`: raise, dwell, lower, dwell.
    fn pulse(&mut self, axes: &[Axis]) -> Result<(), ActuatorError> {
        for level in [Level::High, Level::Low] {
            for &axis in axes {
                if let Err(e) = self.driver.step_pulse(axis, level) {
                    return Err(self.driver_error(e));
                }
            }

            if !self.limits.dwell.is_zero() {
                thread::sleep(self.limits.dwell);
            }
        }

        Ok(())
    }

    #[inline]
    fn step_len(&self, axis: Axis) -> f32 {
        match axis {
            Axis::Linear => self.limits.step_size,
            Axis::Rotational => self.limits.angle_step,
        }
    }

    #[inline]
    fn coordinate(&mut self, axis: Axis) -> &mut f32 {
        match axis {
            Axis::Linear => &mut self.row.linear_position,
            Axis::Rotational => &mut self.row.angle,
        }
    }

    /// Walks `axis` to `target` one pulse at a time. The pose follows every
    /// pulse, so a driver fault leaves it where the rod actually stopped.
    fn step_to(&mut self, axis: Axis, target: f32) -> Result<u32, ActuatorError> {
        let start = *self.coordinate(axis);
        let step = self.step_len(axis);
        let direction = Direction::of(target - start);
        let pulses = pulses_for(target - start, step);

        self.set_direction(axis, direction)?;

        for n in 1..=pulses {
            self.pulse(&[axis])?;

            *self.coordinate(axis) = if n == pulses {
                target
            } else {
                start + direction.sign() * step * n as f32
            };
        }

        Ok(pulses)
    }

    /// Rotates by `rotation` pulses while spreading `linear` pulses evenly
    /// over them. `linear` never exceeds `rotation`.
    fn sweep(
        &mut self,
        rotation: u32,
        linear: u32,
        spin: Direction,
        slide: Direction,
        angle_to: f32,
        position_to: f32,
    ) -> Result<(), ActuatorError> {
        let angle_from = self.row.angle;
        let position_from = self.row.linear_position;

        self.set_direction(Axis::Rotational, spin)?;
        if linear > 0 {
            self.set_direction(Axis::Linear, slide)?;
        }

        let mut slid = 0u32;
        for n in 1..=rotation {
            let due = (n as u64 * linear as u64 / rotation as u64) as u32;

            if due > slid {
                self.pulse(&[Axis::Rotational, Axis::Linear])?;
                slid += 1;
            } else {
                self.pulse(&[Axis::Rotational])?;
            }

            self.row.angle = if n == rotation {
                angle_to
            } else {
                angle_from + spin.sign() * self.limits.angle_step * n as f32
            };

            self.row.linear_position = if slid == linear {
                position_to
            } else {
                position_from + slide.sign() * self.limits.step_size * slid as f32
            };
        }

        Ok(())
    }
}
