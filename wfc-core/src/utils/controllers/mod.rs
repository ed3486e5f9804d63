//! Module Exports
//!
//! This file exports the actuator side of the control system.
//!
//! - `i2c`: PCA9685-based motor/servo backend over an `embedded_hal` I2C bus.
//! - `mock`: recording backend used by tests and bench runs.
//! - `motion`: maps validated commands onto driver writes in a safe order.

pub mod i2c;
pub mod mock;
pub mod motion;

pub use motion::MotionMapper;

/// Drive motor on one side of the tank chassis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Motor {
    Left,
    Right,
}

impl Motor {
    pub const ALL: [Motor; 2] = [Motor::Left, Motor::Right];

    pub(crate) fn index(self) -> usize {
        match self {
            Motor::Left => 0,
            Motor::Right => 1,
        }
    }
}

/// H-bridge direction line state.
///
/// `Stop` leaves both lines low so the motor coasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    Forward,
    Reverse,
    #[default]
    Stop,
}

impl Direction {
    /// `(in1, in2)` line levels for this direction.
    pub fn lines(self) -> (bool, bool) {
        match self {
            Direction::Forward => (true, false),
            Direction::Reverse => (false, true),
            Direction::Stop => (false, false),
        }
    }

    /// Split a signed speed into direction and duty magnitude.
    pub fn split(speed: f32) -> (Direction, f32) {
        if speed > 0.0 {
            (Direction::Forward, speed.min(1.0))
        } else if speed < 0.0 {
            (Direction::Reverse, (-speed).min(1.0))
        } else {
            (Direction::Stop, 0.0)
        }
    }
}

/// A hardware driver refused a write.
///
/// Faults are fatal: the caller must not retry the write that failed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("actuator fault: {0}")]
pub struct ActuatorFault(pub String);

impl From<&str> for ActuatorFault {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

impl From<String> for ActuatorFault {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl<E: core::fmt::Debug> From<pwm_pca9685::Error<E>> for ActuatorFault {
    fn from(error: pwm_pca9685::Error<E>) -> Self {
        Self(format!("PCA9685: {:?}", error))
    }
}

/// Capability to drive the car's two motor channels and its servo.
///
/// Implementations perform exactly the write they are asked for. Ordering
/// between direction and duty writes is the caller's job (see
/// [`MotionMapper`]); within `set_direction` an implementation must lower
/// the line being released before raising the other one.
pub trait ActuatorDriver {
    /// Set the H-bridge direction lines of one motor.
    fn set_direction(
        &mut self,
        motor: Motor,
        direction: Direction,
    ) -> Result<(), ActuatorFault>;

    /// Set the enable duty of one motor, `0.0..=1.0`.
    fn set_duty(
        &mut self,
        motor: Motor,
        duty: f32,
    ) -> Result<(), ActuatorFault>;

    /// Move the servo to a normalized angle, `0.0..=1.0`.
    fn set_servo(
        &mut self,
        angle: f32,
    ) -> Result<(), ActuatorFault>;

    /// Hand the hardware back once the motors are stopped.
    fn release(&mut self) -> Result<(), ActuatorFault> {
        Ok(())
    }
}
