//! Motion mapping from validated commands to driver writes.
//!
//! The mapper owns the actuator driver and caches what it last wrote to each
//! channel. That cache lets it sequence writes so a direction line is never
//! switched while the motor's enable duty is non-zero: a reversal is always
//! `duty -> 0`, `direction -> new`, `duty -> new`.

use crate::utils::connection::protocol::Command;

use super::{ActuatorDriver, ActuatorFault, Direction, Motor};

/// Servo angle used when the failsafe is configured to centre the servo.
pub const SERVO_CENTRE: f32 = 0.5;

/// Last state written to one motor channel.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MotorChannel {
    pub direction: Direction,
    pub duty: f32,
}

/// Translates commands into ordered actuator writes.
///
/// Dropping the mapper stops both motors and releases the driver, so every
/// exit path passes through the safe state. Prefer [`MotionMapper::shutdown`]
/// on the normal path to observe failures.
pub struct MotionMapper<D: ActuatorDriver> {
    driver: D,
    channels: [MotorChannel; 2],
    servo: Option<f32>,
    center_servo_on_failsafe: bool,
    released: bool,
}

impl<D: ActuatorDriver> MotionMapper<D> {
    /// Take ownership of `driver` and force it into the safe state so the
    /// cached channel state matches the hardware.
    pub fn new(driver: D) -> Result<Self, ActuatorFault> {
        let mut mapper = Self {
            driver,
            channels: [MotorChannel::default(); 2],
            servo: None,
            center_servo_on_failsafe: false,
            released: false,
        };
        mapper.stop_motors()?;
        Ok(mapper)
    }

    /// Also move the servo to its centre whenever the safe state is applied.
    pub fn center_servo_on_failsafe(
        mut self,
        enabled: bool,
    ) -> Self {
        self.center_servo_on_failsafe = enabled;
        self
    }

    /// Apply a validated command.
    ///
    /// A servo angle of `None` keeps the servo where it is.
    pub fn apply(
        &mut self,
        command: &Command,
    ) -> Result<(), ActuatorFault> {
        self.drive(Motor::Left, command.left_speed())?;
        self.drive(Motor::Right, command.right_speed())?;

        if let Some(angle) = command.servo_angle() {
            if self.servo != Some(angle) {
                self.driver.set_servo(angle)?;
                self.servo = Some(angle);
            }
        }

        tracing::trace!(
            left = ?self.channels[0],
            right = ?self.channels[1],
            servo = ?self.servo,
            "command applied"
        );
        Ok(())
    }

    /// Stop both motors with both direction lines low.
    ///
    /// Every write is issued even when the cache already says stopped, so
    /// repeated calls leave the hardware in the same state. A fault on one
    /// write does not skip the others; the first fault is returned.
    pub fn apply_safe_state(&mut self) -> Result<(), ActuatorFault> {
        let stopped = self.stop_motors();
        if !self.center_servo_on_failsafe {
            return stopped;
        }
        let centred = self.driver.set_servo(SERVO_CENTRE);
        if centred.is_ok() {
            self.servo = Some(SERVO_CENTRE);
        }
        stopped.and(centred)
    }

    pub fn channel(
        &self,
        motor: Motor,
    ) -> MotorChannel {
        self.channels[motor.index()]
    }

    /// Last angle written to the servo, `None` until the first servo command.
    pub fn servo_angle(&self) -> Option<f32> {
        self.servo
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Stop the motors and release the driver, reporting any fault.
    ///
    /// The release is attempted even if stopping failed.
    pub fn shutdown(mut self) -> Result<(), ActuatorFault> {
        let stopped = self.apply_safe_state();
        let released = self.driver.release();
        self.released = true;
        stopped.and(released)
    }

    /// Zero duty then lower both lines on every motor, whatever fails.
    fn stop_motors(&mut self) -> Result<(), ActuatorFault> {
        let mut outcome = Ok(());
        for motor in Motor::ALL {
            let channel = &mut self.channels[motor.index()];
            match self.driver.set_duty(motor, 0.0) {
                Ok(()) => channel.duty = 0.0,
                Err(fault) => outcome = outcome.and(Err(fault)),
            }
            match self.driver.set_direction(motor, Direction::Stop) {
                Ok(()) => channel.direction = Direction::Stop,
                Err(fault) => outcome = outcome.and(Err(fault)),
            }
        }
        outcome
    }

    fn drive(
        &mut self,
        motor: Motor,
        speed: f32,
    ) -> Result<(), ActuatorFault> {
        let (direction, duty) = Direction::split(speed);
        let channel = &mut self.channels[motor.index()];

        if direction != channel.direction {
            if channel.duty != 0.0 {
                self.driver.set_duty(motor, 0.0)?;
                channel.duty = 0.0;
            }
            self.driver.set_direction(motor, direction)?;
            channel.direction = direction;
        }

        if duty != channel.duty {
            self.driver.set_duty(motor, duty)?;
            channel.duty = duty;
        }
        Ok(())
    }
}

impl<D: ActuatorDriver> Drop for MotionMapper<D> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(fault) = self.stop_motors() {
            tracing::error!(%fault, "failed to stop motors while releasing actuators");
        }
        if let Err(fault) = self.driver.release() {
            tracing::error!(%fault, "failed to release actuator driver");
        }
    }
}
