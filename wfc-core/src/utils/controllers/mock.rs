//! Recording actuator backend.
//!
//! `RecordingDriver` stands in for hardware in tests and dry runs. Every call
//! is appended to a log shared between clones, so a test can hand one clone
//! to the [`MotionMapper`](super::MotionMapper) and inspect the other after
//! the mapper has been dropped. The driver also checks the H-bridge rules on
//! every write and records any breach as a [`Violation`].

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{ActuatorDriver, ActuatorFault, Direction, Motor};

/// One call received by the driver.
#[derive(Debug, Clone, PartialEq)]
pub enum DriverCall {
    Direction(Motor, Direction),
    Duty(Motor, f32),
    Servo(f32),
    Release,
}

/// A write that would have been unsafe on a real H-bridge.
#[derive(Debug, Clone, PartialEq)]
pub enum Violation {
    /// Direction lines switched while the enable duty was non-zero.
    DirectionChangedUnderLoad {
        motor: Motor,
        from: Direction,
        to: Direction,
        duty: f32,
    },
    /// Non-zero duty applied with both direction lines low.
    DutyWithoutDirection { motor: Motor, duty: f32 },
}

#[derive(Debug, Default)]
struct Log {
    calls: Vec<DriverCall>,
    direction: [Direction; 2],
    duty: [f32; 2],
    servo: Option<f32>,
    violations: Vec<Violation>,
    fail_next: Option<String>,
}

impl Log {
    /// Record `call`, then fail it if a failure was armed.
    fn record(
        &mut self,
        call: DriverCall,
    ) -> Result<(), ActuatorFault> {
        self.calls.push(call);
        match self.fail_next.take() {
            Some(message) => Err(ActuatorFault(message)),
            None => Ok(()),
        }
    }
}

/// Actuator driver that records calls instead of touching hardware.
#[derive(Debug, Clone, Default)]
pub struct RecordingDriver {
    log: Arc<Mutex<Log>>,
}

impl RecordingDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Log> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every call received so far, oldest first.
    pub fn calls(&self) -> Vec<DriverCall> {
        self.lock().calls.clone()
    }

    /// Forget recorded calls and violations; channel state is kept.
    pub fn clear(&self) {
        let mut log = self.lock();
        log.calls.clear();
        log.violations.clear();
    }

    /// Current `(direction, duty)` of one motor.
    pub fn state(
        &self,
        motor: Motor,
    ) -> (Direction, f32) {
        let log = self.lock();
        (log.direction[motor.index()], log.duty[motor.index()])
    }

    /// Current `(in1, in2)` line levels of one motor.
    pub fn lines(
        &self,
        motor: Motor,
    ) -> (bool, bool) {
        self.lock().direction[motor.index()].lines()
    }

    pub fn servo(&self) -> Option<f32> {
        self.lock().servo
    }

    pub fn violations(&self) -> Vec<Violation> {
        self.lock().violations.clone()
    }

    /// Make the next write fail with `message`.
    pub fn fail_next_write(
        &self,
        message: &str,
    ) {
        self.lock().fail_next = Some(message.to_string());
    }
}

impl ActuatorDriver for RecordingDriver {
    fn set_direction(
        &mut self,
        motor: Motor,
        direction: Direction,
    ) -> Result<(), ActuatorFault> {
        let mut log = self.lock();
        log.record(DriverCall::Direction(motor, direction))?;

        let i = motor.index();
        let from = log.direction[i];
        let duty = log.duty[i];
        if from != direction && duty != 0.0 {
            log.violations.push(Violation::DirectionChangedUnderLoad {
                motor,
                from,
                to: direction,
                duty,
            });
        }
        log.direction[i] = direction;
        Ok(())
    }

    fn set_duty(
        &mut self,
        motor: Motor,
        duty: f32,
    ) -> Result<(), ActuatorFault> {
        let mut log = self.lock();
        log.record(DriverCall::Duty(motor, duty))?;

        let i = motor.index();
        if duty != 0.0 && log.direction[i] == Direction::Stop {
            log.violations
                .push(Violation::DutyWithoutDirection { motor, duty });
        }
        log.duty[i] = duty;
        Ok(())
    }

    fn set_servo(
        &mut self,
        angle: f32,
    ) -> Result<(), ActuatorFault> {
        let mut log = self.lock();
        log.record(DriverCall::Servo(angle))?;
        log.servo = Some(angle);
        Ok(())
    }

    fn release(&mut self) -> Result<(), ActuatorFault> {
        self.lock().record(DriverCall::Release)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_direction_change_under_load() {
        let mut driver = RecordingDriver::new();
        driver.set_direction(Motor::Left, Direction::Forward).unwrap();
        driver.set_duty(Motor::Left, 0.4).unwrap();
        driver.set_direction(Motor::Left, Direction::Reverse).unwrap();

        assert_eq!(
            driver.violations(),
            vec![Violation::DirectionChangedUnderLoad {
                motor: Motor::Left,
                from: Direction::Forward,
                to: Direction::Reverse,
                duty: 0.4,
            }]
        );
    }

    #[test]
    fn flags_duty_without_direction() {
        let mut driver = RecordingDriver::new();
        driver.set_duty(Motor::Right, 0.2).unwrap();
        assert_eq!(
            driver.violations(),
            vec![Violation::DutyWithoutDirection {
                motor: Motor::Right,
                duty: 0.2
            }]
        );
    }

    #[test]
    fn clones_share_one_log() {
        let mut driver = RecordingDriver::new();
        let observer = driver.clone();
        driver.set_servo(0.3).unwrap();
        assert_eq!(observer.calls(), vec![DriverCall::Servo(0.3)]);
        assert_eq!(observer.servo(), Some(0.3));
    }

    #[test]
    fn armed_failure_leaves_state_untouched() {
        let mut driver = RecordingDriver::new();
        driver.fail_next_write("i2c nack");
        assert!(driver.set_servo(0.3).is_err());
        assert_eq!(driver.servo(), None);
        assert!(driver.set_servo(0.3).is_ok());
    }
}
