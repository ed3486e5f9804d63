//! Backend that only logs, for running the server off the car.

use wfc_core::utils::{ActuatorDriver, ActuatorFault, Direction, Motor};

#[derive(Debug, Default)]
pub struct TracingDriver;

impl ActuatorDriver for TracingDriver {
    fn set_direction(
        &mut self,
        motor: Motor,
        direction: Direction,
    ) -> Result<(), ActuatorFault> {
        tracing::info!(?motor, ?direction, "set direction");
        Ok(())
    }

    fn set_duty(
        &mut self,
        motor: Motor,
        duty: f32,
    ) -> Result<(), ActuatorFault> {
        tracing::info!(?motor, duty, "set duty");
        Ok(())
    }

    fn set_servo(
        &mut self,
        angle: f32,
    ) -> Result<(), ActuatorFault> {
        tracing::info!(angle, "set servo");
        Ok(())
    }

    fn release(&mut self) -> Result<(), ActuatorFault> {
        tracing::info!("released");
        Ok(())
    }
}
