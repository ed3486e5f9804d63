//! L293D backend on Raspberry Pi GPIO.
//!
//! Enable pins are on the two hardware PWM channels, direction lines on plain
//! GPIO outputs, and the steering servo on a software PWM pin.

use std::fmt::Display;
use std::time::Duration;

use rppal::gpio::{Gpio, OutputPin};
use rppal::pwm::{Channel, Polarity, Pwm};
use wfc_core::utils::math::mixing::ServoRange;
use wfc_core::utils::{ActuatorDriver, ActuatorFault, Direction, Motor};

/// Servo frame period (50 Hz).
const SERVO_PERIOD: Duration = Duration::from_millis(20);

/// BCM pin numbers of one H-bridge's direction lines.
#[derive(Debug, Clone, Copy)]
pub struct DirectionPins {
    pub in1: u8,
    pub in2: u8,
}

#[derive(Debug, Clone, Copy)]
pub struct GpioConfig {
    pub pwm_frequency_hz: f64,
    /// Driven by PWM0 (GPIO12).
    pub left: DirectionPins,
    /// Driven by PWM1 (GPIO13).
    pub right: DirectionPins,
    pub servo_pin: u8,
    pub servo_range: ServoRange,
}

impl Default for GpioConfig {
    fn default() -> Self {
        Self {
            pwm_frequency_hz: 20_000.0,
            left: DirectionPins { in1: 5, in2: 6 },
            right: DirectionPins { in1: 23, in2: 24 },
            servo_pin: 18,
            servo_range: ServoRange::default(),
        }
    }
}

fn fault(error: impl Display) -> ActuatorFault {
    ActuatorFault(error.to_string())
}

struct Bridge {
    enable: Pwm,
    in1: OutputPin,
    in2: OutputPin,
}

pub struct L293dDriver {
    bridges: [Bridge; 2],
    servo: OutputPin,
    servo_range: ServoRange,
}

impl L293dDriver {
    /// Claim the pins with every output low and both PWM channels at 0 %.
    pub fn new(config: GpioConfig) -> Result<Self, ActuatorFault> {
        let gpio = Gpio::new().map_err(fault)?;

        let bridge = |channel: Channel, pins: DirectionPins| -> Result<Bridge, ActuatorFault> {
            let enable = Pwm::with_frequency(
                channel,
                config.pwm_frequency_hz,
                0.0,
                Polarity::Normal,
                true,
            )
            .map_err(fault)?;
            Ok(Bridge {
                enable,
                in1: gpio.get(pins.in1).map_err(fault)?.into_output_low(),
                in2: gpio.get(pins.in2).map_err(fault)?.into_output_low(),
            })
        };
        let bridges = [
            bridge(Channel::Pwm0, config.left)?,
            bridge(Channel::Pwm1, config.right)?,
        ];

        let servo = gpio.get(config.servo_pin).map_err(fault)?.into_output_low();

        tracing::info!(
            pwm_hz = config.pwm_frequency_hz,
            servo_pin = config.servo_pin,
            "L293D backend ready"
        );

        Ok(Self {
            bridges,
            servo,
            servo_range: config.servo_range,
        })
    }

    fn bridge(
        &mut self,
        motor: Motor,
    ) -> &mut Bridge {
        match motor {
            Motor::Left => &mut self.bridges[0],
            Motor::Right => &mut self.bridges[1],
        }
    }
}

impl ActuatorDriver for L293dDriver {
    fn set_direction(
        &mut self,
        motor: Motor,
        direction: Direction,
    ) -> Result<(), ActuatorFault> {
        let bridge = self.bridge(motor);
        // Lower first so in1 and in2 are never high together.
        match direction {
            Direction::Forward => {
                bridge.in2.set_low();
                bridge.in1.set_high();
            }
            Direction::Reverse => {
                bridge.in1.set_low();
                bridge.in2.set_high();
            }
            Direction::Stop => {
                bridge.in1.set_low();
                bridge.in2.set_low();
            }
        }
        Ok(())
    }

    fn set_duty(
        &mut self,
        motor: Motor,
        duty: f32,
    ) -> Result<(), ActuatorFault> {
        self.bridge(motor)
            .enable
            .set_duty_cycle(f64::from(duty.clamp(0.0, 1.0)))
            .map_err(fault)
    }

    fn set_servo(
        &mut self,
        angle: f32,
    ) -> Result<(), ActuatorFault> {
        let pulse = Duration::from_micros(self.servo_range.pulse_us(angle) as u64);
        self.servo.set_pwm(SERVO_PERIOD, pulse).map_err(fault)
    }

    /// Every output is released even if an earlier one fails; the first
    /// failure is returned.
    fn release(&mut self) -> Result<(), ActuatorFault> {
        let mut outcome = self.servo.clear_pwm().map_err(fault);
        self.servo.set_low();
        for bridge in &mut self.bridges {
            bridge.in1.set_low();
            bridge.in2.set_low();
            outcome = outcome
                .and(bridge.enable.set_duty_cycle(0.0).map_err(fault))
                .and(bridge.enable.disable().map_err(fault));
        }
        tracing::info!("L293D backend released");
        outcome
    }
}
