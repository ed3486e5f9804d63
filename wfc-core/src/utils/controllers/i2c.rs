//! PCA9685 actuator backend.
//!
//! Drives both H-bridge channels and the steering servo from a single PCA9685
//! PWM expander on a shared I2C bus, the way DC motor HATs wire it: each motor
//! uses one channel for the enable PWM and two channels as direction lines.
//! Direction lines are driven fully on or fully off.

use embedded_hal::i2c::I2c;
use pwm_pca9685::{Address as PwmAddress, Channel, Pca9685};

use super::{ActuatorDriver, ActuatorFault, Direction, Motor};
use crate::utils::math::mixing::ServoRange;

/// Highest on/off counter value of a PCA9685 channel.
const MAX_DUTY: u16 = 4095;

/// Internal oscillator frequency of the PCA9685.
const OSCILLATOR_HZ: f32 = 25_000_000.0;

const CHANNELS: [Channel; 16] = [
    Channel::C0,
    Channel::C1,
    Channel::C2,
    Channel::C3,
    Channel::C4,
    Channel::C5,
    Channel::C6,
    Channel::C7,
    Channel::C8,
    Channel::C9,
    Channel::C10,
    Channel::C11,
    Channel::C12,
    Channel::C13,
    Channel::C14,
    Channel::C15,
];

/// PCA9685 channel numbers of one H-bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeChannels {
    pub pwm: u8,
    pub in1: u8,
    pub in2: u8,
}

/// Wiring and timing of the PCA9685 backend.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pca9685Config {
    /// 7-bit I2C address.
    pub address: u8,
    /// Output frequency shared by every channel. Servos want ~50 Hz.
    pub pwm_frequency_hz: f32,
    pub left: BridgeChannels,
    pub right: BridgeChannels,
    pub servo: u8,
    pub servo_range: ServoRange,
}

impl Default for Pca9685Config {
    fn default() -> Self {
        Self {
            address: 0x60,
            pwm_frequency_hz: 50.0,
            left: BridgeChannels {
                pwm: 8,
                in1: 10,
                in2: 9,
            },
            right: BridgeChannels {
                pwm: 13,
                in1: 11,
                in2: 12,
            },
            servo: 0,
            servo_range: ServoRange::default(),
        }
    }
}

impl Pca9685Config {
    /// Prescale register value for the configured frequency.
    pub fn prescale(&self) -> u8 {
        let value = (OSCILLATOR_HZ / (4096.0 * self.pwm_frequency_hz)).round() - 1.0;
        value.clamp(3.0, 255.0) as u8
    }

    /// Counter ticks that give a pulse of `pulse_us` at the configured frequency.
    pub fn pulse_ticks(
        &self,
        pulse_us: f32,
    ) -> u16 {
        let ticks = pulse_us * self.pwm_frequency_hz * 4096.0 / 1_000_000.0;
        (ticks as u16).min(MAX_DUTY)
    }
}

fn channel(number: u8) -> Result<Channel, ActuatorFault> {
    CHANNELS
        .get(number as usize)
        .copied()
        .ok_or_else(|| format!("PCA9685 has no channel {}", number).into())
}

#[derive(Debug, Clone, Copy)]
struct Bridge {
    pwm: Channel,
    in1: Channel,
    in2: Channel,
}

impl Bridge {
    fn new(channels: BridgeChannels) -> Result<Self, ActuatorFault> {
        Ok(Self {
            pwm: channel(channels.pwm)?,
            in1: channel(channels.in1)?,
            in2: channel(channels.in2)?,
        })
    }
}

/// Motor and servo driver on top of a PCA9685.
pub struct Pca9685Driver<I2C> {
    pwm: Pca9685<I2C>,
    bridges: [Bridge; 2],
    servo: Channel,
    config: Pca9685Config,
}

impl<I2C, E> Pca9685Driver<I2C>
where
    I2C: I2c<Error = E>,
    E: core::fmt::Debug,
{
    /// Wake the chip and program its output frequency.
    pub fn new(
        i2c: I2C,
        config: Pca9685Config,
    ) -> Result<Self, ActuatorFault> {
        let bridges = [Bridge::new(config.left)?, Bridge::new(config.right)?];
        let servo = channel(config.servo)?;

        let mut pwm = Pca9685::new(i2c, PwmAddress::from(config.address))?;
        pwm.enable()?;
        pwm.set_prescale(config.prescale())?;
        tracing::info!(
            address = config.address,
            prescale = config.prescale(),
            "PCA9685 enabled"
        );

        Ok(Self {
            pwm,
            bridges,
            servo,
            config,
        })
    }

    /// Give the I2C bus back.
    pub fn destroy(self) -> I2C {
        self.pwm.destroy()
    }

    fn set_line(
        &mut self,
        channel: Channel,
        high: bool,
    ) -> Result<(), ActuatorFault> {
        let off = if high { MAX_DUTY } else { 0 };
        self.pwm.set_channel_on_off(channel, 0, off)?;
        Ok(())
    }
}

impl<I2C, E> ActuatorDriver for Pca9685Driver<I2C>
where
    I2C: I2c<Error = E>,
    E: core::fmt::Debug,
{
    fn set_direction(
        &mut self,
        motor: Motor,
        direction: Direction,
    ) -> Result<(), ActuatorFault> {
        let bridge = self.bridges[motor.index()];
        let (in1, in2) = direction.lines();

        // Release before assert so both lines are never high together.
        if in1 {
            self.set_line(bridge.in2, in2)?;
            self.set_line(bridge.in1, in1)?;
        } else {
            self.set_line(bridge.in1, in1)?;
            self.set_line(bridge.in2, in2)?;
        }
        Ok(())
    }

    fn set_duty(
        &mut self,
        motor: Motor,
        duty: f32,
    ) -> Result<(), ActuatorFault> {
        let bridge = self.bridges[motor.index()];
        let off = (duty.clamp(0.0, 1.0) * MAX_DUTY as f32) as u16;
        self.pwm.set_channel_on_off(bridge.pwm, 0, off)?;
        Ok(())
    }

    fn set_servo(
        &mut self,
        angle: f32,
    ) -> Result<(), ActuatorFault> {
        let pulse_us = self.config.servo_range.pulse_us(angle);
        let off = self.config.pulse_ticks(pulse_us);
        self.pwm.set_channel_on_off(self.servo, 0, off)?;
        Ok(())
    }

    /// Stop the servo pulse train and put the chip to sleep.
    fn release(&mut self) -> Result<(), ActuatorFault> {
        self.pwm.set_channel_on_off(self.servo, 0, 0)?;
        self.pwm.disable()?;
        tracing::info!("PCA9685 disabled");
        Ok(())
    }
}
