//! Controller configuration.
//!
//! Built once at startup (the binary fills it from the command line) and
//! never mutated afterwards.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::utils::connection::protocol::{Codec, WireFormat};
use crate::utils::math::mixing::JoystickMixer;

/// Port the transmitter sends to.
pub const DEFAULT_PORT: u16 = 5005;

/// How long the car keeps its last command without hearing from the
/// transmitter. Long enough to ride out a few lost 20 Hz packets, short
/// enough that an unattended car stops within a body length. Tune per
/// vehicle with `--failsafe-ms`.
pub const DEFAULT_FAILSAFE_TIMEOUT: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControllerConfig {
    pub bind: SocketAddr,
    pub failsafe_timeout: Duration,
    pub wire_format: WireFormat,
    pub joystick: JoystickMixer,
    /// Drop commands whose sequence number is not newer than the last one.
    pub reject_stale: bool,
    /// Centre the servo at startup and whenever the failsafe stops the motors.
    pub center_servo_on_failsafe: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT),
            failsafe_timeout: DEFAULT_FAILSAFE_TIMEOUT,
            wire_format: WireFormat::Binary,
            joystick: JoystickMixer::default(),
            reject_stale: false,
            center_servo_on_failsafe: false,
        }
    }
}

impl ControllerConfig {
    pub fn codec(&self) -> Codec {
        Codec::new(self.wire_format, self.joystick)
    }
}
