//! Utility re-exports for the WiFi car controller.
//!
//! - `config`: immutable controller configuration
//! - `connection`: wire protocol codec and the UDP receiver loop
//! - `controllers`: actuator driver interface, motion mapper and backends
//! - `diagnostics`: fire-and-forget event reporting
//! - `math`: joystick mixing and servo pulse mapping
//! - `safety`: link-loss watchdog

pub mod config;
pub mod connection;
pub mod controllers;
pub mod diagnostics;
pub mod math;
pub mod safety;

pub use config::ControllerConfig;
pub use connection::protocol::{Codec, Command, DecodeError, Malformed, WireFormat};
pub use connection::receiver::{BindError, ControlLoop, UdpReceiver};
pub use controllers::{ActuatorDriver, ActuatorFault, Direction, Motor, MotionMapper};
pub use diagnostics::{DiagnosticEvent, Diagnostics, TracingDiagnostics};
pub use safety::watchdog::{LinkStatus, LinkWatchdog, Transition};
