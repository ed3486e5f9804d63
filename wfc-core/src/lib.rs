//! Core command pipeline and actuator drivers for the WiFi car.
//!
//! Datagrams from the transmitter are decoded into [`utils::Command`]s, mapped
//! onto two H-bridge motor channels and a steering servo, and guarded by a
//! link watchdog that stops the car when the transmitter goes quiet.
//!
//! The binary that wires this to real hardware lives in `wfc-app/rc-server`.

pub mod utils;
