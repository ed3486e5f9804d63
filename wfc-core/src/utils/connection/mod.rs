//! Module Exports
//!
//! - `protocol`: decodes inbound datagrams into validated commands.
//! - `receiver`: owns the UDP socket and drives the control loop.

pub mod protocol;
pub mod receiver;
