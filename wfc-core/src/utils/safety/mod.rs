//! Safety mechanisms that keep the car in a known state when the link drops.

pub mod watchdog;
