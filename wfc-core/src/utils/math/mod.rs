//! Math utilities for the WiFi car.
//!
//! Joystick-to-tank-drive mixing and servo pulse-width mapping.

pub mod mixing;
