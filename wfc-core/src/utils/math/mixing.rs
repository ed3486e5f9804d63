//! Tank-drive mixing for the legacy joystick transmitter.
//!
//! The Pico W transmitter reports two buttons and two raw 16-bit ADC axes.
//! `JoystickMixer` turns such a report into left/right drive speeds and a
//! servo angle, and `ServoRange` maps a normalized angle to a pulse width.
//!
//! # Example
//! ```rust
//! use wfc_core::utils::math::mixing::{JoystickMixer, JoystickReport};
//! let mixer = JoystickMixer::default();
//! let report = JoystickReport { b1: 1, b2: 1, x_raw: 32768, y_raw: 65535 };
//! let (left, right, servo) = mixer.mix(&report);
//! assert!(left > 0.0 && right > 0.0);
//! assert!((servo - 0.5).abs() < 0.01);
//! ```

/// Full scale of the transmitter's ADC readings.
pub const ADC_FULL_SCALE: f32 = 65535.0;

/// One joystick report as sent by the transmitter.
///
/// Buttons read `0` while pressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoystickReport {
    /// Turbo button.
    pub b1: u32,
    /// Brake button.
    pub b2: u32,
    pub x_raw: u32,
    pub y_raw: u32,
}

/// Stick shaping and speed limits for joystick mixing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JoystickMixer {
    /// Dead band around the stick centre, in unit space.
    pub deadzone: f32,
    /// Linear/cubic blend, 0 = linear.
    pub expo: f32,
    /// Top speed with the turbo button released.
    pub base_speed: f32,
    /// Top speed with the turbo button held.
    pub turbo_speed: f32,
}

impl Default for JoystickMixer {
    fn default() -> Self {
        Self {
            deadzone: 0.08,
            expo: 0.6,
            base_speed: 0.6,
            turbo_speed: 1.0,
        }
    }
}

impl JoystickMixer {
    /// Map a raw ADC reading onto `[-1, 1]`, centred at mid-scale.
    pub fn adc_to_unit(
        &self,
        raw: u32,
    ) -> f32 {
        let u = (raw as f32 / ADC_FULL_SCALE) * 2.0 - 1.0;
        if u.abs() < self.deadzone {
            0.0
        } else {
            u.clamp(-1.0, 1.0)
        }
    }

    /// Blend linear and cubic response for finer control near the centre.
    pub fn apply_expo(
        &self,
        u: f32,
    ) -> f32 {
        (1.0 - self.expo) * u + self.expo * u * u * u
    }

    /// Mix a report into `(left_speed, right_speed, servo_angle)`.
    ///
    /// Holding the brake button zeroes both sides; the servo follows the
    /// x axis either way.
    pub fn mix(
        &self,
        report: &JoystickReport,
    ) -> (f32, f32, f32) {
        let x = self.apply_expo(self.adc_to_unit(report.x_raw));
        let y = self.apply_expo(self.adc_to_unit(report.y_raw));

        let max_speed = if report.b1 == 0 {
            self.turbo_speed
        } else {
            self.base_speed
        };

        let (left, right) = if report.b2 == 0 {
            (0.0, 0.0)
        } else {
            (
                (y + x).clamp(-1.0, 1.0) * max_speed,
                (y - x).clamp(-1.0, 1.0) * max_speed,
            )
        };

        (left, right, (x + 1.0) / 2.0)
    }
}

/// Pulse-width limits of the steering servo, in microseconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServoRange {
    pub min_us: f32,
    pub max_us: f32,
}

impl Default for ServoRange {
    fn default() -> Self {
        Self {
            min_us: 500.0,
            max_us: 2500.0,
        }
    }
}

impl ServoRange {
    /// Pulse width for a normalized angle; the angle is clamped to `[0, 1]`.
    pub fn pulse_us(
        &self,
        angle: f32,
    ) -> f32 {
        self.min_us + angle.clamp(0.0, 1.0) * (self.max_us - self.min_us)
    }

    pub fn centre_us(&self) -> f32 {
        self.pulse_us(0.5)
    }
}
