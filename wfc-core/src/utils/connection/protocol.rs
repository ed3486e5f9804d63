//! Command protocol codec.
//!
//! One datagram carries one [`Command`]. The wire format is fixed at startup
//! through [`WireFormat`]:
//!
//! - `Binary`: 16 bytes little-endian, `f32 left, f32 right, f32 servo,
//!   u32 sequence`. A negative servo value means "hold last position".
//! - `Json`: `{"l": 0.5, "r": -0.5, "s": 0.75, "q": 7}` with `s` and `q`
//!   optional.
//! - `Joystick`: the legacy `b1,b2,x_raw,y_raw` ASCII report, mixed into tank
//!   drive speeds by [`JoystickMixer`].
//!
//! Out-of-range numbers are clamped, structurally broken payloads are
//! rejected with [`DecodeError::Malformed`].

use serde::{Deserialize, Serialize};

use crate::utils::math::mixing::{JoystickMixer, JoystickReport};

/// Size of the binary command layout.
pub const BINARY_COMMAND_LEN: usize = 16;

/// Largest datagram the receiver reads; anything longer is truncated and
/// then fails length or syntax validation.
pub const MAX_DATAGRAM_LEN: usize = 256;

/// Servo value used by binary transmitters to leave the servo where it is.
pub const SERVO_HOLD: f32 = -1.0;

/// A validated unit of control intent.
///
/// Every constructor clamps, so a `Command` always holds speeds in
/// `[-1, 1]` and a servo angle in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Command {
    left_speed: f32,
    right_speed: f32,
    servo_angle: Option<f32>,
    sequence: Option<u32>,
}

impl Command {
    /// Build a command, clamping every field into range.
    ///
    /// Non-finite speeds become `0.0` and a non-finite servo angle becomes
    /// "hold", so a stray NaN can only ever stop the car.
    pub fn new(
        left_speed: f32,
        right_speed: f32,
        servo_angle: Option<f32>,
        sequence: Option<u32>,
    ) -> Self {
        Self {
            left_speed: clamp_speed(left_speed),
            right_speed: clamp_speed(right_speed),
            servo_angle: servo_angle
                .filter(|a| a.is_finite())
                .map(|a| a.clamp(0.0, 1.0)),
            sequence,
        }
    }

    /// Both motors stopped, servo held.
    pub fn stop() -> Self {
        Self::new(0.0, 0.0, None, None)
    }

    pub fn left_speed(&self) -> f32 {
        self.left_speed
    }

    pub fn right_speed(&self) -> f32 {
        self.right_speed
    }

    pub fn servo_angle(&self) -> Option<f32> {
        self.servo_angle
    }

    pub fn sequence(&self) -> Option<u32> {
        self.sequence
    }
}

fn clamp_speed(value: f32) -> f32 {
    if value.is_finite() {
        value.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

/// Why a datagram was rejected.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Malformed {
    #[error("empty payload")]
    Empty,
    #[error("expected {expected} bytes, got {actual}")]
    WrongLength { expected: usize, actual: usize },
    #[error("field `{0}` is not a finite number")]
    NonFinite(&'static str),
    #[error("payload is not valid UTF-8")]
    NotUtf8,
    #[error("expected at least {expected} fields, got {actual}")]
    MissingFields { expected: usize, actual: usize },
    #[error("field `{0}` is not numeric")]
    NotNumeric(&'static str),
    #[error("invalid JSON command: {0}")]
    Json(String),
}

/// Errors returned by [`Codec::decode`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed datagram: {0}")]
    Malformed(#[from] Malformed),
}

/// Datagram encodings understood by the receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WireFormat {
    #[default]
    Binary,
    Json,
    Joystick,
}

/// JSON command with short keys.
///
/// Numbers are read as `f64` so large finite values clamp instead of
/// overflowing to infinity on the way to `f32`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct JsonCommand {
    l: f64,
    r: f64,
    #[serde(default)]
    s: Option<f64>,
    #[serde(default)]
    q: Option<u32>,
}

/// Stateless decoder for one wire format.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Codec {
    format: WireFormat,
    mixer: JoystickMixer,
}

impl Codec {
    pub fn new(
        format: WireFormat,
        mixer: JoystickMixer,
    ) -> Self {
        Self { format, mixer }
    }

    pub fn format(&self) -> WireFormat {
        self.format
    }

    /// Decode one datagram payload.
    pub fn decode(
        &self,
        payload: &[u8],
    ) -> Result<Command, DecodeError> {
        if payload.is_empty() {
            return Err(Malformed::Empty.into());
        }
        match self.format {
            WireFormat::Binary => decode_binary(payload),
            WireFormat::Json => decode_json(payload),
            WireFormat::Joystick => {
                let report = parse_joystick(payload)?;
                let (left, right, servo) = self.mixer.mix(&report);
                Ok(Command::new(left, right, Some(servo), None))
            }
        }
    }
}

impl Default for Codec {
    fn default() -> Self {
        Self::new(WireFormat::default(), JoystickMixer::default())
    }
}

/// Encode a command in the binary layout.
///
/// Transmitters and tests use this to stay in lock-step with
/// [`Codec::decode`].
pub fn encode_binary(
    left_speed: f32,
    right_speed: f32,
    servo_angle: Option<f32>,
    sequence: u32,
) -> [u8; BINARY_COMMAND_LEN] {
    let mut out = [0u8; BINARY_COMMAND_LEN];
    out[0..4].copy_from_slice(&left_speed.to_le_bytes());
    out[4..8].copy_from_slice(&right_speed.to_le_bytes());
    out[8..12].copy_from_slice(&servo_angle.unwrap_or(SERVO_HOLD).to_le_bytes());
    out[12..16].copy_from_slice(&sequence.to_le_bytes());
    out
}

fn decode_binary(payload: &[u8]) -> Result<Command, DecodeError> {
    let bytes: &[u8; BINARY_COMMAND_LEN] =
        payload.try_into().map_err(|_| Malformed::WrongLength {
            expected: BINARY_COMMAND_LEN,
            actual: payload.len(),
        })?;

    let field = |offset: usize| {
        [
            bytes[offset],
            bytes[offset + 1],
            bytes[offset + 2],
            bytes[offset + 3],
        ]
    };
    let left = finite(f32::from_le_bytes(field(0)), "left_speed")?;
    let right = finite(f32::from_le_bytes(field(4)), "right_speed")?;
    let servo = finite(f32::from_le_bytes(field(8)), "servo_angle")?;
    let sequence = u32::from_le_bytes(field(12));

    let servo = if servo < 0.0 { None } else { Some(servo) };
    Ok(Command::new(left, right, servo, Some(sequence)))
}

fn decode_json(payload: &[u8]) -> Result<Command, DecodeError> {
    let cmd: JsonCommand =
        serde_json::from_slice(payload).map_err(|e| Malformed::Json(e.to_string()))?;

    let left = narrow(cmd.l, "l", -1.0, 1.0)?;
    let right = narrow(cmd.r, "r", -1.0, 1.0)?;
    let servo = cmd.s.map(|s| narrow(s, "s", 0.0, 1.0)).transpose()?;
    Ok(Command::new(left, right, servo, cmd.q))
}

fn narrow(
    value: f64,
    field: &'static str,
    min: f64,
    max: f64,
) -> Result<f32, Malformed> {
    if value.is_finite() {
        Ok(value.clamp(min, max) as f32)
    } else {
        Err(Malformed::NonFinite(field))
    }
}

fn parse_joystick(payload: &[u8]) -> Result<JoystickReport, DecodeError> {
    const FIELDS: [&str; 4] = ["b1", "b2", "x_raw", "y_raw"];

    let text = core::str::from_utf8(payload).map_err(|_| Malformed::NotUtf8)?;
    let parts: Vec<&str> = text.trim().split(',').collect();
    if parts.len() < FIELDS.len() {
        return Err(Malformed::MissingFields {
            expected: FIELDS.len(),
            actual: parts.len(),
        }
        .into());
    }

    let mut values = [0u32; 4];
    for (i, &name) in FIELDS.iter().enumerate() {
        let part = parts[i].trim();
        if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Malformed::NotNumeric(name).into());
        }
        values[i] = part.parse().map_err(|_| Malformed::NotNumeric(name))?;
    }

    Ok(JoystickReport {
        b1: values[0],
        b2: values[1],
        x_raw: values[2],
        y_raw: values[3],
    })
}

fn finite(
    value: f32,
    field: &'static str,
) -> Result<f32, Malformed> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(Malformed::NonFinite(field))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec(format: WireFormat) -> Codec {
        Codec::new(format, JoystickMixer::default())
    }

    #[test]
    fn command_serializes_with_field_names() {
        let cmd = Command::new(0.5, -0.5, None, Some(3));
        assert_eq!(
            serde_json::to_value(cmd).unwrap(),
            serde_json::json!({
                "left_speed": 0.5,
                "right_speed": -0.5,
                "servo_angle": null,
                "sequence": 3
            })
        );
    }

    #[test]
    fn binary_command_decodes_all_fields() {
        let cmd = codec(WireFormat::Binary)
            .decode(&encode_binary(0.5, -0.5, Some(0.75), 42))
            .unwrap();
        assert_eq!(cmd.left_speed(), 0.5);
        assert_eq!(cmd.right_speed(), -0.5);
        assert_eq!(cmd.servo_angle(), Some(0.75));
        assert_eq!(cmd.sequence(), Some(42));
    }

    #[test]
    fn binary_out_of_range_values_are_clamped() {
        let cmd = codec(WireFormat::Binary)
            .decode(&encode_binary(1.2, -7.0, Some(3.0), 1))
            .unwrap();
        assert_eq!(cmd.left_speed(), 1.0);
        assert_eq!(cmd.right_speed(), -1.0);
        assert_eq!(cmd.servo_angle(), Some(1.0));
    }

    #[test]
    fn binary_negative_servo_means_hold() {
        let cmd = codec(WireFormat::Binary)
            .decode(&encode_binary(0.1, 0.1, None, 1))
            .unwrap();
        assert_eq!(cmd.servo_angle(), None);
    }

    #[test]
    fn empty_payload_is_malformed() {
        for format in [WireFormat::Binary, WireFormat::Json, WireFormat::Joystick] {
            assert_eq!(
                codec(format).decode(&[]),
                Err(DecodeError::Malformed(Malformed::Empty))
            );
        }
    }

    #[test]
    fn binary_wrong_length_is_malformed() {
        let frame = encode_binary(0.5, 0.5, None, 1);
        assert_eq!(
            codec(WireFormat::Binary).decode(&frame[..15]),
            Err(DecodeError::Malformed(Malformed::WrongLength {
                expected: 16,
                actual: 15
            }))
        );
        let mut long = frame.to_vec();
        long.push(0);
        assert!(codec(WireFormat::Binary).decode(&long).is_err());
    }

    #[test]
    fn binary_non_finite_floats_are_malformed() {
        let c = codec(WireFormat::Binary);
        assert_eq!(
            c.decode(&encode_binary(f32::NAN, 0.0, None, 1)),
            Err(DecodeError::Malformed(Malformed::NonFinite("left_speed")))
        );
        assert_eq!(
            c.decode(&encode_binary(0.0, f32::INFINITY, None, 1)),
            Err(DecodeError::Malformed(Malformed::NonFinite("right_speed")))
        );
        assert_eq!(
            c.decode(&encode_binary(0.0, 0.0, Some(f32::NEG_INFINITY), 1)),
            Err(DecodeError::Malformed(Malformed::NonFinite("servo_angle")))
        );
    }

    #[test]
    fn json_command_with_optional_fields() {
        let c = codec(WireFormat::Json);
        let cmd = c.decode(br#"{"l":0.25,"r":-1.5,"s":0.4,"q":9}"#).unwrap();
        assert_eq!(cmd.left_speed(), 0.25);
        assert_eq!(cmd.right_speed(), -1.0);
        assert_eq!(cmd.servo_angle(), Some(0.4));
        assert_eq!(cmd.sequence(), Some(9));

        let cmd = c.decode(br#"{"l":0.0,"r":0.0}"#).unwrap();
        assert_eq!(cmd.servo_angle(), None);
        assert_eq!(cmd.sequence(), None);
    }

    #[test]
    fn json_values_beyond_f32_range_are_clamped() {
        let c = codec(WireFormat::Json);
        let cmd = c.decode(br#"{"l":1e40,"r":0}"#).unwrap();
        assert_eq!(cmd.left_speed(), 1.0);
        assert_eq!(cmd.right_speed(), 0.0);

        let cmd = c.decode(br#"{"l":-1e300,"r":2.5,"s":1e39}"#).unwrap();
        assert_eq!(cmd.left_speed(), -1.0);
        assert_eq!(cmd.right_speed(), 1.0);
        assert_eq!(cmd.servo_angle(), Some(1.0));
    }

    #[test]
    fn json_missing_or_non_numeric_fields_are_malformed() {
        let c = codec(WireFormat::Json);
        assert!(matches!(
            c.decode(br#"{"l":0.5}"#),
            Err(DecodeError::Malformed(Malformed::Json(_)))
        ));
        assert!(matches!(
            c.decode(br#"{"l":"fast","r":0.5}"#),
            Err(DecodeError::Malformed(Malformed::Json(_)))
        ));
        assert!(c.decode(b"not json").is_err());
    }

    #[test]
    fn joystick_report_is_mixed_into_command() {
        let cmd = codec(WireFormat::Joystick)
            .decode(b"0,1,32768,65535\n")
            .unwrap();
        assert!((cmd.left_speed() - 1.0).abs() < 1e-5);
        assert!((cmd.right_speed() - 1.0).abs() < 1e-5);
        assert!(cmd.servo_angle().is_some());
        assert_eq!(cmd.sequence(), None);
    }

    #[test]
    fn joystick_uses_first_four_fields() {
        let cmd = codec(WireFormat::Joystick)
            .decode(b"1,1,32768,32768,999")
            .unwrap();
        assert_eq!(cmd.left_speed(), 0.0);
    }

    #[test]
    fn joystick_rejects_short_or_non_digit_reports() {
        let c = codec(WireFormat::Joystick);
        assert_eq!(
            c.decode(b"1,1,32768"),
            Err(DecodeError::Malformed(Malformed::MissingFields {
                expected: 4,
                actual: 3
            }))
        );
        assert_eq!(
            c.decode(b"1,1,-5,32768"),
            Err(DecodeError::Malformed(Malformed::NotNumeric("x_raw")))
        );
        assert_eq!(
            c.decode(b"1,,32768,32768"),
            Err(DecodeError::Malformed(Malformed::NotNumeric("b2")))
        );
        assert_eq!(
            c.decode(&[0xff, 0xfe, b',', b'1']),
            Err(DecodeError::Malformed(Malformed::NotUtf8))
        );
    }

    #[test]
    fn command_constructor_neutralises_non_finite_values() {
        let cmd = Command::new(f32::NAN, f32::INFINITY, Some(f32::NAN), None);
        assert_eq!(cmd.left_speed(), 0.0);
        assert_eq!(cmd.right_speed(), 0.0);
        assert_eq!(cmd.servo_angle(), None);
    }
}
