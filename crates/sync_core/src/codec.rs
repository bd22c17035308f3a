//! The single normalization boundary between raw store values and the typed
//! values the render layer and room model see.
//!
//! Devices and sensors in the field write booleans in several shapes (`1`,
//! `"1"`, `true`, `"on"`, `"motion"`, ...). Every shape is listed in
//! [`ON_TOKENS`]/[`OFF_TOKENS`]; nothing outside this module compares raw
//! values.

use serde::Serialize;
use serde_json::{json, Value};
use shared::domain::{Field, Sensor};
use thiserror::Error;

/// String encodings read as "on". Compared case-insensitively after trimming.
pub const ON_TOKENS: [&str; 4] = ["1", "on", "motion", "true"];
/// String encodings read as "off". Compared case-insensitively after trimming.
pub const OFF_TOKENS: [&str; 3] = ["0", "off", "false"];

#[derive(Debug, Clone, PartialEq, Error)]
#[error("expected {expected}, got {raw}")]
pub struct DecodeError {
    pub expected: &'static str,
    pub raw: Value,
}

/// Canonical value delivered to subscribers and written by commands.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum SyncValue {
    /// Device on/off; written as `1`/`0`.
    Switch(bool),
    /// Mode or status flag; written as `true`/`false`.
    Flag(bool),
    Reading(f64),
    /// Fan speed, always within `0..=100`.
    Percent(u8),
    Tree(Value),
}

impl SyncValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SyncValue::Switch(on) | SyncValue::Flag(on) => Some(*on),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SyncValue::Reading(value) => Some(*value),
            SyncValue::Percent(value) => Some(f64::from(*value)),
            _ => None,
        }
    }

    pub fn as_percent(&self) -> Option<u8> {
        match self {
            SyncValue::Percent(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_tree(&self) -> Option<&Value> {
        match self {
            SyncValue::Tree(value) => Some(value),
            _ => None,
        }
    }

    pub fn to_wire(&self) -> Value {
        match self {
            SyncValue::Switch(on) => json!(if *on { 1 } else { 0 }),
            SyncValue::Flag(on) => Value::Bool(*on),
            SyncValue::Reading(value) => serde_json::Number::from_f64(*value)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            SyncValue::Percent(value) => json!(value),
            SyncValue::Tree(value) => value.clone(),
        }
    }
}

/// Per-path decoder declared when subscribing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldCodec {
    Switch,
    Flag,
    Reading,
    Percent,
    Tree,
}

impl FieldCodec {
    pub fn for_field(field: &Field) -> Self {
        match field {
            Field::Sensor(Sensor::Presence) => FieldCodec::Switch,
            Field::Sensor(_) => FieldCodec::Reading,
            Field::Command(..) | Field::Actual(..) => FieldCodec::Switch,
            Field::FanSpeed(_) => FieldCodec::Percent,
            Field::AutoMode => FieldCodec::Flag,
        }
    }

    /// Decodes a raw store value. Absent booleans decode to off; absent
    /// readings stay absent.
    pub fn decode(self, raw: Option<&Value>) -> Result<Option<SyncValue>, DecodeError> {
        let raw = match raw {
            None | Some(Value::Null) => return Ok(self.fallback()),
            Some(raw) => raw,
        };

        match self {
            FieldCodec::Switch => decode_bool(raw).map(|on| Some(SyncValue::Switch(on))),
            FieldCodec::Flag => decode_bool(raw).map(|on| Some(SyncValue::Flag(on))),
            FieldCodec::Reading => decode_number(raw, "numeric reading")
                .map(|value| Some(SyncValue::Reading(value))),
            FieldCodec::Percent => decode_number(raw, "percentage")
                .map(|value| Some(SyncValue::Percent(value.round().clamp(0.0, 100.0) as u8))),
            FieldCodec::Tree => Ok(Some(SyncValue::Tree(raw.clone()))),
        }
    }

    /// Value used for an absent key, and in place of a value that failed to
    /// decode.
    pub fn fallback(self) -> Option<SyncValue> {
        match self {
            FieldCodec::Switch => Some(SyncValue::Switch(false)),
            FieldCodec::Flag => Some(SyncValue::Flag(false)),
            FieldCodec::Reading | FieldCodec::Percent | FieldCodec::Tree => None,
        }
    }
}

fn decode_bool(raw: &Value) -> Result<bool, DecodeError> {
    let invalid = || DecodeError {
        expected: "on/off value",
        raw: raw.clone(),
    };

    match raw {
        Value::Bool(on) => Ok(*on),
        Value::Number(number) => match number.as_f64() {
            Some(value) if value == 1.0 => Ok(true),
            Some(value) if value == 0.0 => Ok(false),
            _ => Err(invalid()),
        },
        Value::String(text) => {
            let token = text.trim().to_ascii_lowercase();
            if ON_TOKENS.contains(&token.as_str()) {
                Ok(true)
            } else if OFF_TOKENS.contains(&token.as_str()) {
                Ok(false)
            } else {
                Err(invalid())
            }
        }
        _ => Err(invalid()),
    }
}

fn decode_number(raw: &Value, expected: &'static str) -> Result<f64, DecodeError> {
    let value = match raw {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    };

    value
        .filter(|value| value.is_finite())
        .ok_or_else(|| DecodeError {
            expected,
            raw: raw.clone(),
        })
}

#[cfg(test)]
mod tests {
    use shared::domain::{DeviceIndex, DeviceKind};

    use super::*;

    #[test]
    fn every_on_encoding_decodes_to_true() {
        for raw in [json!(1), json!("1"), json!(true), json!("on"), json!("motion")] {
            assert_eq!(
                FieldCodec::Switch.decode(Some(&raw)),
                Ok(Some(SyncValue::Switch(true))),
                "raw value {raw}"
            );
        }
    }

    #[test]
    fn every_off_encoding_decodes_to_false() {
        for raw in [json!(0), json!("0"), json!(false), json!("off")] {
            assert_eq!(
                FieldCodec::Switch.decode(Some(&raw)),
                Ok(Some(SyncValue::Switch(false))),
                "raw value {raw}"
            );
        }
        assert_eq!(
            FieldCodec::Switch.decode(None),
            Ok(Some(SyncValue::Switch(false)))
        );
        assert_eq!(
            FieldCodec::Switch.decode(Some(&Value::Null)),
            Ok(Some(SyncValue::Switch(false)))
        );
    }

    #[test]
    fn tokens_ignore_case_and_padding() {
        assert_eq!(
            FieldCodec::Flag.decode(Some(&json!(" Motion "))),
            Ok(Some(SyncValue::Flag(true)))
        );
        assert_eq!(
            FieldCodec::Flag.decode(Some(&json!("OFF"))),
            Ok(Some(SyncValue::Flag(false)))
        );
    }

    #[test]
    fn unknown_boolean_shapes_are_decode_errors() {
        for raw in [json!(2), json!("maybe"), json!([1]), json!({"on": true})] {
            let err = FieldCodec::Switch.decode(Some(&raw)).expect_err("must reject");
            assert_eq!(err.raw, raw);
        }
    }

    #[test]
    fn readings_accept_numbers_and_numeric_strings() {
        assert_eq!(
            FieldCodec::Reading.decode(Some(&json!(27.5))),
            Ok(Some(SyncValue::Reading(27.5)))
        );
        assert_eq!(
            FieldCodec::Reading.decode(Some(&json!(" 61 "))),
            Ok(Some(SyncValue::Reading(61.0)))
        );
        assert_eq!(FieldCodec::Reading.decode(None), Ok(None));
        assert!(FieldCodec::Reading.decode(Some(&json!(true))).is_err());
    }

    #[test]
    fn fan_speed_is_rounded_and_clamped() {
        assert_eq!(
            FieldCodec::Percent.decode(Some(&json!("49.6"))),
            Ok(Some(SyncValue::Percent(50)))
        );
        assert_eq!(
            FieldCodec::Percent.decode(Some(&json!(180))),
            Ok(Some(SyncValue::Percent(100)))
        );
        assert_eq!(
            FieldCodec::Percent.decode(Some(&json!(-5))),
            Ok(Some(SyncValue::Percent(0)))
        );
    }

    #[test]
    fn wire_encoding_matches_field_conventions() {
        assert_eq!(SyncValue::Switch(true).to_wire(), json!(1));
        assert_eq!(SyncValue::Switch(false).to_wire(), json!(0));
        assert_eq!(SyncValue::Flag(false).to_wire(), json!(false));
        assert_eq!(SyncValue::Percent(75).to_wire(), json!(75));
    }

    #[test]
    fn codecs_are_declared_per_field() {
        assert_eq!(
            FieldCodec::for_field(&Field::Sensor(Sensor::Presence)),
            FieldCodec::Switch
        );
        assert_eq!(
            FieldCodec::for_field(&Field::Sensor(Sensor::Humidity)),
            FieldCodec::Reading
        );
        assert_eq!(
            FieldCodec::for_field(&Field::Actual(DeviceKind::Fan, DeviceIndex(1))),
            FieldCodec::Switch
        );
        assert_eq!(
            FieldCodec::for_field(&Field::FanSpeed(DeviceIndex(2))),
            FieldCodec::Percent
        );
        assert_eq!(FieldCodec::for_field(&Field::AutoMode), FieldCodec::Flag);
    }
}
