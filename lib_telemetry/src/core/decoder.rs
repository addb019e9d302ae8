//! # Decoder / Validator
//!
//! Turns one raw frame into a [`Reading`] or a [`Rejected`]. A frame must parse as
//! JSON first (otherwise it is *malformed*), then every field is checked against
//! the reading invariant (otherwise it is *invalid*). There is no partial
//! acceptance and no side effect.

use serde_json::{Map, Number, Value};

use crate::core::errors::{DecodeError, Rejected, ValidationError};
use crate::core::reading::{
    Reading, ELECTRICITY_USAGE, HOME_ID, POWER, PUMP_RUNNING, WATER_LEVEL,
};

/// Decodes and validates a raw frame.
pub fn decode(raw: &[u8]) -> Result<Reading, Rejected> {
    let text = std::str::from_utf8(raw).map_err(DecodeError::from)?;
    let value: Value = serde_json::from_str(text.trim()).map_err(DecodeError::from)?;
    Ok(validate(&value)?)
}

/// Checks an already parsed structure field by field.
pub fn validate(value: &Value) -> Result<Reading, ValidationError> {
    let object = value.as_object().ok_or(ValidationError::NotAnObject)?;

    Ok(Reading {
        home_id: home_id(object)?,
        water_level: non_negative(object, WATER_LEVEL)?,
        electricity_usage: non_negative(object, ELECTRICITY_USAGE)?,
        power: non_negative(object, POWER)?,
        pump_running: flag(object, PUMP_RUNNING)?,
    })
}

fn field<'a>(object: &'a Map<String, Value>, key: &'static str) -> Result<&'a Value, ValidationError> {
    match object.get(key) {
        None | Some(Value::Null) => Err(ValidationError::Missing(key)),
        Some(v) => Ok(v),
    }
}

fn number<'a>(object: &'a Map<String, Value>, key: &'static str) -> Result<&'a Number, ValidationError> {
    match field(object, key)? {
        Value::Number(n) => Ok(n),
        _ => Err(ValidationError::NotNumeric(key)),
    }
}

fn home_id(object: &Map<String, Value>) -> Result<u64, ValidationError> {
    let n = number(object, HOME_ID)?;
    if let Some(id) = n.as_u64() {
        return Ok(id);
    }
    if let Some(id) = n.as_i64() {
        return Err(ValidationError::Negative {
            field: HOME_ID,
            value: id as f64,
        });
    }
    // A fractional id: report the sign problem first, it is the more useful hint.
    match n.as_f64() {
        Some(v) if v < 0.0 => Err(ValidationError::Negative { field: HOME_ID, value: v }),
        _ => Err(ValidationError::NotInteger(HOME_ID)),
    }
}

fn non_negative(object: &Map<String, Value>, key: &'static str) -> Result<Number, ValidationError> {
    let n = number(object, key)?;
    let v = n.as_f64().ok_or(ValidationError::NotNumeric(key))?;
    if v < 0.0 {
        return Err(ValidationError::Negative { field: key, value: v });
    }
    Ok(n.clone())
}

fn flag(object: &Map<String, Value>, key: &'static str) -> Result<bool, ValidationError> {
    match field(object, key)? {
        Value::Bool(b) => Ok(*b),
        _ => Err(ValidationError::NotBoolean(key)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GOOD: &str = r#"{"HomeID":1,"CurrentWaterLevel":55,"ElectricityUsage":120.5,"Power":30.2,"PumpRunningStatus":true}"#;

    fn invalid(raw: &str) -> ValidationError {
        match decode(raw.as_bytes()) {
            Err(Rejected::Invalid(e)) => e,
            other => panic!("expected invalid, got {:?}", other),
        }
    }

    #[test]
    fn accepts_complete_frame() {
        let reading = decode(GOOD.as_bytes()).unwrap();
        assert_eq!(reading.home_id, 1);
        assert_eq!(reading.water_level, Number::from(55));
        assert_eq!(reading.electricity_usage.as_f64(), Some(120.5));
        assert_eq!(reading.power.as_f64(), Some(30.2));
        assert!(reading.pump_running);
    }

    #[test]
    fn tolerates_trailing_line_ending_and_extra_keys() {
        let raw = r#"{"HomeID":2,"CurrentWaterLevel":0,"ElectricityUsage":0,"Power":0,"PumpRunningStatus":false,"Firmware":"1.2"}"#;
        let reading = decode(format!("{}\r\n", raw).as_bytes()).unwrap();
        assert_eq!(reading.home_id, 2);
        assert!(!reading.pump_running);
    }

    #[test]
    fn negative_home_id_is_invalid() {
        let raw = GOOD.replace(r#""HomeID":1"#, r#""HomeID":-1"#);
        let rejected = decode(raw.as_bytes()).unwrap_err();
        assert_eq!(rejected.reason(), "invalid");
        assert_eq!(invalid(&raw), ValidationError::Negative { field: HOME_ID, value: -1.0 });
    }

    #[test]
    fn any_negative_numeric_field_is_invalid() {
        for key in [WATER_LEVEL, ELECTRICITY_USAGE, POWER] {
            let mut value: Value = serde_json::from_str(GOOD).unwrap();
            value[key] = serde_json::json!(-0.5);
            let raw = value.to_string();
            assert_eq!(invalid(&raw), ValidationError::Negative { field: key, value: -0.5 });
        }
    }

    #[test]
    fn pump_flag_must_be_a_real_boolean() {
        for bad in ["1", "\"true\"", "0"] {
            let raw = GOOD.replace("\"PumpRunningStatus\":true", &format!("\"PumpRunningStatus\":{}", bad));
            assert_eq!(invalid(&raw), ValidationError::NotBoolean(PUMP_RUNNING));
        }
    }

    #[test]
    fn booleans_and_strings_are_not_numbers() {
        let raw = GOOD.replace("\"Power\":30.2", "\"Power\":true");
        assert_eq!(invalid(&raw), ValidationError::NotNumeric(POWER));

        let raw = GOOD.replace("\"CurrentWaterLevel\":55", "\"CurrentWaterLevel\":\"55\"");
        assert_eq!(invalid(&raw), ValidationError::NotNumeric(WATER_LEVEL));
    }

    #[test]
    fn missing_or_null_field_is_invalid() {
        let raw = r#"{"HomeID":1,"CurrentWaterLevel":55,"Power":30.2,"PumpRunningStatus":true}"#;
        assert_eq!(invalid(raw), ValidationError::Missing(ELECTRICITY_USAGE));

        let raw = GOOD.replace("\"Power\":30.2", "\"Power\":null");
        assert_eq!(invalid(&raw), ValidationError::Missing(POWER));
    }

    #[test]
    fn fractional_home_id_is_invalid() {
        let raw = GOOD.replace(r#""HomeID":1"#, r#""HomeID":1.5"#);
        assert_eq!(invalid(&raw), ValidationError::NotInteger(HOME_ID));
    }

    #[test]
    fn non_object_json_is_invalid() {
        assert_eq!(invalid("[1,2,3]"), ValidationError::NotAnObject);
        assert_eq!(invalid("42"), ValidationError::NotAnObject);
    }

    #[test]
    fn unparseable_text_is_malformed() {
        let frames: [&[u8]; 4] = [b"{\"HomeID\":1,", b"hello sensor", b"\xff\xfe{}", b""];
        for raw in frames {
            let rejected = decode(raw).unwrap_err();
            assert!(matches!(rejected, Rejected::Malformed(_)), "{:?}", rejected);
            assert_eq!(rejected.reason(), "malformed");
        }
    }
}
