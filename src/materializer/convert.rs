//! Scalar conversion from stored JSON values to declared scalar types.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use docql_core::metadata::{Model, ScalarType};

use super::MaterializedValue;
use crate::error::{DqlError, DqlResult};

/// Convert a stored scalar to its declared type.
///
/// Null stays null for every scalar type.
pub fn convert_scalar(model: &Model, scalar: &ScalarType, raw: &Value) -> DqlResult<MaterializedValue> {
    if raw.is_null() {
        return Ok(MaterializedValue::Null);
    }

    match scalar {
        ScalarType::Bool => raw
            .as_bool()
            .map(MaterializedValue::Bool)
            .ok_or_else(|| mismatch("bool", raw)),
        ScalarType::Int => to_int(raw).map(MaterializedValue::Int),
        ScalarType::Float => raw
            .as_f64()
            .map(MaterializedValue::Float)
            .ok_or_else(|| mismatch("float", raw)),
        ScalarType::String => raw
            .as_str()
            .map(|s| MaterializedValue::String(s.to_string()))
            .ok_or_else(|| mismatch("string", raw)),
        ScalarType::Timestamp => to_timestamp(raw).map(MaterializedValue::Timestamp),
        ScalarType::Enum(name) => to_enum(model, name, raw),
    }
}

/// Integers pass through; floats narrow only when integral and in range.
fn to_int(raw: &Value) -> DqlResult<i64> {
    if let Some(i) = raw.as_i64() {
        return Ok(i);
    }
    match raw.as_f64() {
        Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 => Ok(f as i64),
        Some(f) => Err(DqlError::materialization(format!(
            "{} cannot be narrowed to an integer",
            f
        ))),
        None => Err(mismatch("integer", raw)),
    }
}

/// RFC 3339 strings, `{seconds, nanos}` maps or epoch milliseconds, in UTC.
pub fn to_timestamp(raw: &Value) -> DqlResult<DateTime<Utc>> {
    match raw {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(|e| DqlError::materialization(format!("invalid timestamp '{}': {}", s, e))),
        Value::Object(map) => {
            let seconds = map.get("seconds").and_then(Value::as_i64);
            let nanos = map.get("nanos").and_then(Value::as_u64).unwrap_or(0);
            seconds
                .and_then(|s| u32::try_from(nanos).ok().map(|n| (s, n)))
                .and_then(|(s, n)| Utc.timestamp_opt(s, n).single())
                .ok_or_else(|| mismatch("timestamp", raw))
        }
        Value::Number(n) => n
            .as_i64()
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single())
            .ok_or_else(|| mismatch("timestamp", raw)),
        _ => Err(mismatch("timestamp", raw)),
    }
}

fn to_enum(model: &Model, name: &str, raw: &Value) -> DqlResult<MaterializedValue> {
    let descriptor = model.enum_descriptor(name)?;
    let variant = match raw {
        Value::String(s) if descriptor.value_of(s).is_some() => Some(s.as_str()),
        Value::Number(n) => n.as_i64().and_then(|v| descriptor.name_of(v)),
        _ => None,
    };
    variant
        .map(|variant| MaterializedValue::Enum {
            type_name: name.to_string(),
            variant: variant.to_string(),
        })
        .ok_or_else(|| DqlError::materialization(format!("{} is not a variant of {}", raw, name)))
}

fn mismatch(expected: &str, raw: &Value) -> DqlError {
    DqlError::materialization(format!("expected {}, got {}", expected, raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use docql_core::metadata::EnumDescriptor;
    use serde_json::json;

    fn model() -> Model {
        Model::new().with_enum(EnumDescriptor::new("Status", &["Pending", "Confirmed", "Shipped"]))
    }

    #[test]
    fn test_numeric_widening_and_narrowing() {
        let model = model();
        assert_eq!(
            convert_scalar(&model, &ScalarType::Float, &json!(3)).unwrap(),
            MaterializedValue::Float(3.0)
        );
        assert_eq!(
            convert_scalar(&model, &ScalarType::Int, &json!(4.0)).unwrap(),
            MaterializedValue::Int(4)
        );
        assert!(convert_scalar(&model, &ScalarType::Int, &json!(4.5)).is_err());
        assert!(convert_scalar(&model, &ScalarType::Int, &json!("4")).is_err());
    }

    #[test]
    fn test_enum_from_name_or_number() {
        let model = model();
        let status = ScalarType::Enum("Status".to_string());
        let expected = MaterializedValue::Enum {
            type_name: "Status".to_string(),
            variant: "Confirmed".to_string(),
        };
        assert_eq!(convert_scalar(&model, &status, &json!("Confirmed")).unwrap(), expected);
        assert_eq!(convert_scalar(&model, &status, &json!(1)).unwrap(), expected);
        assert!(convert_scalar(&model, &status, &json!("Lost")).is_err());
        assert!(convert_scalar(&model, &status, &json!(7)).is_err());
    }

    #[test]
    fn test_timestamps_normalize_to_utc() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        assert_eq!(to_timestamp(&json!("2024-03-01T12:00:00+02:00")).unwrap(), expected);
        assert_eq!(
            to_timestamp(&json!({"seconds": expected.timestamp(), "nanos": 0})).unwrap(),
            expected
        );
        assert_eq!(to_timestamp(&json!(expected.timestamp_millis())).unwrap(), expected);
        assert!(to_timestamp(&json!("yesterday")).is_err());
    }

    #[test]
    fn test_null_passes_through() {
        let model = model();
        assert!(convert_scalar(&model, &ScalarType::Timestamp, &Value::Null)
            .unwrap()
            .is_null());
    }
}
