//! Converters between raw stored JSON values and the semantic views the UI needs.
//!
//! All converters are pure. A value whose shape cannot be viewed as the
//! requested type fails with [`AtomicError::TypeMismatch`]; the array view fails
//! with [`AtomicError::NotAResourceArray`] instead, so callers can fall back to
//! an empty list.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde_json::Value;

use crate::error::{AtomicError, AtomicResult};

/// Short name of the JSON shape, used in error messages.
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "nested resource",
    }
}

fn mismatch(expected: &'static str, value: &Value) -> AtomicError {
    AtomicError::TypeMismatch {
        expected,
        found: type_name(value).to_string(),
    }
}

pub fn val_to_string(value: &Value) -> AtomicResult<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Array(items) => {
            let parts = items
                .iter()
                .map(|item| match item {
                    Value::Object(map) => map
                        .get("@id")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .ok_or_else(|| mismatch("string", item)),
                    other => val_to_string(other),
                })
                .collect::<AtomicResult<Vec<_>>>()?;
            Ok(parts.join(", "))
        }
        other => Err(mismatch("string", other)),
    }
}

/// Numbers pass through; numeric strings are parsed.
pub fn val_to_number(value: &Value) -> AtomicResult<f64> {
    match value {
        Value::Number(n) => n.as_f64().ok_or_else(|| mismatch("number", value)),
        Value::String(s) => s.trim().parse::<f64>().map_err(|_| AtomicError::TypeMismatch {
            expected: "number",
            found: format!("string '{s}'"),
        }),
        other => Err(mismatch("number", other)),
    }
}

pub fn val_to_integer(value: &Value) -> AtomicResult<i64> {
    match value {
        Value::Number(n) => n.as_i64().ok_or_else(|| AtomicError::TypeMismatch {
            expected: "integer",
            found: format!("number {n}"),
        }),
        Value::String(s) => s.trim().parse::<i64>().map_err(|_| AtomicError::TypeMismatch {
            expected: "integer",
            found: format!("string '{s}'"),
        }),
        other => Err(mismatch("integer", other)),
    }
}

pub fn val_to_boolean(value: &Value) -> AtomicResult<bool> {
    match value {
        Value::Bool(b) => Ok(*b),
        other => Err(mismatch("boolean", other)),
    }
}

/// Millisecond timestamps, RFC 3339 strings, and `YYYY-MM-DD` dates (midnight UTC).
pub fn val_to_date(value: &Value) -> AtomicResult<DateTime<Utc>> {
    match value {
        Value::Number(n) => {
            let millis = n.as_i64().ok_or_else(|| mismatch("date", value))?;
            Utc.timestamp_millis_opt(millis)
                .single()
                .ok_or_else(|| AtomicError::TypeMismatch {
                    expected: "date",
                    found: format!("out of range timestamp {millis}"),
                })
        }
        Value::String(s) => {
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Ok(dt.with_timezone(&Utc));
            }
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
                .map(|naive| Utc.from_utc_datetime(&naive))
                .ok_or_else(|| AtomicError::TypeMismatch {
                    expected: "date",
                    found: format!("string '{s}'"),
                })
        }
        other => Err(mismatch("date", other)),
    }
}

pub fn val_to_array(value: &Value) -> AtomicResult<Vec<Value>> {
    match value {
        Value::Array(items) => Ok(items.clone()),
        other => Err(AtomicError::NotAResourceArray(type_name(other).to_string())),
    }
}

/// Array of subjects. Named nested resources resolve to their `@id`;
/// anonymous nested resources have no subject and fail.
pub fn val_to_subjects(value: &Value) -> AtomicResult<Vec<String>> {
    val_to_array(value)?
        .iter()
        .map(|item| match item {
            Value::String(s) => Ok(s.clone()),
            Value::Object(map) => map
                .get("@id")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| {
                    AtomicError::NotAResourceArray("contains an anonymous nested resource".into())
                }),
            other => Err(AtomicError::NotAResourceArray(format!(
                "contains a {}",
                type_name(other)
            ))),
        })
        .collect()
}

/// Shortens a URL for display, keeping its tail.
pub fn truncate_url(url: &str, max_len: usize) -> String {
    let stripped = url
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    let count = stripped.chars().count();
    if count <= max_len {
        return stripped.to_string();
    }
    let tail: String = stripped.chars().skip(count - max_len).collect();
    format!("...{tail}")
}
