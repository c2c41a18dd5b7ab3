//! Attribute cast table semantics.
//!
//! A cast runs when an attribute is written through [`crate::Entity::set_attribute`]
//! and again when it is read through the typed accessor, so values that were
//! hydrated raw from a driver row still come back in casted form. `null` and
//! absent values bypass casting entirely.

use crate::error::{Error, Result};
use crate::value::truthy;
use serde_json::Value;

/// Cast kinds assignable to attributes in an entity type's cast table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastKind {
    Int,
    Float,
    String,
    Bool,
    Json,
    Date,
}

/// Apply a cast to a value.
///
/// `attribute` is only used for error reporting.
pub fn cast_value(kind: CastKind, attribute: &str, value: Value) -> Result<Value> {
    if value.is_null() {
        return Ok(value);
    }
    match kind {
        CastKind::Int => cast_int(attribute, value),
        CastKind::Float => cast_float(attribute, value),
        CastKind::String => Ok(cast_string(value)),
        CastKind::Bool => Ok(Value::Bool(truthy(&value))),
        CastKind::Json => cast_json(value),
        CastKind::Date => cast_date(value),
    }
}

fn cast_int(attribute: &str, value: Value) -> Result<Value> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Value::from(i))
            } else if let Some(f) = n.as_f64() {
                Ok(Value::from(f as i64))
            } else {
                Err(Error::cast_failed(attribute, format!("{n} out of i64 range")))
            }
        }
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| Error::cast_failed(attribute, format!("'{s}' is not an integer"))),
        Value::Bool(b) => Ok(Value::from(b as i64)),
        other => Err(Error::cast_failed(
            attribute,
            format!("cannot cast {other} to int"),
        )),
    }
}

fn cast_float(attribute: &str, value: Value) -> Result<Value> {
    match value {
        Value::Number(n) => {
            let f = n
                .as_f64()
                .ok_or_else(|| Error::cast_failed(attribute, format!("{n} is not a float")))?;
            Ok(Value::from(f))
        }
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map(Value::from)
            .map_err(|_| Error::cast_failed(attribute, format!("'{s}' is not a float"))),
        other => Err(Error::cast_failed(
            attribute,
            format!("cannot cast {other} to float"),
        )),
    }
}

fn cast_string(value: Value) -> Value {
    match value {
        Value::String(_) => value,
        Value::Number(n) => Value::String(n.to_string()),
        Value::Bool(b) => Value::String(b.to_string()),
        other => Value::String(other.to_string()),
    }
}

fn cast_json(value: Value) -> Result<Value> {
    match value {
        Value::String(s) => {
            serde_json::from_str(&s).map_err(|e| Error::JsonParse(e.to_string()))
        }
        other => Ok(other),
    }
}

fn cast_date(value: Value) -> Result<Value> {
    let Value::String(s) = value else {
        // Drivers that report native timestamp types already normalized them
        // to strings; a number here is a unix epoch.
        if let Some(secs) = value.as_i64() {
            let dt = chrono::DateTime::from_timestamp(secs, 0)
                .ok_or_else(|| Error::DateParse(format!("epoch {secs} out of range")))?;
            return Ok(Value::String(
                dt.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            ));
        }
        return Err(Error::DateParse(format!("cannot parse {value} as a date")));
    };
    parse_date_string(&s).map(Value::String)
}

/// Parse an ISO-8601-ish date string, normalizing to RFC 3339 UTC.
///
/// Accepted forms, in order: RFC 3339, `YYYY-MM-DD HH:MM:SS[.fff]`,
/// `YYYY-MM-DDTHH:MM:SS[.fff]` without offset, bare `YYYY-MM-DD`.
fn parse_date_string(s: &str) -> Result<String> {
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
        return Ok(dt
            .with_timezone(&chrono::Utc)
            .to_rfc3339_opts(chrono::SecondsFormat::Secs, true));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(naive
                .and_utc()
                .to_rfc3339_opts(chrono::SecondsFormat::Secs, true));
        }
    }
    if let Ok(date) = chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        let naive = date
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| Error::DateParse(format!("invalid date '{s}'")))?;
        return Ok(naive
            .and_utc()
            .to_rfc3339_opts(chrono::SecondsFormat::Secs, true));
    }
    Err(Error::DateParse(format!("unrecognized date '{s}'")))
}
