//! Dynamic value plumbing over `serde_json::Value`.
//!
//! Every attribute, query parameter and result cell in rekord is a
//! [`serde_json::Value`]; attribute bags are [`serde_json::Map`]s, which keep
//! insertion order (the `preserve_order` feature).

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

/// An ordered attribute bag: column name → dynamic value.
pub type Attributes = Map<String, Value>;

/// Truthiness rule shared by the `bool` cast: `0`, `0.0`, `""`, `null` and
/// `false` are false, everything else is true.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i != 0
            } else if let Some(u) = n.as_u64() {
                u != 0
            } else {
                n.as_f64().is_some_and(|f| f != 0.0)
            }
        }
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Current UTC time as an ISO-8601 string at second precision.
///
/// This is the form written into `created_at` / `updated_at` and into the
/// migration tracking table.
pub fn now() -> Value {
    Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true))
}

/// Render a value for key grouping (eager-load maps, pivot sync sets).
///
/// Numbers normalize through `i64` where possible so `1` and `1.0` group
/// together when a driver reports integer keys as floats.
pub fn key_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(i.to_string())
            } else if let Some(f) = n.as_f64() {
                if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
                    Some((f as i64).to_string())
                } else {
                    Some(f.to_string())
                }
            } else {
                n.as_u64().map(|u| u.to_string())
            }
        }
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(_) | Value::Object(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn truthiness_rule() {
        assert!(!truthy(&json!(null)));
        assert!(!truthy(&json!(false)));
        assert!(!truthy(&json!(0)));
        assert!(!truthy(&json!(0.0)));
        assert!(!truthy(&json!("")));
        assert!(truthy(&json!(1)));
        assert!(truthy(&json!("no")));
        assert!(truthy(&json!([])));
    }

    #[test]
    fn key_string_normalizes_numbers() {
        assert_eq!(key_string(&json!(7)).as_deref(), Some("7"));
        assert_eq!(key_string(&json!(7.0)).as_deref(), Some("7"));
        assert_eq!(key_string(&json!("abc")).as_deref(), Some("abc"));
        assert_eq!(key_string(&json!(null)), None);
    }
}
