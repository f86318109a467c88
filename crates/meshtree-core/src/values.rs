//! Loose-typing helpers for gateway payload values.

use serde_json::Value;

use crate::constants::status_text;

/// Whether a value counts as "set" in the gateway's loose sense
/// (not null, false, zero, NaN or the empty string).
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Numeric view of a value: numbers, and strings that parse as finite numbers.
pub fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

/// Whether a value is numeric or a numeric string.
pub fn is_numeric(value: &Value) -> bool {
    as_number(value).is_some()
}

/// Convert an `f64` into a JSON number, keeping integers integral.
pub fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

/// Replace numeric status codes with their text, pass anything else through.
pub fn status_value(value: &Value) -> Value {
    match as_number(value) {
        Some(code) => Value::String(status_text(code as i64).to_string()),
        None => value.clone(),
    }
}

/// Render a value as plain text (strings unquoted).
pub fn display_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_truthiness() {
        assert!(!is_truthy(&json!(null)));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!("")));
        assert!(!is_truthy(&json!(false)));
        assert!(is_truthy(&json!(3)));
        assert!(is_truthy(&json!({})));
    }

    #[test]
    fn test_numeric_strings() {
        assert_eq!(as_number(&json!("12.5")), Some(12.5));
        assert_eq!(as_number(&json!("abc")), None);
        assert_eq!(as_number(&json!(true)), None);
    }

    #[test]
    fn test_status_value() {
        assert_eq!(status_value(&json!(4)), json!("Alive"));
        assert_eq!(status_value(&json!("1")), json!("Asleep"));
        assert_eq!(status_value(&json!("Dead")), json!("Dead"));
    }

    #[test]
    fn test_number_value_keeps_integers() {
        assert_eq!(number_value(10.0), json!(10));
        assert_eq!(number_value(2.5), json!(2.5));
    }
}
