//! Field extraction from raw upstream JSON.
//!
//! XML-derived payloads carry every leaf as a string; native JSON payloads
//! carry typed values. The helpers below accept both so one mapper serves
//! either wire format, and a failed extraction maps the record to "drop",
//! never to a default value.

use rust_decimal::Decimal;
use serde_json::Value;
use uuid::Uuid;

pub fn get_str(v: &Value, key: &str) -> Option<String> {
    match v.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub fn get_uuid(v: &Value, key: &str) -> Option<Uuid> {
    get_str(v, key)?.parse().ok()
}

pub fn get_opt_uuid(v: &Value, key: &str) -> Option<Uuid> {
    get_uuid(v, key)
}

pub fn get_bool(v: &Value, key: &str) -> bool {
    match v.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.trim() == "true" || s.trim() == "1",
        _ => false,
    }
}

pub fn get_i64(v: &Value, key: &str) -> Option<i64> {
    match v.get(key)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn get_decimal(v: &Value, key: &str) -> Option<Decimal> {
    match v.get(key)? {
        Value::Number(n) => n.to_string().parse().ok(),
        Value::String(s) => s.trim().replace(',', ".").parse().ok(),
        _ => None,
    }
}

/// First present key wins; upstream renames fields between API versions.
pub fn get_str_any(v: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| get_str(v, k))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn strings_and_numbers_both_extract() {
        let v = json!({"id": "42", "n": 42, "price": "12,50", "p2": 12.5});
        assert_eq!(get_i64(&v, "id"), Some(42));
        assert_eq!(get_i64(&v, "n"), Some(42));
        assert_eq!(get_decimal(&v, "price"), Some(dec!(12.50)));
        assert_eq!(get_decimal(&v, "p2"), Some(dec!(12.5)));
    }

    #[test]
    fn xml_style_bools() {
        let v = json!({"a": "true", "b": true, "c": "false", "d": {"nested": 1}});
        assert!(get_bool(&v, "a"));
        assert!(get_bool(&v, "b"));
        assert!(!get_bool(&v, "c"));
        assert!(!get_bool(&v, "d"));
        assert!(!get_bool(&v, "missing"));
    }

    #[test]
    fn empty_strings_are_absent() {
        let v = json!({"code": "  "});
        assert_eq!(get_str(&v, "code"), None);
    }

    #[test]
    fn first_present_alias_wins() {
        let v = json!({"mainUnit": "кг"});
        assert_eq!(
            get_str_any(&v, &["measureUnit", "mainUnit"]).as_deref(),
            Some("кг")
        );
    }
}
