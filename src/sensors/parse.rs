//! Boundary parsing of loosely-typed state values.
//!
//! Home Assistant reports every state as a string and uses sentinel words for
//! missing data. Nothing past this module sees an unparsed value.

use serde_json::Value;

const MISSING_STATES: [&str; 4] = ["unknown", "unavailable", "none", "null"];

pub fn is_missing(raw: &str) -> bool {
    let s = raw.trim();
    s.is_empty() || MISSING_STATES.iter().any(|m| s.eq_ignore_ascii_case(m))
}

/// Parse a numeric state. Accepts a decimal comma.
pub fn parse_numeric(raw: Option<&str>) -> Option<f64> {
    let raw = raw?;
    if is_missing(raw) {
        return None;
    }
    let normalized = raw.trim().replace(',', ".");
    normalized.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Numeric value out of a JSON attribute, tolerating numbers sent as strings.
pub fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        Value::String(s) => parse_numeric(Some(s)),
        _ => None,
    }
}

/// Text state with sentinels mapped to `None`.
pub fn parse_text(raw: Option<&str>) -> Option<String> {
    let raw = raw?;
    if is_missing(raw) {
        None
    } else {
        Some(raw.trim().to_string())
    }
}
