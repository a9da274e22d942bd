//! JSON attribute helpers.

use serde_json::Value;

use crate::{Error, Result};

/// Accepts only a JSON object such as `{"x": "y"}`.
pub fn must_json_object(raw: &str) -> Result<()> {
    if raw.trim().is_empty() {
        return Err(Error::InvalidAttributes {
            reason: "must not be empty".to_string(),
        });
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(_)) => Ok(()),
        Ok(Value::Array(_)) => Err(Error::InvalidAttributes {
            reason: "JSON lists are not allowed".to_string(),
        }),
        Ok(_) => Err(Error::InvalidAttributes {
            reason: "attribute must be a JSON object".to_string(),
        }),
        Err(e) => Err(Error::InvalidAttributes {
            reason: format!("attribute must be a JSON object: {e}"),
        }),
    }
}

/// True when both strings parse to the same JSON value, ignoring key order
/// and formatting. Unparsable input is never equivalent.
pub fn equivalent_json(a: &str, b: &str) -> bool {
    match (
        serde_json::from_str::<Value>(a),
        serde_json::from_str::<Value>(b),
    ) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
