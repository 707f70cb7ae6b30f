use rusqlite::Connection;
use serde_json::Value;

use super::error::{bad_params, no_workspace};
use super::types::AppState;

/// Open connection, or the canned no-workspace error response.
pub fn require_db<'a>(state: &'a AppState, id: &str) -> Result<&'a Connection, Value> {
    state.db.as_ref().ok_or_else(|| no_workspace(id))
}

/// Required, non-blank string param.
pub fn require_str(req_id: &str, params: &Value, key: &str) -> Result<String, Value> {
    match params.get(key).and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(bad_params(req_id, format!("missing {}", key))),
    }
}

/// Optional string param; blank counts as absent. Numbers are accepted
/// the way the import pipeline accepts them.
pub fn opt_str(params: &Value, key: &str) -> Option<String> {
    match params.get(key)? {
        Value::String(s) => {
            let t = s.trim();
            if t.is_empty() {
                None
            } else {
                Some(t.to_string())
            }
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub fn opt_bool(params: &Value, key: &str) -> Option<bool> {
    params.get(key).and_then(|v| v.as_bool())
}

pub fn opt_i64(params: &Value, key: &str) -> Option<i64> {
    params.get(key).and_then(|v| v.as_i64())
}
