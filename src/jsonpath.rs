//! Restricted JSON-path evaluation for body-inspecting conditions.
//!
//! The grammar is deliberately small: `.name` descends into an object
//! field (keys are ASCII letters, digits, `_` and `-`), `[n]` indexes an
//! array, and segments concatenate as in `.a.b[0].c`. A path must start
//! with `.`; the empty path selects the whole document.

use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("body is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("no value at path segment `{segment}`")]
    PathNotFound { segment: String },
    #[error("malformed path at byte {position}")]
    MalformedPath { position: usize },
}

fn is_key_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-'
}

/// Evaluate `path` against a JSON document and return the selected node.
/// The node is handed back decoded; callers compare it through
/// [`coerce_string`] or by JSON value, never byte-for-byte.
pub fn json_query(body: &[u8], path: &str) -> Result<Value, QueryError> {
    let mut current: Value = serde_json::from_slice(body)?;
    let bytes = path.as_bytes();
    let mut position = 0;

    while position < bytes.len() {
        match bytes[position] {
            b'.' => {
                position += 1;
                let start = position;
                while position < bytes.len() && is_key_byte(bytes[position]) {
                    position += 1;
                }
                if position == start {
                    return Err(QueryError::MalformedPath { position: start });
                }
                let key = &path[start..position];
                current = match current {
                    Value::Object(mut map) => {
                        map.remove(key).ok_or_else(|| QueryError::PathNotFound {
                            segment: key.to_string(),
                        })?
                    }
                    _ => {
                        return Err(QueryError::PathNotFound {
                            segment: key.to_string(),
                        })
                    }
                };
            }
            b'[' if position > 0 => {
                position += 1;
                let start = position;
                while position < bytes.len() && bytes[position].is_ascii_digit() {
                    position += 1;
                }
                if position == start || position >= bytes.len() || bytes[position] != b']' {
                    return Err(QueryError::MalformedPath { position });
                }
                let index: usize = path[start..position]
                    .parse()
                    .map_err(|_| QueryError::MalformedPath { position: start })?;
                position += 1;
                current = match current {
                    Value::Array(mut items) if index < items.len() => items.swap_remove(index),
                    _ => {
                        return Err(QueryError::PathNotFound {
                            segment: format!("[{index}]"),
                        })
                    }
                };
            }
            _ => return Err(QueryError::MalformedPath { position }),
        }
    }

    Ok(current)
}

/// Coerce a selected node into its string form: JSON strings are unquoted,
/// arrays and objects keep their canonical JSON encoding, and scalars use
/// their textual form.
pub fn coerce_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}
