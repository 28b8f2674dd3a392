//! Response extraction policies and `Replace` map handling.

use reqchain_types::FieldKey;
use serde_json::Value;

/// Why a `json:<path>` extraction produced nothing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtractError {
    #[error("response is not valid JSON: {0}")]
    NotJson(String),

    #[error("path segment {segment:?} not found")]
    MissingSegment { segment: String },

    #[error("extraction produced no bytes")]
    Empty,
}

/// `none` policy: drop JSON structural punctuation and whitespace outside
/// string literals, keeping string contents as written.
pub fn flatten(raw: &[u8], out: &mut Vec<u8>) {
    let mut in_string = false;
    let mut escaped = false;
    for &b in raw {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
                continue;
            }
            out.push(b);
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' | b'}' | b'[' | b']' | b':' | b',' => {}
            b if b.is_ascii_whitespace() => {}
            b => out.push(b),
        }
    }
}

/// `json:<path>` policy: walk `raw` by dotted key or array index and write
/// the leaf. String leaves have `"` remapped to `'`; other leaves are
/// re-serialized as JSON.
///
/// # Errors
///
/// Fails if `raw` is not JSON, a segment is missing, or the leaf is empty.
pub fn json_path(raw: &[u8], path: &str, out: &mut Vec<u8>) -> Result<(), ExtractError> {
    let root: Value =
        serde_json::from_slice(raw).map_err(|e| ExtractError::NotJson(e.to_string()))?;

    let mut node = &root;
    for segment in path.split('.') {
        let next = match node {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        };
        node = next.ok_or_else(|| ExtractError::MissingSegment {
            segment: segment.to_string(),
        })?;
    }

    let start = out.len();
    match node {
        Value::String(s) => out.extend(s.bytes().map(|b| if b == b'"' { b'\'' } else { b })),
        other => out.extend_from_slice(other.to_string().as_bytes()),
    }
    if out.len() == start {
        return Err(ExtractError::Empty);
    }
    Ok(())
}

/// Append `bytes` escaped for use inside a JSON string literal.
pub fn json_escape(bytes: &[u8], out: &mut Vec<u8>) {
    for &b in bytes {
        match b {
            b'"' => out.extend_from_slice(b"\\\""),
            b'\\' => out.extend_from_slice(b"\\\\"),
            b'\n' => out.extend_from_slice(b"\\n"),
            b'\r' => out.extend_from_slice(b"\\r"),
            b'\t' => out.extend_from_slice(b"\\t"),
            b if b < 0x20 => out.extend_from_slice(format!("\\u{b:04x}").as_bytes()),
            b => out.push(b),
        }
    }
}

// ---------------------------------------------------------------------------
// Replace map
// ---------------------------------------------------------------------------

/// Parsed `Replace` document of a repeat record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    /// Known field overrides, in key order.
    pub fields: Vec<(FieldKey, Vec<u8>)>,
    /// Keys that name no payload field.
    pub unknown: Vec<String>,
}

/// Parse a `Replace` value: a JSON object mapping field names
/// (case-insensitive) to string values. An empty value means no overrides.
///
/// # Errors
///
/// Returns a description of the problem if the value is not a JSON object
/// of strings.
pub fn parse_replace(raw: &[u8]) -> Result<Overrides, String> {
    if raw.trim_ascii().is_empty() {
        return Ok(Overrides::default());
    }
    let value: Value = serde_json::from_slice(raw).map_err(|e| e.to_string())?;
    let Value::Object(map) = value else {
        return Err("expected a JSON object".to_string());
    };

    let mut overrides = Overrides::default();
    for (key, value) in map {
        let Value::String(text) = value else {
            return Err(format!("value of {key:?} is not a string"));
        };
        match FieldKey::from_key(key.as_bytes()) {
            Some(FieldKey::Replace) | None => overrides.unknown.push(key),
            Some(field) => overrides.fields.push((field, text.into_bytes())),
        }
    }
    Ok(overrides)
}
