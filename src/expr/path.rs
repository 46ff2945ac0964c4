//! Minimal JSONPath handling for `get`, `dig` and `json_path_strict`
//!
//! Supports:
//! - $.a.b.c (dot notation)
//! - $.a[0].b (array index)
//! - a.b.c (without $ prefix)
//!
//! Does NOT support filters, wildcards or slices.

use serde_json::Value;

use crate::error::ForgeError;

/// A parsed path segment
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    /// Object field access: .field
    Field(String),
    /// Array index access: [0]
    Index(usize),
}

/// Parse a path string into segments
///
/// Examples:
/// - "$.price.currency" → [Field("price"), Field("currency")]
/// - "items[0].name" → [Field("items"), Index(0), Field("name")]
pub fn parse(path: &str) -> Result<Vec<Segment>, ForgeError> {
    let body = if let Some(rest) = path.strip_prefix("$.") {
        rest
    } else if path == "$" {
        return Ok(vec![]);
    } else {
        path
    };

    if body.is_empty() {
        return Ok(vec![]);
    }

    let unsupported = || ForgeError::UnsupportedPath {
        path: path.to_string(),
    };

    let mut segments = Vec::new();
    for part in body.split('.') {
        if part.is_empty() {
            return Err(unsupported());
        }

        if let Some(bracket_pos) = part.find('[') {
            let field = &part[..bracket_pos];
            if !field.is_empty() {
                segments.push(Segment::Field(field.to_string()));
            }
            if !part.ends_with(']') {
                return Err(unsupported());
            }
            // field[0][1] chains
            for index in part[bracket_pos + 1..part.len() - 1].split("][") {
                let index: usize = index.parse().map_err(|_| unsupported())?;
                segments.push(Segment::Index(index));
            }
        } else {
            segments.push(Segment::Field(part.to_string()));
        }
    }

    Ok(segments)
}

/// Walk `segments` from `value` by reference
pub fn apply<'v>(value: &'v Value, segments: &[Segment]) -> Option<&'v Value> {
    let mut current = value;
    for segment in segments {
        current = match segment {
            Segment::Field(name) => current.as_object()?.get(name)?,
            Segment::Index(idx) => current.as_array()?.get(*idx)?,
        };
    }
    Some(current)
}

/// Walk untyped keys, reading a key as an index whenever the value reached so far is an array
pub fn lookup<'v>(value: &'v Value, keys: &[String]) -> Option<&'v Value> {
    keys.iter().try_fold(value, |current, key| match current {
        Value::Array(items) => items.get(key.parse::<usize>().ok()?),
        Value::Object(fields) => fields.get(key),
        _ => None,
    })
}

/// Canonical `$.a.b[0]` spelling for the orchestrator's `jsonpath()` function
pub fn to_jsonpath(segments: &[Segment]) -> String {
    let mut out = String::from("$");
    for segment in segments {
        match segment {
            Segment::Field(name) => {
                out.push('.');
                out.push_str(name);
            }
            Segment::Index(idx) => {
                out.push('[');
                out.push_str(&idx.to_string());
                out.push(']');
            }
        }
    }
    out
}
