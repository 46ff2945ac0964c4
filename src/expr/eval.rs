//! Constant folding
//!
//! `fold` evaluates an expression whose leaves are all literals. Anything
//! that depends on a runtime lookup (parameters, step outputs, the loop item)
//! returns `Ok(None)` and is left for the orchestrator to evaluate.
//!
//! Folding is where the strict operators fail: a `json_path_strict` on a
//! constant that lacks the path is a render error, while `dig` on the same
//! value quietly yields its default.

use base64::encode as b64encode;
use serde_json::{Map, Number, Value};

use crate::error::{ForgeError, Result};
use crate::types::Shape;

use super::node::{CompareOp, InfixOp, Node};
use super::path;
use super::template;

/// Text form of a value: strings verbatim, everything else compact JSON
pub fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Canonical empty value for a shape
pub fn empty_value(shape: &Shape) -> Value {
    match shape.decoded() {
        Shape::Array(_) => Value::Array(Vec::new()),
        Shape::Object => Value::Object(Map::new()),
        _ => Value::String(String::new()),
    }
}

/// Emptiness as the rendered manifest checks it
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty() || s == "[]" || s == "{}",
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn mismatch(path: &str, expected: &str, actual: &Value) -> ForgeError {
    ForgeError::TypeMismatch {
        path: path.to_string(),
        expected: expected.to_string(),
        actual: type_name(actual).to_string(),
    }
}

/// Fold every node in `nodes`, `None` if any of them is dynamic
fn fold_all<'a>(nodes: impl IntoIterator<Item = &'a super::NodeRef>) -> Result<Option<Vec<Value>>> {
    let mut out = Vec::new();
    for node in nodes {
        match fold(node)? {
            Some(v) => out.push(v),
            None => return Ok(None),
        }
    }
    Ok(Some(out))
}

/// Recursive merge, right-hand side wins on conflicts
pub fn deep_merge(target: &mut Value, overlay: Value) {
    match (target, overlay) {
        (Value::Object(dst), Value::Object(src)) => {
            for (k, v) in src {
                match dst.get_mut(&k) {
                    Some(existing) if existing.is_object() && v.is_object() => {
                        deep_merge(existing, v)
                    }
                    _ => {
                        dst.insert(k, v);
                    }
                }
            }
        }
        (slot, other) => *slot = other,
    }
}

/// Decode a JSON-bearing constant
fn decode(value: Value) -> Result<Value> {
    match value {
        Value::String(s) => serde_json::from_str(&s).map_err(|e| ForgeError::InvalidJson {
            details: format!("{}: {}", e, truncate(&s)),
        }),
        structured => Ok(structured),
    }
}

fn truncate(s: &str) -> String {
    if s.chars().count() > 40 {
        format!("{}…", s.chars().take(40).collect::<String>())
    } else {
        s.to_string()
    }
}

fn compare(op: CompareOp, lhs: &Value, rhs: &Value) -> Result<bool> {
    if let (Some(a), Some(b)) = (lhs.as_f64(), rhs.as_f64()) {
        return Ok(match op {
            CompareOp::Eq => a == b,
            CompareOp::Ne => a != b,
            CompareOp::Lt => a < b,
            CompareOp::Le => a <= b,
            CompareOp::Gt => a > b,
            CompareOp::Ge => a >= b,
        });
    }
    match op {
        CompareOp::Eq => Ok(lhs == rhs),
        CompareOp::Ne => Ok(lhs != rhs),
        _ => match (lhs, rhs) {
            (Value::String(a), Value::String(b)) => Ok(match op {
                CompareOp::Lt => a < b,
                CompareOp::Le => a <= b,
                CompareOp::Gt => a > b,
                _ => a >= b,
            }),
            _ => Err(mismatch(op.symbol(), "comparable operands", lhs)),
        },
    }
}

fn arithmetic(op: InfixOp, lhs: &Value, rhs: &Value) -> Result<Option<Value>> {
    if op == InfixOp::Add && (lhs.is_string() || rhs.is_string()) {
        return Ok(Some(Value::String(format!(
            "{}{}",
            as_text(lhs),
            as_text(rhs)
        ))));
    }

    if let (Some(a), Some(b)) = (lhs.as_i64(), rhs.as_i64()) {
        let result = match op {
            InfixOp::Add => a.checked_add(b),
            InfixOp::Sub => a.checked_sub(b),
            InfixOp::Mul => a.checked_mul(b),
            // Non-integral, overflowing or division by zero: fall through to floats
            InfixOp::Div => match a.checked_rem(b) {
                Some(0) => a.checked_div(b),
                _ => None,
            },
            InfixOp::Mod => a.checked_rem(b),
        };
        if let Some(r) = result {
            return Ok(Some(Value::from(r)));
        }
    }

    let (Some(a), Some(b)) = (lhs.as_f64(), rhs.as_f64()) else {
        let bad = if lhs.is_number() { rhs } else { lhs };
        return Err(mismatch(op.symbol(), "number", bad));
    };
    let result = match op {
        InfixOp::Add => a + b,
        InfixOp::Sub => a - b,
        InfixOp::Mul => a * b,
        InfixOp::Div => a / b,
        InfixOp::Mod => a % b,
    };
    // Leave NaN/inf for the runtime to report
    Ok(Number::from_f64(result).map(Value::Number))
}

/// Evaluate `node` if it is fully constant
pub fn fold(node: &Node) -> Result<Option<Value>> {
    let value = match node {
        Node::Literal(v) => v.clone(),
        Node::Empty(shape) => empty_value(shape),

        Node::InputParam { .. }
        | Node::WorkflowParam { .. }
        | Node::WorkflowValue { .. }
        | Node::StepOutput { .. }
        | Node::TaskOutput { .. }
        | Node::StepId { .. }
        | Node::Item { .. } => return Ok(None),

        Node::Get { base, key } => {
            let Some(base) = fold(base)? else {
                return Ok(None);
            };
            match base.as_object().and_then(|o| o.get(key)) {
                Some(v) => v.clone(),
                None => return Err(ForgeError::PathNotFound { path: key.clone() }),
            }
        }

        Node::Dig {
            base,
            path: segments,
            default,
        } => {
            let Some(base) = fold(base)? else {
                return Ok(None);
            };
            match path::lookup(&base, segments) {
                Some(found) if !found.is_null() => found.clone(),
                _ => return fold(default),
            }
        }

        Node::JsonPath { base, path: p } => {
            let Some(base) = fold(base)? else {
                return Ok(None);
            };
            let base = decode(base)?;
            let segments = path::parse(p)?;
            match path::apply(&base, &segments) {
                Some(found) => found.clone(),
                None => return Err(ForgeError::PathNotFound { path: p.clone() }),
            }
        }

        Node::MakeDict(entries) => {
            let mut map = Map::new();
            for (key, value) in entries {
                let Some(v) = fold(value)? else {
                    return Ok(None);
                };
                map.insert(key.clone(), v);
            }
            Value::Object(map)
        }

        Node::ToArray(items) => match fold_all(items)? {
            Some(values) => Value::Array(values),
            None => return Ok(None),
        },

        Node::MergeDicts(dicts) => {
            let Some(values) = fold_all(dicts)? else {
                return Ok(None);
            };
            let mut merged = Value::Object(Map::new());
            for v in values {
                if !v.is_object() {
                    return Err(mismatch("mergeDicts", "object", &v));
                }
                deep_merge(&mut merged, v);
            }
            merged
        }

        Node::Omit { dict, keys } => {
            let Some(v) = fold(dict)? else {
                return Ok(None);
            };
            let Value::Object(mut map) = v else {
                return Err(mismatch("omit", "object", &v));
            };
            for key in keys {
                map.remove(key);
            }
            Value::Object(map)
        }

        Node::Concat(parts) => match fold_all(parts)? {
            Some(values) => Value::String(values.iter().map(as_text).collect()),
            None => return Ok(None),
        },

        Node::ConcatWith { sep, parts } => match fold_all(parts)? {
            Some(values) => Value::String(
                values
                    .iter()
                    .map(as_text)
                    .collect::<Vec<_>>()
                    .join(sep),
            ),
            None => return Ok(None),
        },

        Node::Join { array, sep } => {
            let Some(v) = fold(array)? else {
                return Ok(None);
            };
            let Value::Array(items) = v else {
                return Err(mismatch("join", "array", &v));
            };
            Value::String(items.iter().map(as_text).collect::<Vec<_>>().join(sep))
        }

        Node::AsString(inner) => match fold(inner)? {
            Some(v) => Value::String(as_text(&v)),
            None => return Ok(None),
        },

        Node::ToBase64(inner) => match fold(inner)? {
            Some(v) => Value::String(b64encode(as_text(&v))),
            None => return Ok(None),
        },

        Node::FillTemplate {
            template: text,
            subs,
        } => {
            let mut rendered = Vec::with_capacity(subs.len());
            for (name, sub) in subs {
                let Some(v) = fold(sub)? else {
                    return Ok(None);
                };
                rendered.push((name.as_str(), as_text(&v)));
            }
            Value::String(template::fill(text, |name| {
                rendered
                    .iter()
                    .find(|(n, _)| *n == name)
                    .map(|(_, v)| v.as_str())
            }))
        }

        Node::Ternary {
            cond,
            if_true,
            if_false,
        } => {
            let Some(c) = fold(cond)? else {
                return Ok(None);
            };
            match c {
                Value::Bool(true) => return fold(if_true),
                Value::Bool(false) => return fold(if_false),
                other => {
                    return Err(ForgeError::NonBooleanCondition {
                        path: "ternary".to_string(),
                        actual: type_name(&other).to_string(),
                    })
                }
            }
        }

        Node::Comparison { op, lhs, rhs } => {
            let (Some(l), Some(r)) = (fold(lhs)?, fold(rhs)?) else {
                return Ok(None);
            };
            Value::Bool(compare(*op, &l, &r)?)
        }

        Node::Infix { op, lhs, rhs } => {
            let (Some(l), Some(r)) = (fold(lhs)?, fold(rhs)?) else {
                return Ok(None);
            };
            return arithmetic(*op, &l, &r);
        }

        Node::Not(inner) => match fold(inner)? {
            Some(Value::Bool(b)) => Value::Bool(!b),
            Some(other) => {
                return Err(ForgeError::NonBooleanCondition {
                    path: "not".to_string(),
                    actual: type_name(&other).to_string(),
                })
            }
            None => return Ok(None),
        },

        Node::IsEmpty(inner) => match fold(inner)? {
            Some(v) => Value::Bool(is_empty_value(&v)),
            None => return Ok(None),
        },

        Node::Serialize(inner) => match fold(inner)? {
            Some(v) => Value::String(serde_json::to_string(&v)?),
            None => return Ok(None),
        },

        Node::Deserialize(inner) => match fold(inner)? {
            Some(v) => decode(v)?,
            None => return Ok(None),
        },
    };

    Ok(Some(value))
}
