//! Lowering into Argo's interpolation syntax
//!
//! Two targets:
//!
//! - [`render_text`]: the string placed in a manifest field. Constants render
//!   raw, plain references as simple tags (`{{inputs.parameters.x}}`), text
//!   forms as text with embedded tags, everything else as an expression tag
//!   `{{=...}}`.
//! - [`render_code`]: an `expr-lang` expression evaluating to the node's
//!   decoded value, used inside `{{=...}}`.
//!
//! Argo parameters always travel as strings. A reference declared with a
//! structured shape (object, array, number, bool) is JSON text and is decoded
//! with `fromJSON` when used as a value.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::error::Result;
use crate::types::Shape;

use super::eval::{self, as_text};
use super::node::{InfixOp, Node};
use super::path;
use super::template::{self, Segment};

static IDENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is valid"));

/// `base.name` or `base['name']`
fn member(base: &str, name: &str) -> String {
    if IDENT_RE.is_match(name) {
        format!("{}.{}", base, name)
    } else {
        format!("{}[{}]", base, quote(name))
    }
}

/// Single-quoted expr-lang string literal
pub fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out.push('\'');
    out
}

/// A constant written as expr-lang code
pub fn value_code(value: &Value) -> String {
    match value {
        Value::Null => "nil".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => quote(s),
        Value::Array(items) => format!(
            "[{}]",
            items.iter().map(value_code).collect::<Vec<_>>().join(", ")
        ),
        Value::Object(map) => format!(
            "{{{}}}",
            map.iter()
                .map(|(k, v)| format!("{}: {}", quote(k), value_code(v)))
                .collect::<Vec<_>>()
                .join(", ")
        ),
    }
}

/// Reference path as used inside both `{{...}}` and `{{=...}}`
fn reference_path(node: &Node, in_code: bool) -> Option<String> {
    let m = |base: &str, name: &str| {
        if in_code {
            member(base, name)
        } else {
            format!("{}.{}", base, name)
        }
    };
    Some(match node {
        Node::InputParam { name, .. } => m("inputs.parameters", name),
        Node::WorkflowParam { name, .. } => m("workflow.parameters", name),
        Node::WorkflowValue { key } => m("workflow", key),
        Node::StepOutput { step, output, .. } => {
            m(&format!("{}.outputs.parameters", m("steps", step)), output)
        }
        Node::TaskOutput { task, output, .. } => {
            m(&format!("{}.outputs.parameters", m("tasks", task)), output)
        }
        Node::StepId { step } => format!("{}.id", m("steps", step)),
        Node::Item { .. } => "item".to_string(),
        _ => return None,
    })
}

/// Simple `{{...}}` tag for a plain reference
pub fn reference_tag(node: &Node) -> Option<String> {
    reference_path(node, false).map(|p| format!("{{{{{}}}}}", p))
}

/// References whose runtime text must be decoded to obtain the value
fn decodes_to_value(node: &Node) -> bool {
    if !node.is_reference() || matches!(node, Node::Item { .. }) {
        return false;
    }
    matches!(
        node.shape(),
        Shape::Number | Shape::Bool | Shape::Object | Shape::Array(_) | Shape::Null
    )
}

fn is_text_shape(shape: &Shape) -> bool {
    matches!(shape, Shape::String | Shape::Serialized(_))
}

// ═══════════════════════════════════════════════════════════════
// TEXT
// ═══════════════════════════════════════════════════════════════

/// Manifest string for `node`
pub fn render_text(node: &Node) -> Result<String> {
    if let Some(value) = eval::fold(node)? {
        return Ok(as_text(&value));
    }
    if let Some(tag) = reference_tag(node) {
        return Ok(tag);
    }

    match node {
        Node::Concat(parts) => {
            let mut out = String::new();
            for part in parts {
                out.push_str(&render_text(part)?);
            }
            Ok(out)
        }
        Node::ConcatWith { sep, parts } => {
            let pieces = parts
                .iter()
                .map(|p| render_text(p))
                .collect::<Result<Vec<_>>>()?;
            Ok(pieces.join(sep))
        }
        Node::FillTemplate {
            template: text,
            subs,
        } => {
            let mut out = String::with_capacity(text.len());
            for segment in template::segments(text, |name| subs.contains_key(name)) {
                match segment {
                    Segment::Text(t) => out.push_str(t),
                    Segment::Placeholder(name) => {
                        if let Some(sub) = subs.get(name) {
                            out.push_str(&render_text(sub)?);
                        }
                    }
                }
            }
            Ok(out)
        }
        Node::AsString(inner) => render_text(inner),
        // Text of a decoded value is the JSON it was decoded from
        Node::Deserialize(inner) if is_text_shape(&inner.shape()) || inner.is_reference() => {
            render_text(inner)
        }
        Node::Serialize(inner) if inner.carries_json_text() => render_text(inner),
        Node::Serialize(inner) => match &**inner {
            Node::Deserialize(json) => render_text(json),
            _ => Ok(format!("{{{{={}}}}}", render_code(node)?)),
        },
        _ => {
            let code = render_code(node)?;
            match node.shape() {
                Shape::Object | Shape::Array(_) => Ok(format!("{{{{=toJSON({})}}}}", code)),
                _ => Ok(format!("{{{{={}}}}}", code)),
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════
// CODE
// ═══════════════════════════════════════════════════════════════

/// expr-lang code converting `node` to a string the way `as_string` does
pub fn text_code(node: &Node) -> Result<String> {
    let code = render_code(node)?;
    Ok(match node.shape() {
        s if is_text_shape(&s) => code,
        Shape::Object | Shape::Array(_) => format!("toJSON({})", code),
        _ => format!("string({})", code),
    })
}

/// expr-lang code evaluating to JSON text for `node`
fn json_code(node: &Node) -> Result<String> {
    if node.is_reference() && !matches!(node, Node::Item { .. }) {
        if let Some(p) = reference_path(node, true) {
            if node.carries_json_text() {
                return Ok(p);
            }
        }
    }
    if matches!(node.shape(), Shape::Serialized(_)) {
        return render_code(node);
    }
    Ok(format!("toJSON({})", render_code(node)?))
}

fn join_codes(nodes: &[super::NodeRef], f: fn(&Node) -> Result<String>) -> Result<Vec<String>> {
    nodes.iter().map(|n| f(n)).collect()
}

/// expr-lang code for the value of `node`
pub fn render_code(node: &Node) -> Result<String> {
    if let Some(value) = eval::fold(node)? {
        return Ok(value_code(&value));
    }
    if let Node::Item { sequence: true, .. } = node {
        return Ok("asInt(item)".to_string());
    }
    if let Some(p) = reference_path(node, true) {
        return Ok(if decodes_to_value(node) {
            format!("fromJSON({})", p)
        } else {
            p
        });
    }

    Ok(match node {
        Node::Get { base, key } => member(&render_code(base)?, key),
        Node::Dig {
            base,
            path: segments,
            default,
        } => {
            let mut code = render_code(base)?;
            for seg in segments {
                code = format!("get({}, {})", code, quote(seg));
            }
            format!("({} ?? {})", code, render_code(default)?)
        }
        Node::JsonPath { base, path: p } => {
            let canonical = path::to_jsonpath(&path::parse(p)?);
            format!("jsonpath({}, {})", json_code(base)?, quote(&canonical))
        }
        Node::MakeDict(entries) => {
            let mut fields = Vec::with_capacity(entries.len());
            for (k, v) in entries {
                fields.push(format!("{}: {}", quote(k), render_code(v)?));
            }
            format!("{{{}}}", fields.join(", "))
        }
        Node::ToArray(items) => format!("[{}]", join_codes(items, render_code)?.join(", ")),
        Node::MergeDicts(dicts) => {
            let mut args = vec!["{}".to_string()];
            args.extend(join_codes(dicts, render_code)?);
            format!("sprig.mergeOverwrite({})", args.join(", "))
        }
        Node::Omit { dict, keys } => {
            let mut args = vec![render_code(dict)?];
            args.extend(keys.iter().map(|k| quote(k)));
            format!("sprig.omit({})", args.join(", "))
        }
        Node::Concat(parts) => format!("({})", join_codes(parts, text_code)?.join(" + ")),
        Node::ConcatWith { sep, parts } => format!(
            "join([{}], {})",
            join_codes(parts, text_code)?.join(", "),
            quote(sep)
        ),
        Node::Join { array, sep } => format!("join({}, {})", render_code(array)?, quote(sep)),
        Node::AsString(inner) => text_code(inner)?,
        Node::ToBase64(inner) => format!("sprig.b64enc({})", text_code(inner)?),
        Node::FillTemplate {
            template: text,
            subs,
        } => {
            let mut pieces = Vec::new();
            for segment in template::segments(text, |name| subs.contains_key(name)) {
                match segment {
                    Segment::Text(t) => pieces.push(quote(t)),
                    Segment::Placeholder(name) => {
                        if let Some(sub) = subs.get(name) {
                            pieces.push(text_code(sub)?);
                        }
                    }
                }
            }
            if pieces.is_empty() {
                quote("")
            } else {
                format!("({})", pieces.join(" + "))
            }
        }
        Node::Ternary {
            cond,
            if_true,
            if_false,
        } => format!(
            "({} ? {} : {})",
            render_code(cond)?,
            render_code(if_true)?,
            render_code(if_false)?
        ),
        Node::Comparison { op, lhs, rhs } => format!(
            "({} {} {})",
            render_code(lhs)?,
            op.symbol(),
            render_code(rhs)?
        ),
        Node::Infix { op, lhs, rhs } => {
            if *op == InfixOp::Add && node.shape() == Shape::String {
                format!("({} + {})", text_code(lhs)?, text_code(rhs)?)
            } else {
                format!(
                    "({} {} {})",
                    render_code(lhs)?,
                    op.symbol(),
                    render_code(rhs)?
                )
            }
        }
        Node::Not(inner) => format!("!({})", render_code(inner)?),
        Node::IsEmpty(inner) => match reference_path(inner, true) {
            Some(p) if !matches!(&**inner, Node::Item { .. }) => {
                format!("({p} == '' || {p} == '[]' || {p} == '{{}}')")
            }
            _ => format!("(len({}) == 0)", render_code(inner)?),
        },
        Node::Serialize(inner) => match &**inner {
            Node::Deserialize(json) => render_code(json)?,
            _ => json_code(inner)?,
        },
        Node::Deserialize(inner) => match &**inner {
            Node::Serialize(value) => render_code(value)?,
            _ if decodes_to_value(inner) => render_code(inner)?,
            _ => match inner.shape() {
                Shape::Object | Shape::Array(_) | Shape::Number | Shape::Bool => {
                    render_code(inner)?
                }
                _ => format!("fromJSON({})", render_code(inner)?),
            },
        },
        // Constants and references returned above
        Node::Literal(_)
        | Node::Empty(_)
        | Node::InputParam { .. }
        | Node::WorkflowParam { .. }
        | Node::WorkflowValue { .. }
        | Node::StepOutput { .. }
        | Node::TaskOutput { .. }
        | Node::StepId { .. }
        | Node::Item { .. } => unreachable!("folded or referenced above"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{self, Expr};
    use crate::types::Record;
    use crate::{dict, exprs};
    use serde_json::json;
    use std::sync::Arc;

    fn input<T>(name: &str, shape: Shape) -> Expr<T> {
        Expr::from_node(Arc::new(Node::InputParam {
            name: name.into(),
            shape,
        }))
    }

    fn text<T>(e: &Expr<T>) -> String {
        render_text(e.node()).unwrap()
    }

    // ═══════════════════════════════════════════════════════════════
    // SIMPLE TAGS
    // ═══════════════════════════════════════════════════════════════

    #[test]
    fn test_reference_tags() {
        let p: Expr<String> = input("cluster-name", Shape::String);
        assert_eq!(text(&p), "{{inputs.parameters.cluster-name}}");
        assert_eq!(text(&expr::workflow_value("name")), "{{workflow.name}}");
        let out = Node::StepOutput {
            step: "create".into(),
            output: "id".into(),
            shape: Shape::String,
        };
        assert_eq!(
            render_text(&out).unwrap(),
            "{{steps.create.outputs.parameters.id}}"
        );
    }

    #[test]
    fn test_constant_renders_raw() {
        assert_eq!(text(&expr::literal("plain")), "plain");
        assert_eq!(text(&expr::literal(3i64)), "3");
        assert_eq!(text(&expr::literal(json!({"a": [1]}))), r#"{"a":[1]}"#);
    }

    // ═══════════════════════════════════════════════════════════════
    // TEXT FORMS
    // ═══════════════════════════════════════════════════════════════

    #[test]
    fn test_concat_embeds_tags() {
        let name: Expr<String> = input("name", Shape::String);
        let e = expr::concat(exprs!["pod/", &name, "-0"]);
        assert_eq!(text(&e), "pod/{{inputs.parameters.name}}-0");
    }

    #[test]
    fn test_fill_template_keeps_other_text() {
        let name: Expr<String> = input("name", Shape::String);
        let e = expr::fill_template(
            "echo ${X} {{NAME}} {{OTHER}}",
            dict! {"NAME" => &name},
        );
        assert_eq!(text(&e), "echo ${X} {{inputs.parameters.name}} {{OTHER}}");
    }

    #[test]
    fn test_serialize_of_json_reference_collapses() {
        let cfg: Expr<Record> = input("cfg", Shape::Object);
        let e = expr::serialize(cfg);
        assert_eq!(text(&e), "{{inputs.parameters.cfg}}");
    }

    // ═══════════════════════════════════════════════════════════════
    // EXPRESSION TAGS
    // ═══════════════════════════════════════════════════════════════

    #[test]
    fn test_dig_lowers_to_nil_coalesce() {
        let cfg: Expr<Record> = input("cfg", Shape::Object);
        let e: Expr<bool> = expr::dig(&cfg, &["repoConfig", "useLocalStack"], false);
        assert_eq!(
            text(&e),
            "{{=(get(get(fromJSON(inputs.parameters.cfg), 'repoConfig'), 'useLocalStack') ?? false)}}"
        );
    }

    #[test]
    fn test_json_path_strict_uses_raw_text() {
        let cfg: Expr<Record> = input("cfg", Shape::Object);
        let e = expr::json_path_strict(&cfg, "version");
        assert_eq!(
            text(&e),
            "{{=jsonpath(inputs.parameters.cfg, '$.version')}}"
        );
    }

    #[test]
    fn test_ternary_and_comparison() {
        let n: Expr<i64> = input("n", Shape::Number);
        let e = expr::ternary(expr::gt(&n, 1), expr::literal("many"), expr::literal("one"));
        assert_eq!(
            text(&e),
            "{{=((fromJSON(inputs.parameters.n) > 1) ? 'many' : 'one')}}"
        );
    }

    #[test]
    fn test_merge_renders_json_text() {
        let cfg: Expr<Record> = input("cfg", Shape::Object);
        let e = expr::merge_dicts(exprs![&cfg, expr::literal(json!({"x": 1}))]);
        assert_eq!(
            text(&e),
            "{{=toJSON(sprig.mergeOverwrite({}, fromJSON(inputs.parameters.cfg), {'x': 1}))}}"
        );
    }

    #[test]
    fn test_roundtrip_collapses() {
        let cfg: Expr<Record> = input("cfg", Shape::Object);
        let e = expr::deserialize(expr::serialize(cfg));
        assert_eq!(render_code(e.node()).unwrap(), "fromJSON(inputs.parameters.cfg)");
    }

    #[test]
    fn test_is_empty_on_reference() {
        let s: Expr<String> = input("s", Shape::String);
        let e = expr::not(expr::is_empty(&s));
        assert_eq!(
            render_code(e.node()).unwrap(),
            "!((inputs.parameters.s == '' || inputs.parameters.s == '[]' || inputs.parameters.s == '{}'))"
        );
    }

    #[test]
    fn test_sequence_item_read_as_int_in_code() {
        let item = |sequence| -> Expr<i64> {
            Expr::from_node(Arc::new(Node::Item {
                shape: Shape::Number,
                sequence,
            }))
        };
        assert_eq!(text(&item(true)), "{{item}}");
        assert!(text(&expr::gt(item(true), 1)).contains("asInt(item) > 1"));
        assert!(!text(&expr::gt(item(false), 1)).contains("asInt"));
    }

    #[test]
    fn test_quote_escapes() {
        assert_eq!(quote("it's"), r"'it\'s'");
        assert_eq!(quote("a\\b"), r"'a\\b'");
    }

    #[test]
    fn test_bracket_member_for_dashed_names() {
        let p: Expr<String> = input("cluster-name", Shape::String);
        let e = expr::to_base64(&p);
        assert_eq!(
            text(&e),
            "{{=sprig.b64enc(inputs.parameters['cluster-name'])}}"
        );
    }
}
