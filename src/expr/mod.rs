//! Expression algebra
//!
//! Expressions describe values the orchestrator computes at run time. Building
//! one never evaluates anything: each constructor wraps its operands in a new
//! immutable [`Node`] and returns an [`Expr<T>`] handle. `T` is a phantom; it
//! lets the compiler follow a parameter's declared type through the builder
//! without any runtime payload.
//!
//! ```text
//!   expr::concat(exprs!["pod/", name, "-0"])
//!        │
//!        ▼
//!   Node::Concat ─┬─ Literal("pod/")
//!                 ├─ InputParam { name }
//!                 └─ Literal("-0")
//!        │
//!        ▼  lower::render_text
//!   "pod/{{inputs.parameters.name}}-0"
//! ```

pub mod eval;
pub mod lower;
pub mod node;
pub mod path;
pub mod template;

use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use serde_json::Value;

use crate::types::{Record, Serialized, Shape, Shaped};

pub use node::{CompareOp, InfixOp, Node, NodeRef};

/// Typed handle over an expression tree
pub struct Expr<T = Value> {
    node: NodeRef,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Expr<T> {
    fn clone(&self) -> Self {
        Self::from_node(self.node.clone())
    }
}

impl<T> fmt::Debug for Expr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Expr").field(&self.node).finish()
    }
}

impl<T> PartialEq for Expr<T> {
    fn eq(&self, other: &Self) -> bool {
        self.node == other.node
    }
}

impl<T> Expr<T> {
    pub fn from_node(node: NodeRef) -> Self {
        Self {
            node,
            _marker: PhantomData,
        }
    }

    fn wrap(node: Node) -> Self {
        Self::from_node(Arc::new(node))
    }

    pub fn node(&self) -> &NodeRef {
        &self.node
    }

    pub fn shape(&self) -> Shape {
        self.node.shape()
    }

    /// Drop the static type
    pub fn erase(&self) -> Expr {
        Expr::from_node(self.node.clone())
    }

    /// Reinterpret as another static type
    ///
    /// Only the phantom changes; validation still checks the inferred shape.
    pub fn cast<U>(self) -> Expr<U> {
        Expr::from_node(self.node)
    }
}

impl<T> fmt::Display for Expr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.node.fmt(f)
    }
}

// ═══════════════════════════════════════════════════════════════
// CONVERSIONS
// ═══════════════════════════════════════════════════════════════

/// Anything usable as an operand
pub trait IntoExpr {
    fn into_node(self) -> NodeRef;
}

impl<T> IntoExpr for Expr<T> {
    fn into_node(self) -> NodeRef {
        self.node
    }
}

impl<T> IntoExpr for &Expr<T> {
    fn into_node(self) -> NodeRef {
        self.node.clone()
    }
}

impl IntoExpr for NodeRef {
    fn into_node(self) -> NodeRef {
        self
    }
}

macro_rules! literal_operand {
    ($($ty:ty => $typed:ty),+ $(,)?) => {
        $(
            impl IntoExpr for $ty {
                fn into_node(self) -> NodeRef {
                    Arc::new(Node::Literal(Value::from(self)))
                }
            }

            impl From<$ty> for Expr<$typed> {
                fn from(v: $ty) -> Self {
                    Expr::from_node(v.into_node())
                }
            }
        )+
    };
}

literal_operand!(
    &str => String,
    String => String,
    bool => bool,
    i32 => i64,
    i64 => i64,
    u32 => i64,
    f64 => f64,
    Value => Value,
);

/// Constant values accepted by [`literal`]
pub trait IntoLiteral {
    type Type;
    fn into_value(self) -> Value;
}

macro_rules! into_literal {
    ($($ty:ty => $typed:ty),+ $(,)?) => {
        $(impl IntoLiteral for $ty {
            type Type = $typed;
            fn into_value(self) -> Value {
                Value::from(self)
            }
        })+
    };
}

into_literal!(
    &str => String,
    String => String,
    bool => bool,
    i32 => i64,
    i64 => i64,
    u32 => i64,
    f64 => f64,
    Value => Value,
);

impl<V: IntoLiteral> IntoLiteral for Vec<V> {
    type Type = Vec<V::Type>;
    fn into_value(self) -> Value {
        Value::Array(self.into_iter().map(IntoLiteral::into_value).collect())
    }
}

impl<V: IntoLiteral> IntoLiteral for BTreeMap<String, V> {
    type Type = Record;
    fn into_value(self) -> Value {
        Value::Object(
            self.into_iter()
                .map(|(k, v)| (k, v.into_value()))
                .collect(),
        )
    }
}

/// Build a `Vec<NodeRef>` from mixed operands
#[macro_export]
macro_rules! exprs {
    ($($e:expr),* $(,)?) => {
        vec![$($crate::expr::IntoExpr::into_node($e)),*]
    };
}

/// Build `(key, operand)` entries for `make_dict` and `fill_template`
#[macro_export]
macro_rules! dict {
    ($($k:expr => $v:expr),* $(,)?) => {
        vec![$((::std::string::String::from($k), $crate::expr::IntoExpr::into_node($v))),*]
    };
}

// ═══════════════════════════════════════════════════════════════
// CONSTRUCTORS
// ═══════════════════════════════════════════════════════════════

pub fn literal<V: IntoLiteral>(value: V) -> Expr<V::Type> {
    Expr::wrap(Node::Literal(value.into_value()))
}

/// Sentinel that renders as the empty form of `T` ("" / [] / {})
pub fn empty<T: Shaped>() -> Expr<T> {
    Expr::wrap(Node::Empty(T::shape()))
}

pub fn is_empty(e: impl IntoExpr) -> Expr<bool> {
    Expr::wrap(Node::IsEmpty(e.into_node()))
}

pub fn not(e: impl IntoExpr) -> Expr<bool> {
    Expr::wrap(Node::Not(e.into_node()))
}

/// String concatenation; non-string operands are stringified like `as_string`
pub fn concat(parts: impl IntoIterator<Item = NodeRef>) -> Expr<String> {
    Expr::wrap(Node::Concat(parts.into_iter().collect()))
}

pub fn concat_with(sep: &str, parts: impl IntoIterator<Item = NodeRef>) -> Expr<String> {
    Expr::wrap(Node::ConcatWith {
        sep: sep.to_string(),
        parts: parts.into_iter().collect(),
    })
}

/// Join the elements of an array-valued expression
pub fn join(array: impl IntoExpr, sep: &str) -> Expr<String> {
    Expr::wrap(Node::Join {
        array: array.into_node(),
        sep: sep.to_string(),
    })
}

/// Field lookup on a record
pub fn get(base: impl IntoExpr, key: &str) -> Expr {
    Expr::wrap(Node::Get {
        base: base.into_node(),
        key: key.to_string(),
    })
}

/// Forgiving nested lookup: any absent segment yields `default`
pub fn dig<T>(base: impl IntoExpr, path: &[&str], default: impl Into<Expr<T>>) -> Expr<T> {
    Expr::wrap(Node::Dig {
        base: base.into_node(),
        path: path.iter().map(|s| s.to_string()).collect(),
        default: default.into().node,
    })
}

/// Strict lookup; an absent path is a render failure
pub fn json_path_strict(base: impl IntoExpr, path: &str) -> Expr {
    Expr::wrap(Node::JsonPath {
        base: base.into_node(),
        path: path.to_string(),
    })
}

pub fn make_dict(entries: Vec<(String, NodeRef)>) -> Expr<Record> {
    Expr::wrap(Node::MakeDict(entries))
}

pub fn to_array(items: impl IntoIterator<Item = NodeRef>) -> Expr<Vec<Value>> {
    Expr::wrap(Node::ToArray(items.into_iter().collect()))
}

/// Deep merge; later dictionaries win
pub fn merge_dicts(dicts: impl IntoIterator<Item = NodeRef>) -> Expr<Record> {
    Expr::wrap(Node::MergeDicts(dicts.into_iter().collect()))
}

pub fn omit(dict: impl IntoExpr, keys: &[&str]) -> Expr<Record> {
    Expr::wrap(Node::Omit {
        dict: dict.into_node(),
        keys: keys.iter().map(|s| s.to_string()).collect(),
    })
}

/// Conditional value; both branches are always built
pub fn ternary<T>(
    cond: impl IntoExpr,
    if_true: impl Into<Expr<T>>,
    if_false: impl Into<Expr<T>>,
) -> Expr<T> {
    Expr::wrap(Node::Ternary {
        cond: cond.into_node(),
        if_true: if_true.into().node,
        if_false: if_false.into().node,
    })
}

pub fn compare(op: CompareOp, lhs: impl IntoExpr, rhs: impl IntoExpr) -> Expr<bool> {
    Expr::wrap(Node::Comparison {
        op,
        lhs: lhs.into_node(),
        rhs: rhs.into_node(),
    })
}

pub fn eq(lhs: impl IntoExpr, rhs: impl IntoExpr) -> Expr<bool> {
    compare(CompareOp::Eq, lhs, rhs)
}

pub fn ne(lhs: impl IntoExpr, rhs: impl IntoExpr) -> Expr<bool> {
    compare(CompareOp::Ne, lhs, rhs)
}

pub fn lt(lhs: impl IntoExpr, rhs: impl IntoExpr) -> Expr<bool> {
    compare(CompareOp::Lt, lhs, rhs)
}

pub fn le(lhs: impl IntoExpr, rhs: impl IntoExpr) -> Expr<bool> {
    compare(CompareOp::Le, lhs, rhs)
}

pub fn gt(lhs: impl IntoExpr, rhs: impl IntoExpr) -> Expr<bool> {
    compare(CompareOp::Gt, lhs, rhs)
}

pub fn ge(lhs: impl IntoExpr, rhs: impl IntoExpr) -> Expr<bool> {
    compare(CompareOp::Ge, lhs, rhs)
}

pub fn infix(op: InfixOp, lhs: impl IntoExpr, rhs: impl IntoExpr) -> Expr {
    Expr::wrap(Node::Infix {
        op,
        lhs: lhs.into_node(),
        rhs: rhs.into_node(),
    })
}

pub fn add(lhs: impl IntoExpr, rhs: impl IntoExpr) -> Expr<i64> {
    infix(InfixOp::Add, lhs, rhs).cast()
}

pub fn sub(lhs: impl IntoExpr, rhs: impl IntoExpr) -> Expr<i64> {
    infix(InfixOp::Sub, lhs, rhs).cast()
}

pub fn mul(lhs: impl IntoExpr, rhs: impl IntoExpr) -> Expr<i64> {
    infix(InfixOp::Mul, lhs, rhs).cast()
}

pub fn div(lhs: impl IntoExpr, rhs: impl IntoExpr) -> Expr<i64> {
    infix(InfixOp::Div, lhs, rhs).cast()
}

/// Encode as JSON text
pub fn serialize<T>(e: impl Into<Expr<T>>) -> Expr<Serialized<T>> {
    Expr::wrap(Node::Serialize(e.into().node))
}

/// Decode JSON text produced by [`serialize`]
pub fn deserialize<T>(e: Expr<Serialized<T>>) -> Expr<T> {
    Expr::wrap(Node::Deserialize(e.node))
}

/// Decode JSON text known to hold a record
pub fn deserialize_record(e: impl IntoExpr) -> Expr<Record> {
    Expr::wrap(Node::Deserialize(e.into_node()))
}

pub fn as_string(e: impl IntoExpr) -> Expr<String> {
    Expr::wrap(Node::AsString(e.into_node()))
}

pub fn to_base64(e: impl IntoExpr) -> Expr<String> {
    Expr::wrap(Node::ToBase64(e.into_node()))
}

/// Substitute `{{NAME}}` placeholders named in `subs`
pub fn fill_template(template: &str, subs: Vec<(String, NodeRef)>) -> Expr<String> {
    Expr::wrap(Node::FillTemplate {
        template: template.to_string(),
        subs: subs.into_iter().collect(),
    })
}

/// Workflow metadata such as `name`, `uid` or `namespace`
pub fn workflow_value(key: &str) -> Expr<String> {
    Expr::wrap(Node::WorkflowValue {
        key: key.to_string(),
    })
}

/// Global workflow parameter; existence is checked when rendering
pub fn workflow_param<T: Shaped>(name: &str) -> Expr<T> {
    Expr::wrap(Node::WorkflowParam {
        name: name.to_string(),
        shape: T::shape(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::type_token;
    use serde_json::json;

    fn folded<T>(e: &Expr<T>) -> Option<Value> {
        eval::fold(e.node()).unwrap()
    }

    #[test]
    fn test_literal_carries_static_type() {
        let n: Expr<i64> = literal(3i64);
        assert_eq!(n.shape(), Shape::Number);
        let v: Expr<Vec<i64>> = literal(vec![1i64, 2, 3]);
        assert_eq!(v.shape(), Shape::array_of(Shape::Number));
    }

    #[test]
    fn test_constructors_do_not_mutate_operands() {
        let base = literal(json!({"a": 1}));
        let before = base.clone();
        let _ = merge_dicts(exprs![&base, literal(json!({"a": 2}))]);
        let _ = omit(&base, &["a"]);
        assert_eq!(base, before);
    }

    #[test]
    fn test_shared_subexpression() {
        let name = literal("rfs");
        let a = concat(exprs![&name, "-a"]);
        let b = concat(exprs![&name, "-b"]);
        assert!(Arc::ptr_eq(&a.node().children()[0], &b.node().children()[0]));
    }

    #[test]
    fn test_dig_default_type() {
        let cfg = literal(json!({}));
        let flag: Expr<bool> = dig(&cfg, &["repoConfig", "useLocalStack"], false);
        assert_eq!(flag.shape(), Shape::Bool);
        assert_eq!(folded(&flag), Some(json!(false)));
    }

    #[test]
    fn test_fill_template_macro() {
        let e = fill_template(
            "kubectl wait pod/{{CLUSTER_NAME}}-0",
            dict! {"CLUSTER_NAME" => literal("foo")},
        );
        assert_eq!(folded(&e), Some(json!("kubectl wait pod/foo-0")));
    }

    #[test]
    fn test_ternary_builds_both_branches() {
        let e = ternary(literal(true), literal("a"), literal("b"));
        assert_eq!(e.node().children().len(), 3);
        assert_eq!(folded(&e), Some(json!("a")));
    }

    #[test]
    fn test_empty_shape_follows_token() {
        let _ = type_token::<Vec<String>>();
        assert_eq!(folded(&empty::<Vec<String>>()), Some(json!([])));
        assert_eq!(folded(&empty::<Record>()), Some(json!({})));
        assert_eq!(folded(&is_empty(empty::<String>())), Some(json!(true)));
    }

    #[test]
    fn test_sub_folds_integer() {
        let e = sub(literal(10i64), 1);
        assert_eq!(folded(&e), Some(json!(9)));
    }
}
