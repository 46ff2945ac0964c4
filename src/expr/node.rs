//! Expression nodes
//!
//! A `Node` is an immutable description; subtrees are shared through
//! `Arc` so one sub-expression can be reused across many call sites.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::types::Shape;

pub type NodeRef = Arc<Node>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    pub fn symbol(self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfixOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl InfixOp {
    pub fn symbol(self) -> &'static str {
        match self {
            InfixOp::Add => "+",
            InfixOp::Sub => "-",
            InfixOp::Mul => "*",
            InfixOp::Div => "/",
            InfixOp::Mod => "%",
        }
    }
}

/// One node of an expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Literal(Value),
    Empty(Shape),

    // ─────────────────────────────────────────────────────────────
    // Scoped lookups (resolved by the orchestrator at runtime)
    // ─────────────────────────────────────────────────────────────
    InputParam { name: String, shape: Shape },
    WorkflowParam { name: String, shape: Shape },
    WorkflowValue { key: String },
    StepOutput { step: String, output: String, shape: Shape },
    TaskOutput { task: String, output: String, shape: Shape },
    StepId { step: String },
    /// `sequence` marks a `withSequence` item, which the orchestrator passes as text
    Item { shape: Shape, sequence: bool },

    // ─────────────────────────────────────────────────────────────
    // Structure
    // ─────────────────────────────────────────────────────────────
    Get { base: NodeRef, key: String },
    Dig { base: NodeRef, path: Vec<String>, default: NodeRef },
    JsonPath { base: NodeRef, path: String },
    MakeDict(Vec<(String, NodeRef)>),
    ToArray(Vec<NodeRef>),
    MergeDicts(Vec<NodeRef>),
    Omit { dict: NodeRef, keys: Vec<String> },

    // ─────────────────────────────────────────────────────────────
    // Text
    // ─────────────────────────────────────────────────────────────
    Concat(Vec<NodeRef>),
    ConcatWith { sep: String, parts: Vec<NodeRef> },
    Join { array: NodeRef, sep: String },
    AsString(NodeRef),
    ToBase64(NodeRef),
    FillTemplate { template: String, subs: BTreeMap<String, NodeRef> },

    // ─────────────────────────────────────────────────────────────
    // Logic and arithmetic
    // ─────────────────────────────────────────────────────────────
    Ternary { cond: NodeRef, if_true: NodeRef, if_false: NodeRef },
    Comparison { op: CompareOp, lhs: NodeRef, rhs: NodeRef },
    Infix { op: InfixOp, lhs: NodeRef, rhs: NodeRef },
    Not(NodeRef),
    IsEmpty(NodeRef),

    // ─────────────────────────────────────────────────────────────
    // Encoding
    // ─────────────────────────────────────────────────────────────
    Serialize(NodeRef),
    Deserialize(NodeRef),
}

impl Node {
    /// Plain runtime references that lower to a simple `{{...}}` tag
    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            Node::InputParam { .. }
                | Node::WorkflowParam { .. }
                | Node::WorkflowValue { .. }
                | Node::StepOutput { .. }
                | Node::TaskOutput { .. }
                | Node::StepId { .. }
                | Node::Item { .. }
        )
    }

    /// References whose runtime value is JSON text rather than a raw string
    ///
    /// Argo parameters are strings; anything declared with a non-string
    /// shape arrives JSON-encoded.
    pub fn carries_json_text(&self) -> bool {
        self.is_reference() && !matches!(self.shape().decoded(), Shape::String)
    }

    /// Statically inferred shape
    pub fn shape(&self) -> Shape {
        match self {
            Node::Literal(v) => Shape::of_value(v),
            Node::Empty(shape) => shape.clone(),
            Node::InputParam { shape, .. }
            | Node::WorkflowParam { shape, .. }
            | Node::StepOutput { shape, .. }
            | Node::TaskOutput { shape, .. }
            | Node::Item { shape, .. } => shape.clone(),
            Node::WorkflowValue { .. } | Node::StepId { .. } => Shape::String,
            Node::Get { .. } | Node::JsonPath { .. } => Shape::Any,
            Node::Dig { default, .. } => default.shape(),
            Node::MakeDict(_) | Node::MergeDicts(_) | Node::Omit { .. } => Shape::Object,
            Node::ToArray(items) => {
                let mut element = Shape::Any;
                for item in items {
                    element = Shape::unify(&element, &item.shape()).unwrap_or(Shape::Any);
                }
                Shape::array_of(element)
            }
            Node::Concat(_)
            | Node::ConcatWith { .. }
            | Node::Join { .. }
            | Node::AsString(_)
            | Node::ToBase64(_)
            | Node::FillTemplate { .. } => Shape::String,
            Node::Ternary {
                if_true, if_false, ..
            } => Shape::unify(&if_true.shape(), &if_false.shape()).unwrap_or(Shape::Any),
            Node::Comparison { .. } | Node::Not(_) | Node::IsEmpty(_) => Shape::Bool,
            Node::Infix { op, lhs, rhs } => {
                let text = |s: Shape| matches!(s.decoded(), Shape::String);
                if *op == InfixOp::Add && (text(lhs.shape()) || text(rhs.shape())) {
                    Shape::String
                } else {
                    Shape::Number
                }
            }
            Node::Serialize(inner) => match inner.shape() {
                already @ Shape::Serialized(_) => already,
                other => Shape::serialized(other),
            },
            Node::Deserialize(inner) => match inner.shape() {
                Shape::Serialized(decoded) => *decoded,
                Shape::String => Shape::Any,
                other => other,
            },
        }
    }

    /// Direct children in evaluation order
    pub fn children(&self) -> Vec<&NodeRef> {
        match self {
            Node::Literal(_)
            | Node::Empty(_)
            | Node::InputParam { .. }
            | Node::WorkflowParam { .. }
            | Node::WorkflowValue { .. }
            | Node::StepOutput { .. }
            | Node::TaskOutput { .. }
            | Node::StepId { .. }
            | Node::Item { .. } => Vec::new(),
            Node::Get { base, .. } | Node::JsonPath { base, .. } => vec![base],
            Node::Dig { base, default, .. } => vec![base, default],
            Node::MakeDict(entries) => entries.iter().map(|(_, v)| v).collect(),
            Node::ToArray(items) | Node::MergeDicts(items) | Node::Concat(items) => {
                items.iter().collect()
            }
            Node::ConcatWith { parts, .. } => parts.iter().collect(),
            Node::Omit { dict, .. } => vec![dict],
            Node::Join { array, .. } => vec![array],
            Node::AsString(inner)
            | Node::ToBase64(inner)
            | Node::Not(inner)
            | Node::IsEmpty(inner)
            | Node::Serialize(inner)
            | Node::Deserialize(inner) => vec![inner],
            Node::FillTemplate { subs, .. } => subs.values().collect(),
            Node::Ternary {
                cond,
                if_true,
                if_false,
            } => vec![cond, if_true, if_false],
            Node::Comparison { lhs, rhs, .. } | Node::Infix { lhs, rhs, .. } => vec![lhs, rhs],
        }
    }

    /// Copy of this node with every direct child replaced by `f(child)`
    pub fn map_children(&self, f: &mut dyn FnMut(&NodeRef) -> NodeRef) -> Node {
        match self {
            Node::Literal(_)
            | Node::Empty(_)
            | Node::InputParam { .. }
            | Node::WorkflowParam { .. }
            | Node::WorkflowValue { .. }
            | Node::StepOutput { .. }
            | Node::TaskOutput { .. }
            | Node::StepId { .. }
            | Node::Item { .. } => self.clone(),
            Node::Get { base, key } => Node::Get {
                base: f(base),
                key: key.clone(),
            },
            Node::Dig {
                base,
                path,
                default,
            } => Node::Dig {
                base: f(base),
                path: path.clone(),
                default: f(default),
            },
            Node::JsonPath { base, path } => Node::JsonPath {
                base: f(base),
                path: path.clone(),
            },
            Node::MakeDict(entries) => {
                Node::MakeDict(entries.iter().map(|(k, v)| (k.clone(), f(v))).collect())
            }
            Node::ToArray(items) => Node::ToArray(items.iter().map(&mut *f).collect()),
            Node::MergeDicts(items) => Node::MergeDicts(items.iter().map(&mut *f).collect()),
            Node::Omit { dict, keys } => Node::Omit {
                dict: f(dict),
                keys: keys.clone(),
            },
            Node::Concat(parts) => Node::Concat(parts.iter().map(&mut *f).collect()),
            Node::ConcatWith { sep, parts } => Node::ConcatWith {
                sep: sep.clone(),
                parts: parts.iter().map(&mut *f).collect(),
            },
            Node::Join { array, sep } => Node::Join {
                array: f(array),
                sep: sep.clone(),
            },
            Node::AsString(inner) => Node::AsString(f(inner)),
            Node::ToBase64(inner) => Node::ToBase64(f(inner)),
            Node::FillTemplate { template, subs } => Node::FillTemplate {
                template: template.clone(),
                subs: subs.iter().map(|(k, v)| (k.clone(), f(v))).collect(),
            },
            Node::Ternary {
                cond,
                if_true,
                if_false,
            } => Node::Ternary {
                cond: f(cond),
                if_true: f(if_true),
                if_false: f(if_false),
            },
            Node::Comparison { op, lhs, rhs } => Node::Comparison {
                op: *op,
                lhs: f(lhs),
                rhs: f(rhs),
            },
            Node::Infix { op, lhs, rhs } => Node::Infix {
                op: *op,
                lhs: f(lhs),
                rhs: f(rhs),
            },
            Node::Not(inner) => Node::Not(f(inner)),
            Node::IsEmpty(inner) => Node::IsEmpty(f(inner)),
            Node::Serialize(inner) => Node::Serialize(f(inner)),
            Node::Deserialize(inner) => Node::Deserialize(f(inner)),
        }
    }

    /// Pre-order walk over this node and all descendants
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a Node)) {
        visit(self);
        for child in self.children() {
            child.walk(visit);
        }
    }

    /// Whether the tree contains a node matching `pred`
    pub fn any(&self, pred: &dyn Fn(&Node) -> bool) -> bool {
        pred(self) || self.children().into_iter().any(|c| c.any(pred))
    }

    /// Whether this expression depends on the current loop item
    pub fn uses_item(&self) -> bool {
        self.any(&|n| matches!(n, Node::Item { .. }))
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Literal(v) => write!(f, "{}", v),
            Node::Empty(shape) => write!(f, "empty<{}>", shape),
            Node::InputParam { name, .. } => write!(f, "inputs.{}", name),
            Node::WorkflowParam { name, .. } => write!(f, "workflow.parameters.{}", name),
            Node::WorkflowValue { key } => write!(f, "workflow.{}", key),
            Node::StepOutput { step, output, .. } => write!(f, "steps.{}.{}", step, output),
            Node::TaskOutput { task, output, .. } => write!(f, "tasks.{}.{}", task, output),
            Node::StepId { step } => write!(f, "steps.{}.id", step),
            Node::Item { .. } => write!(f, "item"),
            other => write!(f, "<{}>", other.kind()),
        }
    }
}

impl Node {
    fn kind(&self) -> &'static str {
        match self {
            Node::Get { .. } => "get",
            Node::Dig { .. } => "dig",
            Node::JsonPath { .. } => "jsonPathStrict",
            Node::MakeDict(_) => "makeDict",
            Node::ToArray(_) => "toArray",
            Node::MergeDicts(_) => "mergeDicts",
            Node::Omit { .. } => "omit",
            Node::Concat(_) => "concat",
            Node::ConcatWith { .. } => "concatWith",
            Node::Join { .. } => "join",
            Node::AsString(_) => "asString",
            Node::ToBase64(_) => "toBase64",
            Node::FillTemplate { .. } => "fillTemplate",
            Node::Ternary { .. } => "ternary",
            Node::Comparison { .. } => "comparison",
            Node::Infix { .. } => "infix",
            Node::Not(_) => "not",
            Node::IsEmpty(_) => "isEmpty",
            Node::Serialize(_) => "serialize",
            Node::Deserialize(_) => "deserialize",
            _ => "ref",
        }
    }
}
