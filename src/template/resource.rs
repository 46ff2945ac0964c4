//! Resource-task bodies
//!
//! The manifest is an expression tree: `make_dict` / `to_array` / literals
//! give it structure and any leaf may be an arbitrary expression. Rendering
//! turns it into the YAML text the orchestrator applies.

use std::fmt;

use crate::expr::{Expr, IntoExpr, NodeRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceAction {
    Create,
    Apply,
    Delete,
}

impl ResourceAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceAction::Create => "create",
            ResourceAction::Apply => "apply",
            ResourceAction::Delete => "delete",
        }
    }
}

impl fmt::Display for ResourceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResourceSpec {
    pub action: ResourceAction,
    pub manifest: Expr,
    pub set_owner_reference: bool,
    pub flags: Vec<String>,
    pub success_condition: Option<String>,
    pub failure_condition: Option<String>,
}

/// Fluent resource-task description
#[derive(Debug, Clone)]
pub struct ResourceBuilder {
    spec: ResourceSpec,
}

impl ResourceBuilder {
    pub fn new(action: ResourceAction, manifest: impl IntoExpr) -> Self {
        Self {
            spec: ResourceSpec {
                action,
                manifest: Expr::from_node(manifest.into_node()),
                set_owner_reference: false,
                flags: Vec::new(),
                success_condition: None,
                failure_condition: None,
            },
        }
    }

    /// Garbage-collect the resource together with the owning workflow
    pub fn set_owner_reference(mut self, enabled: bool) -> Self {
        self.spec.set_owner_reference = enabled;
        self
    }

    /// Verbatim CLI flags, e.g. `--ignore-not-found`
    pub fn flags(mut self, flags: &[&str]) -> Self {
        self.spec.flags = flags.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn success_condition(mut self, condition: &str) -> Self {
        self.spec.success_condition = Some(condition.to_string());
        self
    }

    pub fn failure_condition(mut self, condition: &str) -> Self {
        self.spec.failure_condition = Some(condition.to_string());
        self
    }

    pub fn build(self) -> ResourceSpec {
        self.spec
    }
}

impl ResourceSpec {
    pub fn manifest_node(&self) -> &NodeRef {
        self.manifest.node()
    }
}
