//! Execution preview
//!
//! Describes what the orchestrator would run for each steps/DAG template:
//! the stages (step groups, or DAG execution levels) and one invocation per
//! call. Loops over constant sequences are expanded into one invocation per
//! element with the element substituted, so `[1, 2, 3]` becomes three
//! invocations with their arguments already folded.

use std::sync::Arc;

use serde_json::Value;

use crate::error::{ForgeError, Result};
use crate::expr::{eval, lower, Node, NodeRef};
use crate::graph::{Call, LoopSpec};
use crate::template::{TemplateBody, TemplateDef};
use crate::workflow::WorkflowScope;

use super::validate::{self, resolve};

#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub call: String,
    pub target: String,
    /// Index within an expanded loop
    pub iteration: Option<usize>,
    /// Bound arguments in the callee's input order
    pub arguments: Vec<(String, String)>,
    pub when: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TemplatePlan {
    pub template: String,
    pub body: &'static str,
    /// Call names per stage; calls within a stage run in parallel
    pub stages: Vec<Vec<String>>,
    pub invocations: Vec<Invocation>,
}

/// Plan every steps/DAG template, or just `only`
pub fn plan(scope: &WorkflowScope, only: Option<&str>) -> Result<Vec<TemplatePlan>> {
    validate::validate(scope)?;
    let selected: Vec<&TemplateDef> = match only {
        Some(name) => vec![scope
            .template(name)
            .ok_or_else(|| ForgeError::UnresolvedTemplate {
                reference: name.to_string(),
            })?],
        None => scope.templates().collect(),
    };
    selected
        .into_iter()
        .filter(|t| matches!(t.body, TemplateBody::Steps(_) | TemplateBody::Dag(_)))
        .map(|t| plan_template(scope, t))
        .collect()
}

fn plan_template(scope: &WorkflowScope, def: &TemplateDef) -> Result<TemplatePlan> {
    let stages: Vec<Vec<String>> = match &def.body {
        TemplateBody::Steps(body) => body
            .groups
            .iter()
            .map(|g| g.iter().map(|c| c.name.clone()).collect())
            .collect(),
        TemplateBody::Dag(body) => body
            .graph()
            .execution_levels()
            .into_iter()
            .map(|level| level.iter().map(|id| id.to_string()).collect())
            .collect(),
        _ => Vec::new(),
    };

    let mut invocations = Vec::new();
    for name in stages.iter().flatten() {
        let call = def
            .body
            .calls()
            .into_iter()
            .find(|c| &c.name == name)
            .ok_or_else(|| ForgeError::UnknownCall {
                reference: def.name.clone(),
                target: name.clone(),
            })?;
        invocations.extend(expand(scope, call)?);
    }

    Ok(TemplatePlan {
        template: def.name.clone(),
        body: def.body.kind(),
        stages,
        invocations,
    })
}

/// Constant loop elements, if the loop source folds
fn loop_values(spec: &LoopSpec) -> Result<Option<Vec<Value>>> {
    Ok(match spec {
        LoopSpec::Items(items) => match eval::fold(items.node())? {
            Some(Value::Array(values)) => Some(values),
            _ => None,
        },
        LoopSpec::Count(count) => eval::fold(count.node())?
            .and_then(|v| v.as_u64())
            .map(|n| (0..n).map(Value::from).collect()),
    })
}

fn expand(scope: &WorkflowScope, call: &Call) -> Result<Vec<Invocation>> {
    let callee = resolve(scope, &call.target)?;
    let values = match &call.loop_spec {
        Some(spec) => loop_values(spec)?,
        None => None,
    };
    match values {
        Some(values) => values
            .iter()
            .enumerate()
            .map(|(i, v)| invocation(callee, call, Some((i, v))))
            .collect(),
        None => Ok(vec![invocation(callee, call, None)?]),
    }
}

fn invocation(
    callee: &TemplateDef,
    call: &Call,
    item: Option<(usize, &Value)>,
) -> Result<Invocation> {
    let text = |node: &NodeRef| match item {
        Some((_, value)) => lower::render_text(&bind_item(node, value)),
        None => lower::render_text(node),
    };
    let mut arguments = Vec::new();
    for param in callee.inputs.iter() {
        if let Some(value) = call.arguments.get(&param.name) {
            arguments.push((param.name.clone(), text(value)?));
        }
    }
    Ok(Invocation {
        call: call.name.clone(),
        target: call.target.to_string(),
        iteration: item.map(|(i, _)| i),
        arguments,
        when: call.when.as_ref().map(|w| text(w.node())).transpose()?,
    })
}

/// Replace every loop item reference with a constant
fn bind_item(node: &NodeRef, value: &Value) -> NodeRef {
    match &**node {
        Node::Item { .. } => Arc::new(Node::Literal(value.clone())),
        n if n.uses_item() => Arc::new(n.map_children(&mut |c| bind_item(c, value))),
        _ => Arc::clone(node),
    }
}
