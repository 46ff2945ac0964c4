//! Whole-workflow checks run before any text is produced
//!
//! Construction already rejects most mistakes; what remains needs the
//! complete template set:
//! - forward/recursive local calls that were unresolved while building
//! - argument shapes against the callee's declared inputs
//! - `when` conditions and loop sources
//! - literal arrays mixing shapes
//! - references to undeclared workflow parameters or template inputs
//! - template call cycles reachable from the entrypoint

use std::collections::VecDeque;

use rustc_hash::FxHashSet;
use serde_json::Value;
use tracing::debug;

use crate::error::{ForgeError, Result};
use crate::expr::{eval, path, Node, NodeRef};
use crate::graph::{check_registration, Call, DagGraph, LoopSpec, TemplateRef};
use crate::template::{template_expressions, TemplateDef};
use crate::types::Shape;
use crate::workflow::WorkflowScope;

/// Counts gathered while validating, for the CLI summary
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub templates: usize,
    pub calls: usize,
    pub expressions: usize,
}

pub fn validate(scope: &WorkflowScope) -> Result<ValidationReport> {
    let mut report = ValidationReport::default();

    for def in scope.templates() {
        report.templates += 1;
        for call in def.body.calls() {
            report.calls += 1;
            check_call(scope, def, call)?;
        }
        for (label, node) in template_expressions(def) {
            report.expressions += 1;
            let at = format!("{}.{}", def.name, label);
            check_expression(scope, def, &at, node)?;
        }
    }
    check_template_cycles(scope)?;

    debug!(
        workflow = %scope.name(),
        templates = report.templates,
        calls = report.calls,
        expressions = report.expressions,
        "workflow validated"
    );
    Ok(report)
}

/// Callee of `target` as seen from `scope`
pub fn resolve<'s>(scope: &'s WorkflowScope, target: &TemplateRef) -> Result<&'s TemplateDef> {
    scope
        .registry()
        .resolve(target)
        .ok_or_else(|| ForgeError::UnresolvedTemplate {
            reference: target.to_string(),
        })
}

fn check_call(scope: &WorkflowScope, def: &TemplateDef, call: &Call) -> Result<()> {
    let callee = resolve(scope, &call.target)?;
    check_registration(&call.name, callee, &call.arguments)?;

    for (name, value) in call.arguments.iter() {
        let Some(param) = callee.inputs.get(name) else {
            continue;
        };
        let actual = value.shape();
        if !actual.is_assignable_to(&param.shape) {
            return Err(ForgeError::TypeMismatch {
                path: format!("{}.{}.{}", def.name, call.name, name),
                expected: param.shape.to_string(),
                actual: actual.to_string(),
            });
        }
    }

    if let Some(cond) = &call.when {
        let actual = cond.shape();
        if !actual.is_boolean_like() {
            return Err(ForgeError::NonBooleanCondition {
                path: format!("{}.{}.when", def.name, call.name),
                actual: actual.to_string(),
            });
        }
    }

    match &call.loop_spec {
        Some(LoopSpec::Items(items)) => {
            let actual = items.shape();
            if !matches!(
                actual.decoded(),
                Shape::Array(_) | Shape::Any | Shape::String
            ) {
                return Err(ForgeError::TypeMismatch {
                    path: format!("{}.{}.loop", def.name, call.name),
                    expected: "array".to_string(),
                    actual: actual.to_string(),
                });
            }
        }
        Some(LoopSpec::Count(count)) => {
            let actual = count.shape();
            if !actual.is_assignable_to(&Shape::Number) && actual.decoded() != Shape::String {
                return Err(ForgeError::TypeMismatch {
                    path: format!("{}.{}.loop", def.name, call.name),
                    expected: Shape::Number.to_string(),
                    actual: actual.to_string(),
                });
            }
        }
        None => {}
    }
    Ok(())
}

fn check_expression(scope: &WorkflowScope, def: &TemplateDef, at: &str, node: &NodeRef) -> Result<()> {
    let mut result = Ok(());
    node.walk(&mut |n| {
        if result.is_ok() {
            result = check_node(scope, def, at, n);
        }
    });
    result?;
    // Strict lookups over constants fail here rather than mid-render
    eval::fold(node)?;
    Ok(())
}

fn check_node(scope: &WorkflowScope, def: &TemplateDef, at: &str, node: &Node) -> Result<()> {
    match node {
        Node::Literal(value) => check_literal_array(value),
        Node::ToArray(items) => {
            let shapes: Vec<Shape> = items.iter().map(|i| i.shape()).collect();
            check_uniform(&shapes)
        }
        Node::WorkflowParam { name, .. } if scope.params().get(name).is_none() => {
            Err(ForgeError::UnknownWorkflowParameter { name: name.clone() })
        }
        Node::InputParam { name, .. } if def.inputs.get(name).is_none() => {
            Err(ForgeError::UnknownInput {
                name: name.clone(),
                owner: def.name.clone(),
            })
        }
        Node::JsonPath { path: p, .. } => path::parse(p).map(|_| ()),
        Node::Ternary { cond, .. } => {
            let actual = cond.shape();
            if actual.is_boolean_like() {
                Ok(())
            } else {
                Err(ForgeError::NonBooleanCondition {
                    path: at.to_string(),
                    actual: actual.to_string(),
                })
            }
        }
        _ => Ok(()),
    }
}

fn check_literal_array(value: &Value) -> Result<()> {
    match value {
        Value::Array(items) => {
            let shapes: Vec<Shape> = items.iter().map(Shape::of_value).collect();
            check_uniform(&shapes)?;
            items.iter().try_for_each(check_literal_array)
        }
        Value::Object(map) => map.values().try_for_each(check_literal_array),
        _ => Ok(()),
    }
}

fn check_uniform(shapes: &[Shape]) -> Result<()> {
    let mut element = Shape::Any;
    for shape in shapes {
        match Shape::unify(&element, shape) {
            Some(next) => element = next,
            None => {
                let mut seen: Vec<String> = Vec::new();
                for s in shapes {
                    let s = s.to_string();
                    if !seen.contains(&s) {
                        seen.push(s);
                    }
                }
                return Err(ForgeError::MixedArrayShape {
                    shapes: seen.join(", "),
                });
            }
        }
    }
    Ok(())
}

/// Local templates reachable from the entrypoint (or every template)
pub fn reachable(scope: &WorkflowScope) -> Vec<&TemplateDef> {
    let Some(entry) = scope.entrypoint() else {
        return scope.templates().collect();
    };
    let mut seen: FxHashSet<&str> = FxHashSet::default();
    let mut queue: VecDeque<&str> = VecDeque::from([entry]);
    while let Some(name) = queue.pop_front() {
        if !seen.insert(name) {
            continue;
        }
        if let Some(def) = scope.template(name) {
            for call in def.body.calls() {
                if let TemplateRef::Local(target) = &call.target {
                    queue.push_back(target);
                }
            }
        }
    }
    scope
        .templates()
        .filter(|t| seen.contains(t.name.as_str()))
        .collect()
}

fn check_template_cycles(scope: &WorkflowScope) -> Result<()> {
    let mut graph = DagGraph::new();
    for def in reachable(scope) {
        graph.add_task(&def.name);
        for call in def.body.calls() {
            if let TemplateRef::Local(target) = &call.target {
                graph.add_edge(&def.name, target);
            }
        }
    }
    graph.detect_cycles().map_err(|err| match err {
        ForgeError::CycleDetected { cycle } => ForgeError::TemplateCycle { cycle },
        other => other,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dict;
    use crate::expr::{self, literal};
    use crate::graph::StepOptions;
    use crate::template::ContainerBuilder;
    use crate::types::type_token;
    use crate::workflow::{WorkflowBuilder, WorkflowSettings};
    use serde_json::json;

    fn leaf(wf: WorkflowBuilder) -> WorkflowBuilder {
        wf.add_template("leaf", |t| {
            t.add_required_input("n", type_token::<i64>(), None)?;
            t.add_container(ContainerBuilder::new().image("busybox"))
        })
        .unwrap()
    }

    // ═══════════════════════════════════════════════════════════════
    // CALLS
    // ═══════════════════════════════════════════════════════════════

    #[test]
    fn test_forward_reference_checked_at_render() {
        let scope = WorkflowBuilder::create(WorkflowSettings::new("wf"))
            .add_template("main", |t| {
                t.add_steps(|s| {
                    s.add_step(
                        "go",
                        TemplateRef::local("later"),
                        |c| Ok(c.register(vec![])),
                        StepOptions::new(),
                    )?;
                    Ok(())
                })
            })
            .unwrap()
            .get_full_scope()
            .unwrap();
        let err = validate(&scope).unwrap_err();
        assert_eq!(err.code(), "FORGE-041");
        assert!(!err.is_construction_error());
    }

    #[test]
    fn test_argument_shape_mismatch() {
        let scope = leaf(WorkflowBuilder::create(WorkflowSettings::new("wf")))
            .add_template("main", |t| {
                t.add_steps(|s| {
                    s.add_step(
                        "go",
                        TemplateRef::local("leaf"),
                        |c| Ok(c.register(dict! {"n" => "three"})),
                        StepOptions::new(),
                    )?;
                    Ok(())
                })
            })
            .unwrap()
            .get_full_scope()
            .unwrap();
        assert_eq!(validate(&scope).unwrap_err().code(), "FORGE-040");
    }

    #[test]
    fn test_non_boolean_when() {
        let scope = leaf(WorkflowBuilder::create(WorkflowSettings::new("wf")))
            .add_template("main", |t| {
                t.add_steps(|s| {
                    s.add_step(
                        "go",
                        TemplateRef::local("leaf"),
                        |c| Ok(c.register(dict! {"n" => 1})),
                        StepOptions::new().when(literal("yes").cast::<bool>()),
                    )?;
                    Ok(())
                })
            })
            .unwrap()
            .get_full_scope()
            .unwrap();
        assert_eq!(validate(&scope).unwrap_err().code(), "FORGE-046");
    }

    // ═══════════════════════════════════════════════════════════════
    // EXPRESSIONS
    // ═══════════════════════════════════════════════════════════════

    #[test]
    fn test_mixed_literal_array() {
        let scope = WorkflowBuilder::create(WorkflowSettings::new("wf"))
            .add_template("c", |t| {
                t.add_container(
                    ContainerBuilder::new()
                        .image("busybox")
                        .args(crate::exprs![expr::serialize(literal(json!([1, "two"])))]),
                )
            })
            .unwrap()
            .get_full_scope()
            .unwrap();
        let err = validate(&scope).unwrap_err();
        assert_eq!(err.code(), "FORGE-043");
        assert!(err.to_string().contains("number, string"));
    }

    #[test]
    fn test_undeclared_workflow_param() {
        let scope = WorkflowBuilder::create(WorkflowSettings::new("wf"))
            .add_template("c", |t| {
                t.add_container(
                    ContainerBuilder::new()
                        .image(expr::workflow_param::<String>("image")),
                )
            })
            .unwrap()
            .get_full_scope()
            .unwrap();
        assert_eq!(validate(&scope).unwrap_err().code(), "FORGE-013");
    }

    #[test]
    fn test_constant_strict_lookup_fails_before_output() {
        let scope = WorkflowBuilder::create(WorkflowSettings::new("wf"))
            .add_template("c", |t| {
                t.add_container(ContainerBuilder::new().image("busybox").args(crate::exprs![
                    expr::json_path_strict(literal(json!({"a": 1})), "$.b")
                ]))
            })
            .unwrap()
            .get_full_scope()
            .unwrap();
        assert_eq!(validate(&scope).unwrap_err().code(), "FORGE-044");
    }

    // ═══════════════════════════════════════════════════════════════
    // TEMPLATE CYCLES
    // ═══════════════════════════════════════════════════════════════

    #[test]
    fn test_recursive_templates_rejected() {
        let call = |target: &'static str| {
            move |t: &mut crate::template::TemplateBuilder<'_>| {
                t.add_steps(|s| {
                    s.add_step(
                        "next",
                        TemplateRef::local(target),
                        |c| Ok(c.register(vec![])),
                        StepOptions::new(),
                    )?;
                    Ok(())
                })
            }
        };
        let scope = WorkflowBuilder::create(WorkflowSettings::new("wf"))
            .add_template("a", call("b"))
            .unwrap()
            .add_template("b", call("a"))
            .unwrap()
            .set_entrypoint("a")
            .unwrap()
            .get_full_scope()
            .unwrap();
        let err = validate(&scope).unwrap_err();
        assert_eq!(err.code(), "FORGE-042");
        assert!(err.to_string().contains("a → b → a"));
    }

    #[test]
    fn test_reachable_follows_entrypoint() {
        let scope = leaf(WorkflowBuilder::create(WorkflowSettings::new("wf")))
            .add_template("unused", |t| t.add_container(ContainerBuilder::new().image("x")))
            .unwrap()
            .add_template("main", |t| {
                t.add_steps(|s| {
                    s.add_step(
                        "go",
                        TemplateRef::local("leaf"),
                        |c| Ok(c.register(dict! {"n" => 1})),
                        StepOptions::new(),
                    )?;
                    Ok(())
                })
            })
            .unwrap()
            .set_entrypoint("main")
            .unwrap()
            .get_full_scope()
            .unwrap();
        let names: Vec<_> = reachable(&scope).iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["leaf", "main"]);
        let report = validate(&scope).unwrap();
        assert_eq!(report.templates, 3);
        assert_eq!(report.calls, 1);
    }
}
