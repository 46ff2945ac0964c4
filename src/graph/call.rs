//! Calls from one template's body into another template
//!
//! A call names its target ([`TemplateRef`]), binds the target's inputs
//! ([`Registration`]) and optionally carries a `when` condition and a loop.
//! The registration closure sees a [`CallContext`]: the caller's inputs, the
//! loop item (inside loops only) and the outputs of calls that are guaranteed
//! to have finished.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{ForgeError, Result};
use crate::expr::{Expr, IntoExpr, Node, NodeRef};
use crate::template::{InputScope, TemplateDef};
use crate::types::{Shape, Shaped};

/// Discriminated call target
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TemplateRef {
    /// Template of the enclosing workflow
    Local(String),
    /// Template of an imported library, by the library's resource name
    Imported { library: String, template: String },
}

impl TemplateRef {
    pub fn local(name: &str) -> Self {
        TemplateRef::Local(name.to_string())
    }

    pub fn imported(library: &str, template: &str) -> Self {
        TemplateRef::Imported {
            library: library.to_string(),
            template: template.to_string(),
        }
    }

    pub fn template_name(&self) -> &str {
        match self {
            TemplateRef::Local(name) => name,
            TemplateRef::Imported { template, .. } => template,
        }
    }
}

impl fmt::Display for TemplateRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateRef::Local(name) => f.write_str(name),
            TemplateRef::Imported { library, template } => write!(f, "{}/{}", library, template),
        }
    }
}

/// Input bindings for one call, keyed by the target's input names
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Registration {
    args: BTreeMap<String, NodeRef>,
}

impl Registration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<(String, NodeRef)>) -> Self {
        Self {
            args: entries.into_iter().collect(),
        }
    }

    pub fn set(mut self, name: &str, value: impl IntoExpr) -> Self {
        self.args.insert(name.to_string(), value.into_node());
        self
    }

    /// Combine two registrations; bindings in `other` win
    pub fn merge(mut self, other: Registration) -> Self {
        self.args.extend(other.args);
        self
    }

    pub fn get(&self, name: &str) -> Option<&NodeRef> {
        self.args.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.args.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &NodeRef)> {
        self.args.iter()
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }
}

/// Iteration over a call
#[derive(Debug, Clone, PartialEq)]
pub enum LoopSpec {
    /// One invocation per element (`withItems` for literals, `withParam` otherwise)
    Items(Expr),
    /// `count` invocations (`withSequence`)
    Count(Expr<i64>),
}

impl LoopSpec {
    pub fn items(sequence: impl IntoExpr) -> Self {
        LoopSpec::Items(Expr::from_node(sequence.into_node()))
    }

    pub fn count(count: impl Into<Expr<i64>>) -> Self {
        LoopSpec::Count(count.into())
    }

    pub fn node(&self) -> &NodeRef {
        match self {
            LoopSpec::Items(e) => e.node(),
            LoopSpec::Count(e) => e.node(),
        }
    }

    /// Shape of `item` inside the loop
    pub fn item_shape(&self) -> Shape {
        match self {
            LoopSpec::Items(e) => match e.shape().decoded() {
                Shape::Array(inner) => *inner,
                _ => Shape::Any,
            },
            LoopSpec::Count(_) => Shape::Number,
        }
    }

    /// The `item` reference bound inside the loop
    pub fn item(&self) -> NodeRef {
        Arc::new(Node::Item {
            shape: self.item_shape(),
            sequence: matches!(self, LoopSpec::Count(_)),
        })
    }
}

/// One step or task
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub name: String,
    pub target: TemplateRef,
    pub arguments: Registration,
    pub when: Option<Expr<bool>>,
    pub loop_spec: Option<LoopSpec>,
    /// DAG tasks only
    pub dependencies: Vec<String>,
}

impl Call {
    /// Every expression attached to the call, labelled for error messages
    pub fn expressions(&self) -> Vec<(String, &NodeRef)> {
        let mut out: Vec<(String, &NodeRef)> = self
            .arguments
            .iter()
            .map(|(k, v)| (format!("{}.arguments.{}", self.name, k), v))
            .collect();
        if let Some(when) = &self.when {
            out.push((format!("{}.when", self.name), when.node()));
        }
        if let Some(spec) = &self.loop_spec {
            out.push((format!("{}.loop", self.name), spec.node()));
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Steps,
    Dag,
}

impl BodyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BodyKind::Steps => "steps",
            BodyKind::Dag => "dag",
        }
    }
}

/// Which earlier calls a new call may read from
pub(crate) struct Visibility<'a> {
    pub kind: BodyKind,
    /// Finished before the new call starts, with the callee when known
    pub visible: Vec<(&'a str, Option<&'a TemplateDef>)>,
    /// Present in the body but not guaranteed to have finished
    pub blocked: Vec<&'a str>,
}

impl<'a> Visibility<'a> {
    fn callee(&self, name: &str) -> Option<Option<&'a TemplateDef>> {
        self.visible
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, def)| *def)
    }

    fn deny(&self, reference: &str, target: &str) -> ForgeError {
        if self.blocked.contains(&target) {
            match self.kind {
                BodyKind::Steps => ForgeError::SameGroupReference {
                    from_step: target.to_string(),
                    step: reference.to_string(),
                },
                BodyKind::Dag => ForgeError::NotUpstream {
                    from_task: target.to_string(),
                    task_id: reference.to_string(),
                },
            }
        } else {
            ForgeError::UnknownCall {
                reference: reference.to_string(),
                target: target.to_string(),
            }
        }
    }

    /// Check every call reference inside `node`
    pub fn check(&self, call: &str, node: &Node, in_loop: bool) -> Result<()> {
        let mut result = Ok(());
        node.walk(&mut |n| {
            if result.is_err() {
                return;
            }
            result = self.check_one(call, n, in_loop);
        });
        result
    }

    fn check_one(&self, call: &str, node: &Node, in_loop: bool) -> Result<()> {
        let (target, output) = match node {
            Node::StepOutput { step, output, .. } if self.kind == BodyKind::Steps => {
                (step, Some(output))
            }
            Node::StepId { step } if self.kind == BodyKind::Steps => (step, None),
            Node::TaskOutput { task, output, .. } if self.kind == BodyKind::Dag => {
                (task, Some(output))
            }
            Node::StepOutput { step: target, .. }
            | Node::StepId { step: target }
            | Node::TaskOutput { task: target, .. } => {
                return Err(ForgeError::UnknownCall {
                    reference: call.to_string(),
                    target: target.clone(),
                })
            }
            Node::Item { .. } if !in_loop => {
                return Err(ForgeError::ItemOutsideLoop {
                    call: call.to_string(),
                })
            }
            _ => return Ok(()),
        };

        let Some(callee) = self.callee(target) else {
            return Err(self.deny(call, target));
        };
        if let (Some(def), Some(output)) = (callee, output) {
            if def.output(output).is_none() {
                return Err(ForgeError::UnknownOutput {
                    template: def.name.clone(),
                    output: output.clone(),
                });
            }
        }
        Ok(())
    }

    /// Reference to `target`'s output, typed from the callee when known
    pub fn output<T: Shaped>(&self, call: &str, target: &str, output: &str) -> Result<Expr<T>> {
        let Some(callee) = self.callee(target) else {
            return Err(self.deny(call, target));
        };
        let shape = match callee {
            Some(def) => match def.output(output) {
                Some(out) => out.shape.clone(),
                None => {
                    return Err(ForgeError::UnknownOutput {
                        template: def.name.clone(),
                        output: output.to_string(),
                    })
                }
            },
            None => T::shape(),
        };
        Ok(Expr::from_node(Arc::new(output_node(
            self.kind, target, output, shape,
        ))))
    }
}

pub(crate) fn output_node(kind: BodyKind, target: &str, output: &str, shape: Shape) -> Node {
    match kind {
        BodyKind::Steps => Node::StepOutput {
            step: target.to_string(),
            output: output.to_string(),
            shape,
        },
        BodyKind::Dag => Node::TaskOutput {
            task: target.to_string(),
            output: output.to_string(),
            shape,
        },
    }
}

/// What a registration closure can see
pub struct CallContext<'a> {
    pub(crate) call: &'a str,
    pub(crate) caller: &'a InputScope,
    pub(crate) callee: Option<&'a TemplateDef>,
    pub(crate) target: &'a TemplateRef,
    pub(crate) loop_item: Option<NodeRef>,
    pub(crate) visibility: &'a Visibility<'a>,
}

impl<'a> CallContext<'a> {
    /// Inputs of the template whose body contains this call
    pub fn caller(&self) -> &InputScope {
        self.caller
    }

    /// Target template, when already defined
    pub fn callee(&self) -> Option<&TemplateDef> {
        self.callee
    }

    pub fn target(&self) -> &TemplateRef {
        self.target
    }

    /// Current loop element
    pub fn item<T>(&self) -> Result<Expr<T>> {
        match &self.loop_item {
            Some(item) => Ok(Expr::from_node(Arc::clone(item))),
            None => Err(ForgeError::ItemOutsideLoop {
                call: self.call.to_string(),
            }),
        }
    }

    /// Output of an earlier step
    pub fn step_output<T: Shaped>(&self, step: &str, output: &str) -> Result<Expr<T>> {
        if self.visibility.kind != BodyKind::Steps {
            return Err(ForgeError::UnknownCall {
                reference: self.call.to_string(),
                target: step.to_string(),
            });
        }
        self.visibility.output(self.call, step, output)
    }

    /// Output of an upstream task
    pub fn task_output<T: Shaped>(&self, task: &str, output: &str) -> Result<Expr<T>> {
        if self.visibility.kind != BodyKind::Dag {
            return Err(ForgeError::UnknownCall {
                reference: self.call.to_string(),
                target: task.to_string(),
            });
        }
        self.visibility.output(self.call, task, output)
    }

    /// Pod/node id of an earlier step
    pub fn step_id(&self, step: &str) -> Result<Expr<String>> {
        let node = Node::StepId {
            step: step.to_string(),
        };
        self.visibility.check(self.call, &node, self.loop_item.is_some())?;
        Ok(Expr::from_node(Arc::new(node)))
    }

    pub fn register(&self, entries: Vec<(String, NodeRef)>) -> Registration {
        Registration::from_entries(entries)
    }
}

/// Forward inputs present on both the caller and the callee
///
/// Names only one side declares are skipped.
pub fn select_inputs_for_register(caller: &InputScope, callee: &CallContext<'_>) -> Result<Registration> {
    let def = callee.callee().ok_or_else(|| ForgeError::UnresolvedTemplate {
        reference: callee.target().to_string(),
    })?;
    let mut reg = Registration::new();
    for param in def.inputs.iter() {
        if caller.contains(&param.name) {
            let value: Expr = caller.get(&param.name)?;
            reg = reg.set(&param.name, value);
        }
    }
    Ok(reg)
}

/// Completeness of a registration against a known callee
pub fn check_registration(call: &str, callee: &TemplateDef, reg: &Registration) -> Result<()> {
    for (name, _) in reg.iter() {
        if callee.inputs.get(name).is_none() {
            return Err(ForgeError::UnknownArgument {
                call: call.to_string(),
                template: callee.name.clone(),
                input: name.clone(),
            });
        }
    }
    for param in callee.inputs.iter() {
        if param.required && !reg.contains(&param.name) {
            return Err(ForgeError::MissingRequiredInput {
                call: call.to_string(),
                template: callee.name.clone(),
                input: param.name.clone(),
            });
        }
    }
    Ok(())
}

/// Handle to a call already added to a body
#[derive(Debug, Clone)]
pub struct CallHandle {
    pub(crate) name: String,
    pub(crate) kind: BodyKind,
    pub(crate) outputs: Option<Vec<(String, Shape)>>,
}

impl CallHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Reference to one of the callee's outputs
    pub fn output<T: Shaped>(&self, output: &str) -> Result<Expr<T>> {
        let shape = match &self.outputs {
            Some(outputs) => outputs
                .iter()
                .find(|(n, _)| n == output)
                .map(|(_, s)| s.clone())
                .ok_or_else(|| ForgeError::UnknownOutput {
                    template: self.name.clone(),
                    output: output.to_string(),
                })?,
            None => T::shape(),
        };
        Ok(Expr::from_node(Arc::new(output_node(
            self.kind, &self.name, output, shape,
        ))))
    }

    /// `steps.<name>.id`
    pub fn id(&self) -> Expr<String> {
        Expr::from_node(Arc::new(Node::StepId {
            step: self.name.clone(),
        }))
    }
}
