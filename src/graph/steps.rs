//! Sequential bodies
//!
//! A steps body is an ordered list of groups. Groups run one after another;
//! the steps inside one group run in parallel. `add_step` appends a group
//! holding a single step, `add_step_group` opens a group several steps share.

use tracing::debug;

use crate::error::{ForgeError, Result};
use crate::expr::Expr;
use crate::template::InputScope;
use crate::workflow::TemplateRegistry;

use super::call::{BodyKind, Call, CallContext, CallHandle, LoopSpec, Registration, TemplateRef, Visibility};
use super::{build_call, callee_outputs, CallRequest};

#[derive(Debug, Clone, Default)]
pub struct StepOptions {
    pub when: Option<Expr<bool>>,
    pub loop_with: Option<LoopSpec>,
}

impl StepOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Skip the step when `cond` is false at run time
    pub fn when(mut self, cond: impl Into<Expr<bool>>) -> Self {
        self.when = Some(cond.into());
        self
    }

    pub fn loop_with(mut self, spec: LoopSpec) -> Self {
        self.loop_with = Some(spec);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepsBody {
    pub groups: Vec<Vec<Call>>,
}

impl StepsBody {
    pub fn calls(&self) -> impl Iterator<Item = &Call> {
        self.groups.iter().flatten()
    }

    pub fn find(&self, name: &str) -> Option<&Call> {
        self.calls().find(|c| c.name == name)
    }
}

pub struct StepsBuilder<'a> {
    template: &'a str,
    caller: InputScope,
    registry: &'a TemplateRegistry,
    body: StepsBody,
}

impl<'a> StepsBuilder<'a> {
    pub(crate) fn new(template: &'a str, caller: InputScope, registry: &'a TemplateRegistry) -> Self {
        Self {
            template,
            caller,
            registry,
            body: StepsBody::default(),
        }
    }

    pub(crate) fn finish(self) -> StepsBody {
        self.body
    }

    /// Inputs of the enclosing template
    pub fn inputs(&self) -> &InputScope {
        &self.caller
    }

    /// Append a step that runs after everything added so far
    pub fn add_step<F>(
        &mut self,
        name: &str,
        target: TemplateRef,
        register: F,
        options: StepOptions,
    ) -> Result<CallHandle>
    where
        F: FnOnce(&CallContext<'_>) -> Result<Registration>,
    {
        self.push(name, target, register, options, true)
    }

    /// Open a group of steps that run in parallel
    ///
    /// An empty group is kept; the orchestrator treats it as a no-op.
    pub fn add_step_group<R>(
        &mut self,
        build: impl FnOnce(&mut ParallelGroup<'_, 'a>) -> Result<R>,
    ) -> Result<R> {
        self.body.groups.push(Vec::new());
        let mut group = ParallelGroup { steps: self };
        build(&mut group)
    }

    fn push<F>(
        &mut self,
        name: &str,
        target: TemplateRef,
        register: F,
        options: StepOptions,
        new_group: bool,
    ) -> Result<CallHandle>
    where
        F: FnOnce(&CallContext<'_>) -> Result<Registration>,
    {
        if self.body.find(name).is_some() {
            return Err(ForgeError::DuplicateCallName {
                name: name.to_string(),
                template: self.template.to_string(),
            });
        }

        let (earlier, current): (&[Vec<Call>], &[Call]) = match self.body.groups.split_last() {
            Some((last, rest)) if !new_group => (rest, last.as_slice()),
            _ => (self.body.groups.as_slice(), &[]),
        };
        let visibility = Visibility {
            kind: BodyKind::Steps,
            visible: earlier
                .iter()
                .flatten()
                .map(|c| (c.name.as_str(), self.registry.resolve(&c.target)))
                .collect(),
            blocked: current.iter().map(|c| c.name.as_str()).collect(),
        };

        let outputs = callee_outputs(self.registry, &target);
        let call = build_call(
            self.registry,
            &self.caller,
            &visibility,
            CallRequest {
                name,
                target,
                when: options.when,
                loop_spec: options.loop_with,
                dependencies: Vec::new(),
            },
            register,
        )?;
        drop(visibility);

        debug!(template = self.template, step = name, target = %call.target, "step added");
        if new_group || self.body.groups.is_empty() {
            self.body.groups.push(vec![call]);
        } else if let Some(last) = self.body.groups.last_mut() {
            last.push(call);
        }

        Ok(CallHandle {
            name: name.to_string(),
            kind: BodyKind::Steps,
            outputs,
        })
    }
}

/// Steps sharing one parallel group
pub struct ParallelGroup<'g, 'a> {
    steps: &'g mut StepsBuilder<'a>,
}

impl<'g, 'a> ParallelGroup<'g, 'a> {
    pub fn inputs(&self) -> &InputScope {
        &self.steps.caller
    }

    pub fn add_step<F>(
        &mut self,
        name: &str,
        target: TemplateRef,
        register: F,
        options: StepOptions,
    ) -> Result<CallHandle>
    where
        F: FnOnce(&CallContext<'_>) -> Result<Registration>,
    {
        self.steps.push(name, target, register, options, false)
    }
}

#[cfg(test)]
mod tests {
    use crate::expr::{self, literal};
    use crate::graph::{LoopSpec, StepOptions, TemplateRef};
    use crate::template::ContainerBuilder;
    use crate::types::type_token;
    use crate::workflow::{WorkflowBuilder, WorkflowSettings};
    use crate::dict;

    fn base() -> WorkflowBuilder {
        WorkflowBuilder::create(WorkflowSettings::new("steps-test"))
            .add_template("echo", |t| {
                let msg = t.add_required_input("msg", type_token::<String>(), None)?;
                t.add_container(
                    ContainerBuilder::new()
                        .image("busybox")
                        .args(crate::exprs![msg]),
                )?;
                t.add_path_output("said", "/tmp/out", type_token::<String>())?;
                Ok(())
            })
            .unwrap()
    }

    // ═══════════════════════════════════════════════════════════════
    // ORDERING / VISIBILITY
    // ═══════════════════════════════════════════════════════════════

    #[test]
    fn test_sequential_steps_see_earlier_outputs() {
        let wf = base()
            .add_template("main", |t| {
                t.add_steps(|s| {
                    let first = s.add_step(
                        "first",
                        TemplateRef::local("echo"),
                        |c| Ok(c.register(dict! {"msg" => "hi"})),
                        StepOptions::new(),
                    )?;
                    s.add_step(
                        "second",
                        TemplateRef::local("echo"),
                        |c| {
                            let said = c.step_output::<String>("first", "said")?;
                            Ok(c.register(dict! {"msg" => said}))
                        },
                        StepOptions::new().when(expr::not(expr::is_empty(
                            first.output::<String>("said")?,
                        ))),
                    )?;
                    Ok(())
                })
            });
        assert!(wf.is_ok());
    }

    #[test]
    fn test_same_group_reference_rejected() {
        let err = base()
            .add_template("main", |t| {
                t.add_steps(|s| {
                    s.add_step_group(|g| {
                        g.add_step(
                            "a",
                            TemplateRef::local("echo"),
                            |c| Ok(c.register(dict! {"msg" => "x"})),
                            StepOptions::new(),
                        )?;
                        g.add_step(
                            "b",
                            TemplateRef::local("echo"),
                            |c| {
                                let said = c.step_output::<String>("a", "said")?;
                                Ok(c.register(dict! {"msg" => said}))
                            },
                            StepOptions::new(),
                        )?;
                        Ok(())
                    })
                })
            })
            .unwrap_err();
        assert_eq!(err.code(), "FORGE-027");
    }

    #[test]
    fn test_missing_required_input_is_construction_error() {
        let err = base()
            .add_template("main", |t| {
                t.add_steps(|s| {
                    s.add_step(
                        "a",
                        TemplateRef::local("echo"),
                        |c| Ok(c.register(vec![])),
                        StepOptions::new(),
                    )?;
                    Ok(())
                })
            })
            .unwrap_err();
        assert_eq!(err.code(), "FORGE-030");
    }

    #[test]
    fn test_item_requires_loop() {
        let err = base()
            .add_template("main", |t| {
                t.add_steps(|s| {
                    s.add_step(
                        "a",
                        TemplateRef::local("echo"),
                        |c| Ok(c.register(dict! {"msg" => c.item::<String>()?})),
                        StepOptions::new(),
                    )?;
                    Ok(())
                })
            })
            .unwrap_err();
        assert_eq!(err.code(), "FORGE-028");
    }

    #[test]
    fn test_duplicate_step_name() {
        let err = base()
            .add_template("main", |t| {
                t.add_steps(|s| {
                    for _ in 0..2 {
                        s.add_step(
                            "a",
                            TemplateRef::local("echo"),
                            |c| Ok(c.register(dict! {"msg" => "x"})),
                            StepOptions::new().loop_with(LoopSpec::items(literal(vec!["a", "b"]))),
                        )?;
                    }
                    Ok(())
                })
            })
            .unwrap_err();
        assert_eq!(err.code(), "FORGE-022");
    }

    #[test]
    fn test_unknown_output_on_known_callee() {
        let err = base()
            .add_template("main", |t| {
                t.add_steps(|s| {
                    let first = s.add_step(
                        "first",
                        TemplateRef::local("echo"),
                        |c| Ok(c.register(dict! {"msg" => "x"})),
                        StepOptions::new(),
                    )?;
                    first.output::<String>("nope")?;
                    Ok(())
                })
            })
            .unwrap_err();
        assert_eq!(err.code(), "FORGE-024");
    }
}
