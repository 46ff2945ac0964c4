//! Templates
//!
//! A template is a named unit of work: ordered inputs, outputs and exactly one
//! body (container, resource task, steps or DAG). [`TemplateBuilder`] is the
//! mutable handle passed to `WorkflowBuilder::add_template`; the finished
//! [`TemplateDef`] is immutable.

pub mod container;
pub mod params;
pub mod resource;
pub mod retry;

pub use container::{ContainerBuilder, ContainerSpec, EnvSource, EnvVar, ImagePullPolicyValue};
pub use params::{
    define_param, define_required_param, InputScope, ParamDef, ParamRecord, ParamSet, ValueSource,
};
pub use resource::{ResourceAction, ResourceBuilder, ResourceSpec};
pub use retry::{Backoff, RetryPolicy, RetryStrategy};

use tracing::debug;

use crate::error::{ForgeError, Result};
use crate::expr::{Expr, NodeRef};
use crate::graph::call::{BodyKind, Visibility};
use crate::graph::{Call, DagBody, DagBuilder, StepsBody, StepsBuilder};
use crate::types::{Shape, Shaped, TypeToken};
use crate::workflow::TemplateRegistry;

/// Where an output value is read from
#[derive(Debug, Clone, PartialEq)]
pub enum OutputSource {
    /// File written by the container
    Path(String),
    /// JSONPath into the object a resource task created
    JsonPath(String),
    /// Expression over a steps/DAG body's child outputs
    Expression(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputDef {
    pub name: String,
    pub shape: Shape,
    pub source: OutputSource,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TemplateBody {
    Container(ContainerSpec),
    Resource(ResourceSpec),
    Steps(StepsBody),
    Dag(DagBody),
}

impl TemplateBody {
    pub fn kind(&self) -> &'static str {
        match self {
            TemplateBody::Container(_) => "container",
            TemplateBody::Resource(_) => "resource",
            TemplateBody::Steps(_) => "steps",
            TemplateBody::Dag(_) => "dag",
        }
    }

    /// Calls into other templates, in body order
    pub fn calls(&self) -> Vec<&Call> {
        match self {
            TemplateBody::Steps(body) => body.calls().collect(),
            TemplateBody::Dag(body) => body.tasks.iter().collect(),
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TemplateDef {
    pub name: String,
    pub description: Option<String>,
    pub inputs: ParamSet,
    pub outputs: Vec<OutputDef>,
    pub body: TemplateBody,
    pub retry: Option<RetryStrategy>,
}

impl TemplateDef {
    pub fn output(&self, name: &str) -> Option<&OutputDef> {
        self.outputs.iter().find(|o| o.name == name)
    }

    pub fn required_inputs(&self) -> impl Iterator<Item = &ParamDef> {
        self.inputs.iter().filter(|p| p.required)
    }
}

/// Mutable construction handle for one template
pub struct TemplateBuilder<'r> {
    name: String,
    description: Option<String>,
    registry: &'r TemplateRegistry,
    inputs: ParamSet,
    outputs: Vec<OutputDef>,
    body: Option<TemplateBody>,
    retry: Option<RetryStrategy>,
}

impl<'r> TemplateBuilder<'r> {
    pub(crate) fn new(name: &str, registry: &'r TemplateRegistry) -> Self {
        Self {
            name: name.to_string(),
            description: None,
            registry,
            inputs: ParamSet::new(name),
            outputs: Vec::new(),
            body: None,
            retry: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn describe(&mut self, description: &str) -> &mut Self {
        self.description = Some(description.to_string());
        self
    }

    /// Inputs declared so far
    pub fn inputs(&self) -> InputScope {
        self.inputs.scope()
    }

    // ═══════════════════════════════════════════
    // INPUTS
    // ═══════════════════════════════════════════

    pub fn add_required_input<T: Shaped>(
        &mut self,
        name: &str,
        token: TypeToken<T>,
        description: Option<&str>,
    ) -> Result<Expr<T>> {
        self.inputs
            .add(define_required_param(name, token, description))?;
        self.inputs.scope().get(name)
    }

    /// Optional input; `default` sees the inputs declared before it
    pub fn add_optional_input<T>(
        &mut self,
        name: &str,
        default: impl FnOnce(&InputScope) -> Result<Expr<T>>,
    ) -> Result<Expr<T>> {
        let scope = self.inputs.scope();
        let default = default(&scope)?;
        self.inputs.add(ParamDef::optional(name, default))?;
        self.inputs.scope().get(name)
    }

    /// Optional input resolved from a ConfigMap key
    pub fn add_config_map_input(
        &mut self,
        name: &str,
        map: impl Into<Expr<String>>,
        key: &str,
    ) -> Result<Expr<String>> {
        self.inputs.add(ParamDef::config_map_key(name, map, key))?;
        self.inputs.scope().get(name)
    }

    /// Merge a shared record; fails on any name collision
    pub fn add_inputs_from_record(&mut self, record: &ParamRecord) -> Result<InputScope> {
        self.inputs.add_record(record)?;
        Ok(self.inputs.scope())
    }

    // ═══════════════════════════════════════════
    // BODY
    // ═══════════════════════════════════════════

    fn set_body(&mut self, body: TemplateBody) -> Result<()> {
        if let Some(existing) = &self.body {
            return Err(ForgeError::BodyAlreadySet {
                template: self.name.clone(),
                existing: existing.kind().to_string(),
            });
        }
        self.body = Some(body);
        Ok(())
    }

    fn ensure_no_body(&self) -> Result<()> {
        match &self.body {
            Some(existing) => Err(ForgeError::BodyAlreadySet {
                template: self.name.clone(),
                existing: existing.kind().to_string(),
            }),
            None => Ok(()),
        }
    }

    pub fn add_container(&mut self, container: ContainerBuilder) -> Result<()> {
        let spec = container.build();
        let visibility = self.flat_visibility();
        for (path, node) in spec.expressions() {
            visibility.check(&path, node, false)?;
        }
        self.set_body(TemplateBody::Container(spec))
    }

    pub fn add_resource(&mut self, resource: ResourceBuilder) -> Result<()> {
        let spec = resource.build();
        self.flat_visibility()
            .check("manifest", spec.manifest_node(), false)?;
        self.set_body(TemplateBody::Resource(spec))
    }

    /// Sequential body; the closure's value is handed back
    pub fn add_steps<R>(&mut self, build: impl FnOnce(&mut StepsBuilder<'_>) -> Result<R>) -> Result<R> {
        self.ensure_no_body()?;
        let mut steps = StepsBuilder::new(&self.name, self.inputs.scope(), self.registry);
        let out = build(&mut steps)?;
        let body = steps.finish();
        self.set_body(TemplateBody::Steps(body))?;
        Ok(out)
    }

    /// DAG body; the closure's value is handed back
    pub fn add_dag<R>(&mut self, build: impl FnOnce(&mut DagBuilder<'_>) -> Result<R>) -> Result<R> {
        self.ensure_no_body()?;
        let mut dag = DagBuilder::new(&self.name, self.inputs.scope(), self.registry);
        let out = build(&mut dag)?;
        let body = dag.finish();
        self.set_body(TemplateBody::Dag(body))?;
        Ok(out)
    }

    pub fn add_retry_parameters(&mut self, retry: RetryStrategy) -> Result<()> {
        retry.validate()?;
        self.retry = Some(retry);
        Ok(())
    }

    // ═══════════════════════════════════════════
    // OUTPUTS
    // ═══════════════════════════════════════════

    fn push_output(&mut self, output: OutputDef, expected: &[&str]) -> Result<()> {
        params::validate_name(&output.name)?;
        let body = match &self.body {
            Some(body) => body.kind(),
            None => {
                return Err(ForgeError::MissingBody {
                    template: self.name.clone(),
                })
            }
        };
        if !expected.contains(&body) {
            return Err(ForgeError::OutputKindMismatch {
                template: self.name.clone(),
                output: output.name,
                body: body.to_string(),
            });
        }
        if self.outputs.iter().any(|o| o.name == output.name) {
            return Err(ForgeError::DuplicateParameter {
                name: output.name,
                owner: format!("{} outputs", self.name),
            });
        }
        self.outputs.push(output);
        Ok(())
    }

    /// Output read from a file the container writes
    pub fn add_path_output<T: Shaped>(
        &mut self,
        name: &str,
        path: &str,
        _token: TypeToken<T>,
    ) -> Result<()> {
        self.push_output(
            OutputDef {
                name: name.to_string(),
                shape: T::shape(),
                source: OutputSource::Path(path.to_string()),
            },
            &["container"],
        )
    }

    /// Output read from the created resource
    pub fn add_json_path_output<T: Shaped>(
        &mut self,
        name: &str,
        json_path: &str,
        _token: TypeToken<T>,
    ) -> Result<()> {
        self.push_output(
            OutputDef {
                name: name.to_string(),
                shape: T::shape(),
                source: OutputSource::JsonPath(json_path.to_string()),
            },
            &["resource"],
        )
    }

    /// Output computed from the body's step/task outputs
    pub fn add_expression_output<T>(&mut self, name: &str, value: Expr<T>) -> Result<()> {
        let visibility = match &self.body {
            Some(TemplateBody::Steps(body)) => Visibility {
                kind: BodyKind::Steps,
                visible: body
                    .calls()
                    .map(|c| (c.name.as_str(), self.registry.resolve(&c.target)))
                    .collect(),
                blocked: Vec::new(),
            },
            Some(TemplateBody::Dag(body)) => Visibility {
                kind: BodyKind::Dag,
                visible: body
                    .tasks
                    .iter()
                    .map(|c| (c.name.as_str(), self.registry.resolve(&c.target)))
                    .collect(),
                blocked: Vec::new(),
            },
            _ => self.flat_visibility(),
        };
        visibility.check(name, value.node(), false)?;
        drop(visibility);

        let shape = value.shape();
        self.push_output(
            OutputDef {
                name: name.to_string(),
                shape,
                source: OutputSource::Expression(value.erase()),
            },
            &["steps", "dag"],
        )
    }

    /// Leaf bodies see no step/task outputs
    fn flat_visibility(&self) -> Visibility<'_> {
        Visibility {
            kind: BodyKind::Steps,
            visible: Vec::new(),
            blocked: Vec::new(),
        }
    }

    pub(crate) fn build(self) -> Result<TemplateDef> {
        let body = self.body.ok_or_else(|| ForgeError::MissingBody {
            template: self.name.clone(),
        })?;
        debug!(
            template = %self.name,
            body = body.kind(),
            inputs = self.inputs.len(),
            outputs = self.outputs.len(),
            "template built"
        );
        Ok(TemplateDef {
            name: self.name,
            description: self.description,
            inputs: self.inputs,
            outputs: self.outputs,
            body,
            retry: self.retry,
        })
    }
}

/// Every expression a template carries, labelled for error messages
pub fn template_expressions(def: &TemplateDef) -> Vec<(String, &NodeRef)> {
    let mut out = Vec::new();
    for param in def.inputs.iter() {
        match &param.source {
            Some(ValueSource::Default(e)) => {
                out.push((format!("inputs.{}.default", param.name), e.node()))
            }
            Some(ValueSource::ConfigMapKey { map, .. }) => {
                out.push((format!("inputs.{}.configMap", param.name), map.node()))
            }
            None => {}
        }
    }
    match &def.body {
        TemplateBody::Container(spec) => out.extend(spec.expressions()),
        TemplateBody::Resource(spec) => out.push(("manifest".to_string(), spec.manifest_node())),
        TemplateBody::Steps(_) | TemplateBody::Dag(_) => {
            for call in def.body.calls() {
                out.extend(call.expressions());
            }
        }
    }
    for output in &def.outputs {
        if let OutputSource::Expression(e) = &output.source {
            out.push((format!("outputs.{}", output.name), e.node()));
        }
    }
    out
}
