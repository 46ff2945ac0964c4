//! Renderer
//!
//! Turns a frozen [`WorkflowScope`] into an Argo `WorkflowTemplate`. The
//! whole workflow is validated first, then lowered to the serde structs in
//! [`manifest`], then serialized. No text is produced unless every step
//! succeeds.
//!
//! ```text
//!   WorkflowScope ─► validate ─► lower ─► WorkflowTemplateManifest ─► YAML/JSON
//! ```

pub mod manifest;
pub mod plan;
pub mod validate;

pub use plan::{plan, Invocation, TemplatePlan};
pub use validate::{validate, ValidationReport};

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{ForgeError, Result};
use crate::expr::{eval, lower, Expr, Node, NodeRef};
use crate::graph::{Call, LoopSpec, TemplateRef};
use crate::template::{
    ContainerSpec, EnvSource, OutputSource, ParamDef, ResourceSpec, RetryStrategy, TemplateBody,
    TemplateDef, ValueSource,
};
use crate::types::Shape;
use crate::workflow::WorkflowScope;

use manifest::*;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Yaml,
    Json,
}

impl FromStr for OutputFormat {
    type Err = ForgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "yaml" | "yml" => Ok(OutputFormat::Yaml),
            "json" => Ok(OutputFormat::Json),
            other => Err(ForgeError::ConfigError {
                reason: format!("unknown output format '{}' (expected yaml or json)", other),
            }),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Yaml => f.write_str("yaml"),
            OutputFormat::Json => f.write_str("json"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderOptions {
    pub namespace: Option<String>,
    pub format: OutputFormat,
}

/// Validate and render to text
pub fn render(scope: &WorkflowScope, options: &RenderOptions) -> Result<String> {
    let manifest = to_manifest(scope, options)?;
    let text = match options.format {
        OutputFormat::Yaml => serde_yaml::to_string(&manifest)?,
        OutputFormat::Json => {
            let mut s = serde_json::to_string_pretty(&manifest)?;
            s.push('\n');
            s
        }
    };
    debug!(workflow = %scope.name(), format = %options.format, bytes = text.len(), "rendered");
    Ok(text)
}

/// Validate and lower without serializing
pub fn to_manifest(scope: &WorkflowScope, options: &RenderOptions) -> Result<WorkflowTemplateManifest> {
    validate(scope)?;

    let settings = scope.settings();
    let arguments = scope
        .params()
        .iter()
        .map(|p| lower_param(p, true))
        .collect::<Result<Vec<_>>>()?;
    let templates = scope
        .templates()
        .map(|t| lower_template(scope, t))
        .collect::<Result<Vec<_>>>()?;

    Ok(WorkflowTemplateManifest {
        api_version: API_VERSION.to_string(),
        kind: KIND.to_string(),
        metadata: Metadata {
            name: settings.k8s_resource_name.clone(),
            namespace: options.namespace.clone(),
        },
        spec: WorkflowSpec {
            entrypoint: scope.entrypoint().map(str::to_string),
            service_account_name: settings.service_account_name.clone(),
            parallelism: settings.parallelism,
            arguments: Parameters::non_empty(arguments),
            templates,
        },
    })
}

// ═══════════════════════════════════════════════════════════════
// PARAMETERS
// ═══════════════════════════════════════════════════════════════

/// Workflow arguments carry `value`; template inputs carry `default`
fn lower_param(param: &ParamDef, as_argument: bool) -> Result<Parameter> {
    let mut out = Parameter {
        name: param.name.clone(),
        description: param.description.clone(),
        ..Parameter::default()
    };
    match &param.source {
        Some(ValueSource::Default(e)) => {
            let text = lower::render_text(e.node())?;
            if as_argument {
                out.value = Some(text);
            } else {
                out.default = Some(text);
            }
        }
        Some(ValueSource::ConfigMapKey { map, key }) => {
            out.value_from = Some(ValueFrom {
                config_map_key_ref: Some(KeyRef {
                    name: lower::render_text(map.node())?,
                    key: key.clone(),
                    optional: None,
                }),
                ..ValueFrom::default()
            });
        }
        None => {}
    }
    Ok(out)
}

// ═══════════════════════════════════════════════════════════════
// TEMPLATES
// ═══════════════════════════════════════════════════════════════

fn lower_template(scope: &WorkflowScope, def: &TemplateDef) -> Result<TemplateManifest> {
    let inputs = def
        .inputs
        .iter()
        .map(|p| lower_param(p, false))
        .collect::<Result<Vec<_>>>()?;
    let outputs = def
        .outputs
        .iter()
        .map(|o| {
            let value_from = match &o.source {
                OutputSource::Path(p) => ValueFrom {
                    path: Some(p.clone()),
                    ..ValueFrom::default()
                },
                OutputSource::JsonPath(p) => ValueFrom {
                    json_path: Some(p.clone()),
                    ..ValueFrom::default()
                },
                OutputSource::Expression(e) if e.node().is_reference() => ValueFrom {
                    parameter: Some(lower::render_text(e.node())?),
                    ..ValueFrom::default()
                },
                OutputSource::Expression(e) => ValueFrom {
                    expression: Some(lower::text_code(e.node())?),
                    ..ValueFrom::default()
                },
            };
            Ok(Parameter {
                name: o.name.clone(),
                value_from: Some(value_from),
                ..Parameter::default()
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let mut out = TemplateManifest {
        name: def.name.clone(),
        inputs: Parameters::non_empty(inputs),
        outputs: Parameters::non_empty(outputs),
        retry_strategy: def.retry.as_ref().map(lower_retry),
        container: None,
        resource: None,
        steps: None,
        dag: None,
    };
    match &def.body {
        TemplateBody::Container(spec) => out.container = Some(lower_container(spec)?),
        TemplateBody::Resource(spec) => out.resource = Some(lower_resource(spec)?),
        TemplateBody::Steps(body) => {
            let groups = body
                .groups
                .iter()
                .map(|group| {
                    group
                        .iter()
                        .map(|call| lower_call(scope, call))
                        .collect::<Result<Vec<_>>>()
                })
                .collect::<Result<Vec<_>>>()?;
            out.steps = Some(groups);
        }
        TemplateBody::Dag(body) => {
            let tasks = body
                .tasks
                .iter()
                .map(|call| lower_call(scope, call))
                .collect::<Result<Vec<_>>>()?;
            out.dag = Some(DagManifest { tasks });
        }
    }
    Ok(out)
}

fn lower_retry(retry: &RetryStrategy) -> RetryManifest {
    RetryManifest {
        limit: retry.limit,
        retry_policy: retry.retry_policy,
        backoff: retry.backoff.as_ref().map(|b| BackoffManifest {
            duration: b.duration.clone(),
            factor: b.factor,
            max_duration: b.cap.clone(),
        }),
    }
}

fn lower_container(spec: &ContainerSpec) -> Result<ContainerManifest> {
    let text = |e: &NodeRef| lower::render_text(e);
    let env = spec
        .env
        .iter()
        .map(|var| {
            Ok(match &var.source {
                EnvSource::Value(e) => EnvManifest {
                    name: var.name.clone(),
                    value: Some(text(e.node())?),
                    value_from: None,
                },
                EnvSource::SecretKey {
                    secret,
                    key,
                    optional,
                } => EnvManifest {
                    name: var.name.clone(),
                    value: None,
                    value_from: Some(EnvValueFrom {
                        secret_key_ref: KeyRef {
                            name: text(secret.node())?,
                            key: key.clone(),
                            optional: optional.then_some(true),
                        },
                    }),
                },
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let resources = if spec.resources.is_empty() {
        None
    } else {
        let lower_map = |m: &BTreeMap<String, Expr>| -> Result<BTreeMap<String, String>> {
            m.iter()
                .map(|(k, v)| Ok((k.clone(), text(v.node())?)))
                .collect::<Result<_>>()
        };
        Some(ResourcesManifest {
            requests: lower_map(&spec.resources.requests)?,
            limits: lower_map(&spec.resources.limits)?,
        })
    };

    Ok(ContainerManifest {
        image: spec.image.as_ref().map(|e| text(e.node())).transpose()?,
        image_pull_policy: spec.pull_policy.as_ref().map(|e| text(e.node())).transpose()?,
        command: spec
            .command
            .iter()
            .map(|e| text(e.node()))
            .collect::<Result<_>>()?,
        args: spec
            .args
            .iter()
            .map(|e| text(e.node()))
            .collect::<Result<_>>()?,
        env,
        resources,
    })
}

fn lower_resource(spec: &ResourceSpec) -> Result<ResourceManifest> {
    Ok(ResourceManifest {
        action: spec.action.as_str().to_string(),
        set_owner_reference: spec.set_owner_reference,
        flags: spec.flags.clone(),
        success_condition: spec.success_condition.clone(),
        failure_condition: spec.failure_condition.clone(),
        manifest: manifest_text(spec.manifest_node())?,
    })
}

// ═══════════════════════════════════════════════════════════════
// RESOURCE MANIFESTS
// ═══════════════════════════════════════════════════════════════

/// Raw leaves awaiting splicing, each standing in the YAML as a unique placeholder
struct DirectLeaves {
    salt: usize,
    raw: Vec<String>,
}

impl DirectLeaves {
    fn placeholder(&self, index: usize) -> String {
        format!("__ARGO_DIRECT_{}_{}__", self.salt, index)
    }

    fn push(&mut self, raw: String) -> String {
        self.raw.push(raw);
        self.placeholder(self.raw.len() - 1)
    }

    /// Splice raw leaves back in one left-to-right pass
    ///
    /// `None` if any placeholder also occurs in user data.
    fn splice(&self, text: &str) -> Option<String> {
        let mut found = Vec::with_capacity(self.raw.len());
        for (i, raw) in self.raw.iter().enumerate() {
            let placeholder = self.placeholder(i);
            let mut hits = text.match_indices(&placeholder);
            let (at, _) = hits.next()?;
            if hits.next().is_some() {
                return None;
            }
            found.push((at, placeholder.len(), raw));
        }
        found.sort_by_key(|(at, ..)| *at);

        let mut out = String::with_capacity(text.len());
        let mut cursor = 0;
        for (at, len, raw) in found {
            out.push_str(&text[cursor..at]);
            out.push_str(raw);
            cursor = at + len;
        }
        out.push_str(&text[cursor..]);
        Some(out)
    }
}

/// Kubernetes object as YAML text
///
/// Dictionaries and arrays built in the algebra become YAML structure.
/// Dynamic string leaves are emitted as YAML strings; other dynamic leaves
/// are spliced in raw so the orchestrator's substitution yields a number,
/// boolean or inline JSON object.
pub fn manifest_text(node: &Node) -> Result<String> {
    // Placeholders colliding with literal text get a fresh salt
    let mut salt = 0;
    loop {
        let mut direct = DirectLeaves {
            salt,
            raw: Vec::new(),
        };
        let value = manifest_value(node, &mut direct)?;
        let text = serde_yaml::to_string(&value)?;
        if let Some(spliced) = direct.splice(&text) {
            return Ok(spliced);
        }
        debug!(salt, "placeholder collision in manifest, retrying");
        salt += 1;
    }
}

fn manifest_value(node: &Node, direct: &mut DirectLeaves) -> Result<Value> {
    if let Some(value) = eval::fold(node)? {
        return Ok(value);
    }
    match node {
        Node::MakeDict(entries) => {
            let mut map = Map::new();
            for (key, value) in entries {
                map.insert(key.clone(), manifest_value(value, direct)?);
            }
            Ok(Value::Object(map))
        }
        Node::ToArray(items) => items
            .iter()
            .map(|i| manifest_value(i, direct))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        _ => {
            let text = lower::render_text(node)?;
            match node.shape() {
                Shape::String | Shape::Serialized(_) => Ok(Value::String(text)),
                _ => Ok(Value::String(direct.push(text))),
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════
// CALLS
// ═══════════════════════════════════════════════════════════════

fn lower_call(scope: &WorkflowScope, call: &Call) -> Result<CallManifest> {
    let callee = validate::resolve(scope, &call.target)?;

    // Bindings follow the callee's input order
    let mut arguments = Vec::new();
    for param in callee.inputs.iter() {
        if let Some(value) = call.arguments.get(&param.name) {
            arguments.push(Parameter {
                name: param.name.clone(),
                value: Some(lower::render_text(value)?),
                ..Parameter::default()
            });
        }
    }

    let (template, template_ref) = match &call.target {
        TemplateRef::Local(name) => (Some(name.clone()), None),
        TemplateRef::Imported { library, template } => (
            None,
            Some(TemplateRefManifest {
                name: library.clone(),
                template: template.clone(),
            }),
        ),
    };

    let mut out = CallManifest {
        name: call.name.clone(),
        template,
        template_ref,
        dependencies: call.dependencies.clone(),
        arguments: Parameters::non_empty(arguments),
        when: call
            .when
            .as_ref()
            .map(|w| lower::render_text(w.node()))
            .transpose()?,
        with_items: None,
        with_param: None,
        with_sequence: None,
    };
    match &call.loop_spec {
        Some(LoopSpec::Items(items)) => match eval::fold(items.node())? {
            Some(Value::Array(values)) => out.with_items = Some(values),
            _ => out.with_param = Some(lower::render_text(items.node())?),
        },
        Some(LoopSpec::Count(count)) => {
            out.with_sequence = Some(SequenceManifest {
                count: lower::render_text(count.node())?,
            })
        }
        None => {}
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dict;
    use crate::expr::{self, literal};
    use crate::graph::{StepOptions, TaskOptions};
    use crate::template::{
        define_param, ContainerBuilder, ParamRecord, ResourceAction, ResourceBuilder, RetryPolicy,
    };
    use crate::types::type_token;
    use crate::workflow::{WorkflowBuilder, WorkflowSettings};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn echo(wf: WorkflowBuilder) -> WorkflowBuilder {
        wf.add_template("echo", |t| {
            let msg = t.add_required_input("msg", type_token::<String>(), Some("text to print"))?;
            t.add_container(
                ContainerBuilder::new()
                    .image("busybox")
                    .command(&["echo"])
                    .args(crate::exprs![msg]),
            )?;
            t.add_path_output("said", "/tmp/said", type_token::<String>())
        })
        .unwrap()
    }

    // ═══════════════════════════════════════════════════════════════
    // DOCUMENT
    // ═══════════════════════════════════════════════════════════════

    #[test]
    fn test_header_and_arguments() {
        let scope = echo(WorkflowBuilder::create(
            WorkflowSettings::new("hello").service_account("runner"),
        ))
        .add_params(&ParamRecord::new().with(define_param("greeting", literal("hi"))))
        .unwrap()
        .set_entrypoint("echo")
        .unwrap()
        .get_full_scope()
        .unwrap();

        let options = RenderOptions {
            namespace: Some("ma".into()),
            ..RenderOptions::default()
        };
        let m = to_manifest(&scope, &options).unwrap();
        assert_eq!(m.api_version, "argoproj.io/v1alpha1");
        assert_eq!(m.kind, "WorkflowTemplate");
        assert_eq!(m.metadata.namespace.as_deref(), Some("ma"));
        assert_eq!(m.spec.entrypoint.as_deref(), Some("echo"));
        assert_eq!(m.spec.service_account_name.as_deref(), Some("runner"));
        let args = m.spec.arguments.unwrap();
        assert_eq!(args.parameters[0].value.as_deref(), Some("hi"));

        let echo = &m.spec.templates[0];
        let input = &echo.inputs.as_ref().unwrap().parameters[0];
        assert_eq!(input.name, "msg");
        assert_eq!(input.default, None);
        assert_eq!(input.description.as_deref(), Some("text to print"));
        let container = echo.container.as_ref().unwrap();
        assert_eq!(container.args, vec!["{{inputs.parameters.msg}}"]);
        assert_eq!(
            echo.outputs.as_ref().unwrap().parameters[0]
                .value_from
                .as_ref()
                .unwrap()
                .path
                .as_deref(),
            Some("/tmp/said")
        );
    }

    #[test]
    fn test_yaml_and_json_agree() {
        let scope = echo(WorkflowBuilder::create(WorkflowSettings::new("hello")))
            .get_full_scope()
            .unwrap();
        let yaml = render(&scope, &RenderOptions::default()).unwrap();
        let json = render(
            &scope,
            &RenderOptions {
                format: OutputFormat::Json,
                ..RenderOptions::default()
            },
        )
        .unwrap();
        let from_yaml: Value = serde_yaml::from_str(&yaml).unwrap();
        let from_json: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(from_yaml, from_json);
        assert!(yaml.starts_with("apiVersion: argoproj.io/v1alpha1\n"));
    }

    #[test]
    fn test_render_is_deterministic() {
        let build = || {
            echo(WorkflowBuilder::create(WorkflowSettings::new("hello")))
                .get_full_scope()
                .unwrap()
        };
        let a = render(&build(), &RenderOptions::default()).unwrap();
        let b = render(&build(), &RenderOptions::default()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_output_format_parsing() {
        assert_eq!("YAML".parse::<OutputFormat>().unwrap(), OutputFormat::Yaml);
        assert_eq!("json".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!("toml".parse::<OutputFormat>().unwrap_err().code(), "FORGE-096");
    }

    // ═══════════════════════════════════════════════════════════════
    // CALLS
    // ═══════════════════════════════════════════════════════════════

    #[test]
    fn test_loop_literal_renders_with_items() {
        let scope = echo(WorkflowBuilder::create(WorkflowSettings::new("loop")))
            .add_template("main", |t| {
                t.add_steps(|s| {
                    s.add_step(
                        "each",
                        TemplateRef::local("echo"),
                        |c| Ok(c.register(dict! {"msg" => c.item::<String>()?})),
                        StepOptions::new().loop_with(LoopSpec::items(literal(vec!["a", "b"]))),
                    )?;
                    Ok(())
                })
            })
            .unwrap()
            .get_full_scope()
            .unwrap();
        let m = to_manifest(&scope, &RenderOptions::default()).unwrap();
        let step = &m.spec.templates[1].steps.as_ref().unwrap()[0][0];
        assert_eq!(step.template.as_deref(), Some("echo"));
        assert_eq!(step.with_items, Some(vec![json!("a"), json!("b")]));
        assert_eq!(
            step.arguments.as_ref().unwrap().parameters[0].value.as_deref(),
            Some("{{item}}")
        );
    }

    #[test]
    fn test_sequence_item_arithmetic_reads_item_as_int() {
        let scope = echo(WorkflowBuilder::create(WorkflowSettings::new("seq")))
            .add_template("main", |t| {
                let count = t.add_required_input("count", type_token::<i64>(), None)?;
                t.add_steps(|s| {
                    s.add_step(
                        "each",
                        TemplateRef::local("echo"),
                        |c| {
                            let next = expr::add(c.item::<i64>()?, 1);
                            Ok(c.register(dict! {"msg" => expr::as_string(next)}))
                        },
                        StepOptions::new().loop_with(LoopSpec::count(count)),
                    )?;
                    Ok(())
                })
            })
            .unwrap()
            .get_full_scope()
            .unwrap();
        let m = to_manifest(&scope, &RenderOptions::default()).unwrap();
        let step = &m.spec.templates[1].steps.as_ref().unwrap()[0][0];
        assert!(step.with_sequence.is_some());
        let msg = step.arguments.as_ref().unwrap().parameters[0].value.as_deref().unwrap();
        assert!(msg.contains("asInt(item) + 1"), "{msg}");
    }

    #[test]
    fn test_dag_tasks_carry_dependencies_and_when() {
        let scope = echo(WorkflowBuilder::create(WorkflowSettings::new("dag")))
            .add_template("main", |t| {
                t.add_dag(|d| {
                    let a = d.add_task(
                        "a",
                        TemplateRef::local("echo"),
                        |c| Ok(c.register(dict! {"msg" => "first"})),
                        TaskOptions::new(),
                    )?;
                    let said = a.output::<String>("said")?;
                    d.add_task(
                        "b",
                        TemplateRef::local("echo"),
                        |c| Ok(c.register(dict! {"msg" => c.task_output::<String>("a", "said")?})),
                        TaskOptions::new()
                            .depends_on(&["a"])
                            .when(expr::not(expr::is_empty(said))),
                    )?;
                    Ok(())
                })
            })
            .unwrap()
            .get_full_scope()
            .unwrap();
        let m = to_manifest(&scope, &RenderOptions::default()).unwrap();
        let tasks = &m.spec.templates[1].dag.as_ref().unwrap().tasks;
        assert_eq!(tasks[1].dependencies, vec!["a"]);
        assert_eq!(
            tasks[1].arguments.as_ref().unwrap().parameters[0].value.as_deref(),
            Some("{{tasks.a.outputs.parameters.said}}")
        );
        assert!(tasks[1].when.as_deref().unwrap().starts_with("{{="));
    }

    // ═══════════════════════════════════════════════════════════════
    // RESOURCES / RETRY
    // ═══════════════════════════════════════════════════════════════

    #[test]
    fn test_resource_manifest_keeps_structure() {
        let scope = WorkflowBuilder::create(WorkflowSettings::new("res"))
            .add_template("create", |t| {
                let name = t.add_required_input("name", type_token::<String>(), None)?;
                let replicas = t.add_required_input("replicas", type_token::<i64>(), None)?;
                let manifest = expr::make_dict(dict! {
                    "apiVersion" => "v1",
                    "kind" => "ConfigMap",
                    "metadata" => expr::make_dict(dict! {"name" => name}),
                    "data" => expr::make_dict(dict! {"replicas" => replicas}),
                });
                t.add_resource(ResourceBuilder::new(ResourceAction::Apply, manifest))?;
                t.add_retry_parameters(
                    crate::template::RetryStrategy::new(3, RetryPolicy::OnFailure)
                        .with_backoff("5s", 2, Some("1m")),
                )
            })
            .unwrap()
            .get_full_scope()
            .unwrap();
        let m = to_manifest(&scope, &RenderOptions::default()).unwrap();
        let t = &m.spec.templates[0];
        let resource = t.resource.as_ref().unwrap();
        assert_eq!(resource.action, "apply");
        assert!(resource.manifest.contains("kind: ConfigMap"));
        assert!(resource.manifest.contains("{{inputs.parameters.name}}"));
        assert!(!resource.manifest.contains("__ARGO_DIRECT"));
        assert!(resource.manifest.contains("replicas: {{inputs.parameters.replicas}}"));
        let retry = t.retry_strategy.as_ref().unwrap();
        assert_eq!(retry.limit, 3);
        assert_eq!(retry.backoff.as_ref().unwrap().max_duration.as_deref(), Some("1m"));
    }

    #[test]
    fn test_manifest_literal_resembling_placeholder_survives() {
        let replicas: Expr<i64> = Expr::from_node(std::sync::Arc::new(Node::InputParam {
            name: "replicas".into(),
            shape: Shape::Number,
        }));
        let manifest = expr::make_dict(dict! {
            "note" => "__ARGO_DIRECT_0_0__",
            "replicas" => replicas,
        });
        let text = manifest_text(manifest.node()).unwrap();
        assert!(text.contains("note: __ARGO_DIRECT_0_0__"));
        assert!(text.contains("replicas: {{inputs.parameters.replicas}}"));
        assert!(!text.contains("__ARGO_DIRECT_1_0__"));
    }

    #[test]
    fn test_imported_template_renders_template_ref() {
        let lib = echo(WorkflowBuilder::create(WorkflowSettings::new("shared")))
            .get_full_scope()
            .unwrap();
        let target = lib.template_ref("echo").unwrap();
        let scope = WorkflowBuilder::create(WorkflowSettings::new("app"))
            .import_library(&lib)
            .unwrap()
            .add_template("main", |t| {
                t.add_steps(|s| {
                    s.add_step(
                        "remote",
                        target,
                        |c| Ok(c.register(dict! {"msg" => "x"})),
                        StepOptions::new(),
                    )?;
                    Ok(())
                })
            })
            .unwrap()
            .get_full_scope()
            .unwrap();
        let m = to_manifest(&scope, &RenderOptions::default()).unwrap();
        assert_eq!(m.spec.templates.len(), 1);
        let step = &m.spec.templates[0].steps.as_ref().unwrap()[0][0];
        assert_eq!(step.template, None);
        assert_eq!(
            step.template_ref,
            Some(TemplateRefManifest {
                name: "shared".into(),
                template: "echo".into()
            })
        );
    }
}
