//! Workflow builder
//!
//! A workflow is a named collection of templates plus global parameters, an
//! optional entrypoint and imported libraries. [`WorkflowBuilder`] is
//! consumed by each step so a template added later can never be observed by
//! one added earlier; [`WorkflowBuilder::get_full_scope`] freezes the result
//! into a cheap-to-clone [`WorkflowScope`] that renders or is imported by
//! other workflows.
//!
//! ```text
//!   create(settings)
//!     └─ add_params ─ import_library ─ add_template* ─ set_entrypoint
//!                                                         └─ get_full_scope
//! ```

pub mod registry;

pub use registry::TemplateRegistry;

use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{ForgeError, Result};
use crate::expr::{Expr, Node};
use crate::graph::TemplateRef;
use crate::template::{params::validate_name, ParamRecord, ParamSet, TemplateBuilder, TemplateDef};
use crate::types::Shaped;

/// Resource-level settings of the rendered `WorkflowTemplate`
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowSettings {
    pub k8s_resource_name: String,
    pub service_account_name: Option<String>,
    pub parallelism: Option<u32>,
}

impl WorkflowSettings {
    pub fn new(k8s_resource_name: &str) -> Self {
        Self {
            k8s_resource_name: k8s_resource_name.to_string(),
            service_account_name: None,
            parallelism: None,
        }
    }

    pub fn service_account(mut self, name: &str) -> Self {
        self.service_account_name = Some(name.to_string());
        self
    }

    pub fn parallelism(mut self, limit: u32) -> Self {
        self.parallelism = Some(limit);
        self
    }
}

#[derive(Debug)]
pub struct WorkflowBuilder {
    settings: WorkflowSettings,
    params: ParamSet,
    registry: TemplateRegistry,
    entrypoint: Option<String>,
}

impl WorkflowBuilder {
    pub fn create(settings: WorkflowSettings) -> Self {
        debug!(workflow = %settings.k8s_resource_name, "workflow builder created");
        let params = ParamSet::new(&settings.k8s_resource_name);
        Self {
            settings,
            params,
            registry: TemplateRegistry::new(),
            entrypoint: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.settings.k8s_resource_name
    }

    /// Declare global parameters (`spec.arguments.parameters`)
    pub fn add_params(mut self, record: &ParamRecord) -> Result<Self> {
        self.params.add_record(record)?;
        Ok(self)
    }

    /// Reference to a declared global parameter
    pub fn param<T: Shaped>(&self, name: &str) -> Result<Expr<T>> {
        let def = self
            .params
            .get(name)
            .ok_or_else(|| ForgeError::UnknownWorkflowParameter {
                name: name.to_string(),
            })?;
        Ok(Expr::from_node(Arc::new(Node::WorkflowParam {
            name: def.name.clone(),
            shape: def.shape.clone(),
        })))
    }

    /// Make a frozen library's templates callable via [`TemplateRef::Imported`]
    pub fn import_library(mut self, library: &WorkflowScope) -> Result<Self> {
        debug!(workflow = %self.name(), library = %library.name(), "library imported");
        self.registry.import(library.clone())?;
        Ok(self)
    }

    /// Define one template
    ///
    /// The closure declares inputs, sets exactly one body and adds outputs.
    /// Templates defined earlier are visible for call checking; later ones
    /// are checked at render time.
    pub fn add_template(
        mut self,
        name: &str,
        build: impl FnOnce(&mut TemplateBuilder<'_>) -> Result<()>,
    ) -> Result<Self> {
        validate_name(name)?;
        if self.registry.contains(name) {
            return Err(ForgeError::DuplicateTemplate {
                name: name.to_string(),
                workflow: self.settings.k8s_resource_name.clone(),
            });
        }
        let def = {
            let mut template = TemplateBuilder::new(name, &self.registry);
            build(&mut template)?;
            template.build()?
        };
        self.registry.insert(def, &self.settings.k8s_resource_name)?;
        Ok(self)
    }

    pub fn set_entrypoint(mut self, name: &str) -> Result<Self> {
        if !self.registry.contains(name) {
            return Err(ForgeError::UnknownEntrypoint {
                name: name.to_string(),
            });
        }
        self.entrypoint = Some(name.to_string());
        Ok(self)
    }

    /// Freeze the workflow
    pub fn get_full_scope(self) -> Result<WorkflowScope> {
        info!(
            workflow = %self.settings.k8s_resource_name,
            templates = self.registry.len(),
            entrypoint = self.entrypoint.as_deref().unwrap_or("-"),
            "workflow frozen"
        );
        Ok(WorkflowScope {
            inner: Arc::new(ScopeInner {
                settings: self.settings,
                params: self.params,
                registry: self.registry,
                entrypoint: self.entrypoint,
            }),
        })
    }
}

#[derive(Debug)]
struct ScopeInner {
    settings: WorkflowSettings,
    params: ParamSet,
    registry: TemplateRegistry,
    entrypoint: Option<String>,
}

/// Frozen workflow
#[derive(Debug, Clone)]
pub struct WorkflowScope {
    inner: Arc<ScopeInner>,
}

impl PartialEq for WorkflowScope {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl WorkflowScope {
    pub fn name(&self) -> &str {
        &self.inner.settings.k8s_resource_name
    }

    pub fn settings(&self) -> &WorkflowSettings {
        &self.inner.settings
    }

    pub fn params(&self) -> &ParamSet {
        &self.inner.params
    }

    pub fn entrypoint(&self) -> Option<&str> {
        self.inner.entrypoint.as_deref()
    }

    pub fn registry(&self) -> &TemplateRegistry {
        &self.inner.registry
    }

    pub fn template(&self, name: &str) -> Option<&TemplateDef> {
        self.inner.registry.get(name)
    }

    pub fn templates(&self) -> impl Iterator<Item = &TemplateDef> {
        self.inner.registry.templates()
    }

    /// Reference for callers in a workflow that imported this one
    pub fn template_ref(&self, name: &str) -> Result<TemplateRef> {
        if self.template(name).is_none() {
            return Err(ForgeError::UnresolvedTemplate {
                reference: format!("{}/{}", self.name(), name),
            });
        }
        Ok(TemplateRef::imported(self.name(), name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::{define_param, ContainerBuilder};

    fn echo(t: &mut TemplateBuilder<'_>) -> Result<()> {
        t.add_container(ContainerBuilder::new().image("busybox"))
    }

    // ═══════════════════════════════════════════════════════════════
    // TEMPLATES
    // ═══════════════════════════════════════════════════════════════

    #[test]
    fn test_duplicate_template_rejected() {
        let err = WorkflowBuilder::create(WorkflowSettings::new("wf"))
            .add_template("a", echo)
            .unwrap()
            .add_template("a", echo)
            .unwrap_err();
        assert_eq!(err.code(), "FORGE-002");
        assert!(err.is_construction_error());
    }

    #[test]
    fn test_template_needs_body() {
        let err = WorkflowBuilder::create(WorkflowSettings::new("wf"))
            .add_template("empty", |_| Ok(()))
            .unwrap_err();
        assert_eq!(err.code(), "FORGE-004");
    }

    #[test]
    fn test_second_body_rejected() {
        let err = WorkflowBuilder::create(WorkflowSettings::new("wf"))
            .add_template("a", |t| {
                t.add_container(ContainerBuilder::new().image("busybox"))?;
                t.add_container(ContainerBuilder::new().image("alpine"))
            })
            .unwrap_err();
        assert_eq!(err.code(), "FORGE-005");
    }

    #[test]
    fn test_entrypoint_must_exist() {
        let err = WorkflowBuilder::create(WorkflowSettings::new("wf"))
            .add_template("a", echo)
            .unwrap()
            .set_entrypoint("main")
            .unwrap_err();
        assert_eq!(err.code(), "FORGE-001");
    }

    // ═══════════════════════════════════════════════════════════════
    // SCOPE
    // ═══════════════════════════════════════════════════════════════

    #[test]
    fn test_scope_keeps_definition_order() {
        let scope = WorkflowBuilder::create(WorkflowSettings::new("wf"))
            .add_template("z", echo)
            .unwrap()
            .add_template("a", echo)
            .unwrap()
            .get_full_scope()
            .unwrap();
        let names: Vec<_> = scope.templates().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["z", "a"]);
        assert_eq!(scope.entrypoint(), None);
    }

    #[test]
    fn test_template_ref_into_library() {
        let lib = WorkflowBuilder::create(WorkflowSettings::new("lib"))
            .add_template("task", echo)
            .unwrap()
            .get_full_scope()
            .unwrap();
        assert_eq!(
            lib.template_ref("task").unwrap(),
            TemplateRef::imported("lib", "task")
        );
        assert_eq!(lib.template_ref("nope").unwrap_err().code(), "FORGE-041");
    }

    #[test]
    fn test_library_imported_once() {
        let lib = WorkflowBuilder::create(WorkflowSettings::new("lib"))
            .add_template("task", echo)
            .unwrap()
            .get_full_scope()
            .unwrap();
        let err = WorkflowBuilder::create(WorkflowSettings::new("wf"))
            .import_library(&lib)
            .unwrap()
            .import_library(&lib)
            .unwrap_err();
        assert_eq!(err.code(), "FORGE-006");
    }

    #[test]
    fn test_workflow_param_lookup() {
        let wf = WorkflowBuilder::create(WorkflowSettings::new("wf"))
            .add_params(&ParamRecord::new().with(define_param("region", crate::expr::literal("us-east-2"))))
            .unwrap();
        let region = wf.param::<String>("region").unwrap();
        assert_eq!(region.to_string(), "workflow.parameters.region");
        assert_eq!(wf.param::<String>("zone").unwrap_err().code(), "FORGE-013");
    }
}
