//! Template lookup for one workflow
//!
//! Holds the workflow's own templates (in definition order) and the frozen
//! scopes of imported libraries. Each builder owns its registry; nothing is
//! shared between workflows.

use std::collections::BTreeMap;

use rustc_hash::FxHashMap;

use crate::error::{ForgeError, Result};
use crate::graph::TemplateRef;
use crate::template::TemplateDef;

use super::WorkflowScope;

#[derive(Debug, Clone, Default)]
pub struct TemplateRegistry {
    templates: Vec<TemplateDef>,
    index: FxHashMap<String, usize>,
    libraries: BTreeMap<String, WorkflowScope>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, def: TemplateDef, workflow: &str) -> Result<()> {
        if self.index.contains_key(&def.name) {
            return Err(ForgeError::DuplicateTemplate {
                name: def.name,
                workflow: workflow.to_string(),
            });
        }
        self.index.insert(def.name.clone(), self.templates.len());
        self.templates.push(def);
        Ok(())
    }

    pub fn import(&mut self, library: WorkflowScope) -> Result<()> {
        let name = library.name().to_string();
        if self.libraries.contains_key(&name) {
            return Err(ForgeError::DuplicateLibrary { library: name });
        }
        self.libraries.insert(name, library);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&TemplateDef> {
        self.index.get(name).map(|&i| &self.templates[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn library(&self, name: &str) -> Option<&WorkflowScope> {
        self.libraries.get(name)
    }

    pub fn libraries(&self) -> impl Iterator<Item = &WorkflowScope> {
        self.libraries.values()
    }

    /// Own templates in definition order
    pub fn templates(&self) -> impl Iterator<Item = &TemplateDef> {
        self.templates.iter()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn resolve(&self, target: &TemplateRef) -> Option<&TemplateDef> {
        match target {
            TemplateRef::Local(name) => self.get(name),
            TemplateRef::Imported { library, template } => {
                self.libraries.get(library)?.template(template)
            }
        }
    }

    /// Resolve at construction time
    ///
    /// Imported targets must exist right away since libraries are frozen.
    /// Local targets may be defined later (`Ok(None)`); render checks them.
    pub fn check_target(&self, target: &TemplateRef) -> Result<Option<&TemplateDef>> {
        match target {
            TemplateRef::Local(name) => Ok(self.get(name)),
            TemplateRef::Imported { .. } => {
                self.resolve(target)
                    .map(Some)
                    .ok_or_else(|| ForgeError::UnresolvedTemplate {
                        reference: target.to_string(),
                    })
            }
        }
    }
}
