//! Built-in workflow definitions
//!
//! Each entry builds a frozen [`WorkflowScope`] from [`CatalogOptions`]; the
//! CLI renders, validates and plans them by name.

pub mod bulk_load;
pub mod common;
pub mod console;
pub mod doubler;
pub mod full_migration;

use crate::error::{ForgeError, Result};
use crate::workflow::WorkflowScope;

/// Deployment-specific knobs shared by every catalog workflow
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogOptions {
    /// ConfigMap holding image locations and pull policies
    pub image_config_map: String,
    pub service_account: String,
    pub parallelism: u32,
}

impl Default for CatalogOptions {
    fn default() -> Self {
        Self {
            image_config_map: "migration-image-config".to_string(),
            service_account: "argo-workflow-executor".to_string(),
            parallelism: 100,
        }
    }
}

pub struct CatalogEntry {
    pub name: &'static str,
    pub description: &'static str,
    pub build: fn(&CatalogOptions) -> Result<WorkflowScope>,
}

impl std::fmt::Debug for CatalogEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogEntry")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

static ENTRIES: &[CatalogEntry] = &[
    CatalogEntry {
        name: doubler::NAME,
        description: "Loop over [1, 2, 3] and double each value",
        build: doubler::build,
    },
    CatalogEntry {
        name: console::NAME,
        description: "Migration console commands and config assembly (library)",
        build: console::build,
    },
    CatalogEntry {
        name: bulk_load::NAME,
        description: "Backfill documents from a snapshot into a target cluster (library)",
        build: bulk_load::build,
    },
    CatalogEntry {
        name: full_migration::NAME,
        description: "Snapshot, bulk load and replay for every source/target pair",
        build: full_migration::build,
    },
];

pub fn entries() -> &'static [CatalogEntry] {
    ENTRIES
}

pub fn find(name: &str) -> Result<&'static CatalogEntry> {
    ENTRIES
        .iter()
        .find(|e| e.name == name)
        .ok_or_else(|| ForgeError::UnknownWorkflow {
            name: name.to_string(),
        })
}

/// Build the named workflow
pub fn build(name: &str, options: &CatalogOptions) -> Result<WorkflowScope> {
    let entry = find(name)?;
    (entry.build)(options)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_entry_builds_and_validates() {
        let options = CatalogOptions::default();
        for entry in entries() {
            let scope = (entry.build)(&options).unwrap();
            assert_eq!(scope.name(), entry.name);
            crate::render::validate(&scope).unwrap();
        }
    }

    #[test]
    fn test_unknown_workflow() {
        let err = find("nope").unwrap_err();
        assert_eq!(err.code(), "FORGE-047");
    }

    #[test]
    fn test_options_reach_settings() {
        let options = CatalogOptions {
            service_account: "runner".to_string(),
            ..CatalogOptions::default()
        };
        let scope = build(doubler::NAME, &options).unwrap();
        assert_eq!(scope.settings().service_account_name.as_deref(), Some("runner"));
    }
}
