//! argo-forge - typed builder for Argo Workflow templates
//!
//! Workflows are assembled in Rust, checked while they are built, and
//! rendered to `WorkflowTemplate` manifests.
//!
//! ```text
//! types ──► expr (Node tree, fold, lower to {{...}} / {{=...}})
//!             │
//!             ▼
//! template (params, container, resource, retry)
//!             │
//!             ▼
//! graph (calls, steps, dag) ◄── workflow (builder, registry, frozen scope)
//!             │
//!             ▼
//! render (validate, plan, manifest) ──► YAML / JSON
//! ```
//!
//! `catalog` holds the built-in workflows the CLI exposes; `config` supplies
//! their deployment defaults.

pub mod catalog;
pub mod config;
pub mod error;
pub mod expr;
pub mod graph;
pub mod render;
pub mod template;
pub mod types;
pub mod workflow;

pub use error::{FixSuggestion, ForgeError, Result};
pub use expr::{Expr, IntoExpr};
pub use graph::{LoopSpec, StepOptions, TaskOptions, TemplateRef};
pub use render::{render, OutputFormat, RenderOptions};
pub use template::{ContainerBuilder, ParamRecord, ResourceAction, ResourceBuilder, RetryStrategy};
pub use types::{type_token, Record, Serialized, Shape, Shaped, TypeToken};
pub use workflow::{WorkflowBuilder, WorkflowScope, WorkflowSettings};
