// The #[error] attribute from thiserror uses struct fields via string interpolation,
// but Rust's unused_assignments lint doesn't recognize this.
#![allow(unused_assignments)]

//! Forge Error Types with Error Codes
//!
//! Error code ranges:
//! - FORGE-000-009: Builder state errors
//! - FORGE-010-019: Parameter model errors
//! - FORGE-020-029: Step/DAG construction errors
//! - FORGE-030-039: Registration errors
//! - FORGE-040-049: Render/validation errors
//! - FORGE-090-099: IO/serialization/config errors
//!
//! Construction errors (000-039) are raised while a workflow is being built.
//! Render errors (040-049) are raised by the validation pass before any
//! manifest text exists, so a failed render never emits a partial document.

use miette::Diagnostic;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ForgeError>;

/// Trait for errors that provide fix suggestions
pub trait FixSuggestion {
    fn fix_suggestion(&self) -> Option<&str>;
}

/// All error variants are part of the public API.
///
/// Implements both `thiserror::Error` for std error compatibility
/// and `miette::Diagnostic` for fancy terminal error display.
#[derive(Error, Debug, Diagnostic)]
#[diagnostic(url(docsrs))]
pub enum ForgeError {
    // ═══════════════════════════════════════════
    // BUILDER STATE (000-009)
    // ═══════════════════════════════════════════
    #[error("[FORGE-001] Entrypoint '{name}' is not a registered template")]
    #[diagnostic(
        code(forge::unknown_entrypoint),
        help("Add the template with add_template() before calling set_entrypoint()")
    )]
    UnknownEntrypoint { name: String },

    #[error("[FORGE-002] Template '{name}' is already defined in workflow '{workflow}'")]
    #[diagnostic(code(forge::duplicate_template))]
    DuplicateTemplate { name: String, workflow: String },

    #[error("[FORGE-003] Invalid name '{name}': {reason}")]
    #[diagnostic(code(forge::invalid_name))]
    InvalidName { name: String, reason: String },

    #[error("[FORGE-004] Template '{template}' has no body")]
    #[diagnostic(
        code(forge::missing_body),
        help("Call container(), resource(), steps() or dag() on the template")
    )]
    MissingBody { template: String },

    #[error("[FORGE-005] Template '{template}' already has a {existing} body")]
    #[diagnostic(code(forge::body_already_set))]
    BodyAlreadySet { template: String, existing: String },

    #[error("[FORGE-006] Library '{library}' is already imported")]
    DuplicateLibrary { library: String },

    #[error("[FORGE-007] Output '{output}' on '{template}' cannot be read from a {body} body")]
    OutputKindMismatch {
        template: String,
        output: String,
        body: String,
    },

    // ═══════════════════════════════════════════
    // PARAMETER MODEL (010-019)
    // ═══════════════════════════════════════════
    #[error("[FORGE-010] Duplicate parameter '{name}' on '{owner}'")]
    #[diagnostic(code(forge::duplicate_parameter))]
    DuplicateParameter { name: String, owner: String },

    #[error("[FORGE-011] Required parameter '{name}' on '{owner}' cannot carry a default")]
    #[diagnostic(code(forge::required_with_default))]
    RequiredWithDefault { name: String, owner: String },

    #[error("[FORGE-012] Unknown input '{name}' on '{owner}'")]
    #[diagnostic(code(forge::unknown_input))]
    UnknownInput { name: String, owner: String },

    #[error("[FORGE-013] Unknown workflow parameter '{name}'")]
    UnknownWorkflowParameter { name: String },

    // ═══════════════════════════════════════════
    // STEP / DAG CONSTRUCTION (020-029)
    // ═══════════════════════════════════════════
    #[error("[FORGE-020] Cycle detected in DAG: {cycle}")]
    #[diagnostic(code(forge::dag_cycle))]
    CycleDetected { cycle: String },

    #[error("[FORGE-021] Missing dependency: task '{task_id}' depends on unknown '{dep_id}'")]
    MissingDependency { task_id: String, dep_id: String },

    #[error("[FORGE-022] Duplicate step/task name '{name}' in '{template}'")]
    DuplicateCallName { name: String, template: String },

    #[error("[FORGE-023] '{reference}' references unknown step/task '{target}'")]
    UnknownCall { reference: String, target: String },

    #[error("[FORGE-024] Template '{template}' declares no output '{output}'")]
    UnknownOutput { template: String, output: String },

    #[error("[FORGE-025] Task '{task_id}' reads outputs of '{from_task}' which is not upstream")]
    NotUpstream { from_task: String, task_id: String },

    #[error("[FORGE-026] Invalid retry strategy: {reason}")]
    InvalidRetry { reason: String },

    #[error("[FORGE-027] Step '{step}' reads outputs of '{from_step}' from the same parallel group")]
    SameGroupReference { from_step: String, step: String },

    #[error("[FORGE-028] Loop item referenced outside a loop in call '{call}'")]
    ItemOutsideLoop { call: String },

    // ═══════════════════════════════════════════
    // REGISTRATION (030-039)
    // ═══════════════════════════════════════════
    #[error("[FORGE-030] Call '{call}' to '{template}' leaves required input '{input}' unbound")]
    #[diagnostic(
        code(forge::missing_required_input),
        help("Bind every required input in register(), or forward it with select_inputs_for_register()")
    )]
    MissingRequiredInput {
        call: String,
        template: String,
        input: String,
    },

    #[error("[FORGE-031] Call '{call}' binds '{input}' which '{template}' does not declare")]
    UnknownArgument {
        call: String,
        template: String,
        input: String,
    },

    // ═══════════════════════════════════════════
    // RENDER / VALIDATION (040-049)
    // ═══════════════════════════════════════════
    #[error("[FORGE-040] Type mismatch at '{path}': expected {expected}, got {actual}")]
    #[diagnostic(code(forge::type_mismatch))]
    TypeMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("[FORGE-041] Unresolved template reference '{reference}'")]
    #[diagnostic(
        code(forge::unresolved_template),
        help("Define the template locally or import its library with import_library()")
    )]
    UnresolvedTemplate { reference: String },

    #[error("[FORGE-042] Template reference cycle: {cycle}")]
    TemplateCycle { cycle: String },

    #[error("[FORGE-043] Literal array mixes incompatible element shapes: {shapes}")]
    MixedArrayShape { shapes: String },

    #[error("[FORGE-044] Path '{path}' not found in constant value")]
    PathNotFound { path: String },

    #[error("[FORGE-045] Cannot deserialize constant: {details}")]
    InvalidJson { details: String },

    #[error("[FORGE-046] Condition at '{path}' is not boolean (got {actual})")]
    NonBooleanCondition { path: String, actual: String },

    #[error("[FORGE-047] Unknown bundled workflow '{name}'")]
    UnknownWorkflow { name: String },

    #[error("[FORGE-048] Path '{path}' is not supported (use a.b, $.a.b or $.a[0].b)")]
    UnsupportedPath { path: String },

    // ═══════════════════════════════════════════
    // IO / SERIALIZATION / CONFIG (090-099)
    // ═══════════════════════════════════════════
    #[error("[FORGE-093] IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("[FORGE-094] JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("[FORGE-095] YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("[FORGE-096] Config error: {reason}")]
    ConfigError { reason: String },
}

impl ForgeError {
    /// Get the error code (e.g., "FORGE-001")
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownEntrypoint { .. } => "FORGE-001",
            Self::DuplicateTemplate { .. } => "FORGE-002",
            Self::InvalidName { .. } => "FORGE-003",
            Self::MissingBody { .. } => "FORGE-004",
            Self::BodyAlreadySet { .. } => "FORGE-005",
            Self::DuplicateLibrary { .. } => "FORGE-006",
            Self::OutputKindMismatch { .. } => "FORGE-007",
            Self::DuplicateParameter { .. } => "FORGE-010",
            Self::RequiredWithDefault { .. } => "FORGE-011",
            Self::UnknownInput { .. } => "FORGE-012",
            Self::UnknownWorkflowParameter { .. } => "FORGE-013",
            Self::CycleDetected { .. } => "FORGE-020",
            Self::MissingDependency { .. } => "FORGE-021",
            Self::DuplicateCallName { .. } => "FORGE-022",
            Self::UnknownCall { .. } => "FORGE-023",
            Self::UnknownOutput { .. } => "FORGE-024",
            Self::NotUpstream { .. } => "FORGE-025",
            Self::InvalidRetry { .. } => "FORGE-026",
            Self::SameGroupReference { .. } => "FORGE-027",
            Self::ItemOutsideLoop { .. } => "FORGE-028",
            Self::MissingRequiredInput { .. } => "FORGE-030",
            Self::UnknownArgument { .. } => "FORGE-031",
            Self::TypeMismatch { .. } => "FORGE-040",
            Self::UnresolvedTemplate { .. } => "FORGE-041",
            Self::TemplateCycle { .. } => "FORGE-042",
            Self::MixedArrayShape { .. } => "FORGE-043",
            Self::PathNotFound { .. } => "FORGE-044",
            Self::InvalidJson { .. } => "FORGE-045",
            Self::NonBooleanCondition { .. } => "FORGE-046",
            Self::UnknownWorkflow { .. } => "FORGE-047",
            Self::UnsupportedPath { .. } => "FORGE-048",
            Self::IoError(_) => "FORGE-093",
            Self::JsonError(_) => "FORGE-094",
            Self::YamlError(_) => "FORGE-095",
            Self::ConfigError { .. } => "FORGE-096",
        }
    }

    /// Construction errors surface while the builder runs; everything
    /// else is raised by the render pass or by IO.
    pub fn is_construction_error(&self) -> bool {
        self.code() < "FORGE-040"
    }
}

impl FixSuggestion for ForgeError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            ForgeError::UnknownEntrypoint { .. } => {
                Some("Register the template before naming it as entrypoint")
            }
            ForgeError::DuplicateTemplate { .. } => Some("Use unique template names per workflow"),
            ForgeError::InvalidName { .. } => {
                Some("Use letters, digits and '-' only, starting with a letter")
            }
            ForgeError::MissingBody { .. } => {
                Some("Give the template exactly one container, resource, steps or dag body")
            }
            ForgeError::BodyAlreadySet { .. } => Some("A template has exactly one body kind"),
            ForgeError::DuplicateLibrary { .. } => Some("Import each library once"),
            ForgeError::OutputKindMismatch { .. } => Some(
                "Containers output from a path, resources from a JSONPath, steps/dags from an expression",
            ),
            ForgeError::DuplicateParameter { .. } => {
                Some("Rename the parameter or drop it from the shared record")
            }
            ForgeError::RequiredWithDefault { .. } => {
                Some("Use add_optional_input() for parameters with a default")
            }
            ForgeError::UnknownInput { .. } => Some("Declare the input before referencing it"),
            ForgeError::UnknownWorkflowParameter { .. } => {
                Some("Register the parameter with add_params() first")
            }
            ForgeError::CycleDetected { .. } => Some("Remove circular dependencies from the DAG"),
            ForgeError::MissingDependency { .. } => {
                Some("Add the dependency task before the task that depends on it")
            }
            ForgeError::DuplicateCallName { .. } => Some("Use unique step/task names per body"),
            ForgeError::UnknownCall { .. } => {
                Some("Reference only steps/tasks added earlier in the same body")
            }
            ForgeError::UnknownOutput { .. } => {
                Some("Check the callee's declared outputs (add_output_*)")
            }
            ForgeError::NotUpstream { .. } => {
                Some("List the source task in this task's dependencies")
            }
            ForgeError::InvalidRetry { .. } => {
                Some("Use a non-negative limit and a backoff factor >= 1")
            }
            ForgeError::SameGroupReference { .. } => {
                Some("Move the consumer into a later step group")
            }
            ForgeError::ItemOutsideLoop { .. } => Some("Add loop_with() to the call options"),
            ForgeError::MissingRequiredInput { .. } => {
                Some("Bind every required input of the target template")
            }
            ForgeError::UnknownArgument { .. } => {
                Some("Remove the argument or declare it on the target template")
            }
            ForgeError::TypeMismatch { .. } => {
                Some("Bind an expression whose shape matches the declared type token")
            }
            ForgeError::UnresolvedTemplate { .. } => {
                Some("Import the library or define the template in this workflow")
            }
            ForgeError::TemplateCycle { .. } => {
                Some("Break the recursion between templates reachable from the entrypoint")
            }
            ForgeError::MixedArrayShape { .. } => {
                Some("Keep literal arrays homogeneous (all strings, all numbers, ...)")
            }
            ForgeError::PathNotFound { .. } => {
                Some("Use dig() with a default for optional configuration")
            }
            ForgeError::InvalidJson { .. } => Some("Only deserialize JSON-encoded strings"),
            ForgeError::NonBooleanCondition { .. } => {
                Some("Use a comparison, not() or is_empty() as the condition")
            }
            ForgeError::UnknownWorkflow { .. } => Some("Run `argo-forge list` to see the names"),
            ForgeError::UnsupportedPath { .. } => {
                Some("Use simple paths like $.field.subfield or $.array[0].field")
            }
            ForgeError::IoError(_) => Some("Check file path and permissions"),
            ForgeError::JsonError(_) => Some("Check JSON syntax"),
            ForgeError::YamlError(_) => Some("Check YAML syntax: indentation and quoting"),
            ForgeError::ConfigError { .. } => Some("Check argo-forge.toml syntax"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_matches_message_prefix() {
        let err = ForgeError::CycleDetected {
            cycle: "a → c → a".to_string(),
        };
        assert_eq!(err.code(), "FORGE-020");
        assert!(err.to_string().starts_with("[FORGE-020]"));
    }

    #[test]
    fn test_construction_vs_render_errors() {
        let construction = ForgeError::MissingRequiredInput {
            call: "double".into(),
            template: "childDoubler".into(),
            input: "value".into(),
        };
        let render = ForgeError::TemplateCycle {
            cycle: "a → a".into(),
        };
        assert!(construction.is_construction_error());
        assert!(!render.is_construction_error());
    }

    #[test]
    fn test_every_error_has_suggestion() {
        let errors = vec![
            ForgeError::UnknownEntrypoint { name: "x".into() },
            ForgeError::PathNotFound { path: "$.a".into() },
            ForgeError::ConfigError { reason: "bad".into() },
        ];
        for err in errors {
            assert!(err.fix_suggestion().is_some(), "{} has no fix", err.code());
        }
    }
}
