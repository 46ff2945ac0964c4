//! Step/task graph
//!
//! - `call`: call targets, registrations, loop specs and the registration context
//! - `steps`: sequential bodies made of parallel step groups
//! - `dag`: dependency-ordered bodies with construction-time cycle detection

pub mod call;
pub mod dag;
pub mod steps;

pub use call::{
    check_registration, select_inputs_for_register, BodyKind, Call, CallContext, CallHandle,
    LoopSpec, Registration, TemplateRef,
};
pub use dag::{DagBody, DagBuilder, DagGraph, TaskOptions};
pub use steps::{ParallelGroup, StepOptions, StepsBody, StepsBuilder};

use tracing::debug;

use crate::error::Result;
use crate::expr::Expr;
use crate::template::{params::validate_name, InputScope};
use crate::workflow::TemplateRegistry;

use call::Visibility;

/// Everything a call needs besides its registration closure
pub(crate) struct CallRequest<'a> {
    pub name: &'a str,
    pub target: TemplateRef,
    pub when: Option<Expr<bool>>,
    pub loop_spec: Option<LoopSpec>,
    pub dependencies: Vec<String>,
}

/// Resolve, register and check one call
pub(crate) fn build_call<F>(
    registry: &TemplateRegistry,
    caller: &InputScope,
    visibility: &Visibility<'_>,
    request: CallRequest<'_>,
    register: F,
) -> Result<Call>
where
    F: FnOnce(&CallContext<'_>) -> Result<Registration>,
{
    let CallRequest {
        name,
        target,
        when,
        loop_spec,
        dependencies,
    } = request;

    validate_name(name)?;
    let callee = registry.check_target(&target)?;
    let in_loop = loop_spec.is_some();

    if let Some(spec) = &loop_spec {
        visibility.check(name, spec.node(), false)?;
    }

    let ctx = CallContext {
        call: name,
        caller,
        callee,
        target: &target,
        loop_item: loop_spec.as_ref().map(LoopSpec::item),
        visibility,
    };
    let arguments = register(&ctx)?;

    for (_, value) in arguments.iter() {
        visibility.check(name, value, in_loop)?;
    }
    if let Some(cond) = &when {
        visibility.check(name, cond.node(), in_loop)?;
    }
    if let Some(def) = callee {
        check_registration(name, def, &arguments)?;
    } else {
        debug!(call = name, target = %target, "callee not yet defined, checking at render");
    }

    Ok(Call {
        name: name.to_string(),
        target,
        arguments,
        when,
        loop_spec,
        dependencies,
    })
}

/// Output shapes of a known callee, for handles
pub(crate) fn callee_outputs(
    registry: &TemplateRegistry,
    target: &TemplateRef,
) -> Option<Vec<(String, crate::types::Shape)>> {
    registry.resolve(target).map(|def| {
        def.outputs
            .iter()
            .map(|o| (o.name.clone(), o.shape.clone()))
            .collect()
    })
}
