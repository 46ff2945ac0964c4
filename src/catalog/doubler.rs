//! Minimal loop example: `main` calls `childDoubler` once per element of `[1, 2, 3]`

use serde_json::json;

use crate::dict;
use crate::error::Result;
use crate::expr::{self, literal};
use crate::exprs;
use crate::graph::{LoopSpec, StepOptions, TemplateRef};
use crate::template::ContainerBuilder;
use crate::types::type_token;
use crate::workflow::{WorkflowBuilder, WorkflowScope, WorkflowSettings};

use super::CatalogOptions;

pub const NAME: &str = "doubler";

pub fn build(options: &CatalogOptions) -> Result<WorkflowScope> {
    WorkflowBuilder::create(
        WorkflowSettings::new(NAME).service_account(&options.service_account),
    )
    .add_template("childDoubler", |t| {
        let n = t.add_required_input("iterationNumber", type_token::<i64>(), None)?;
        let script = expr::fill_template(
            "echo $(( {{N}} * 2 )) > /tmp/doubled",
            dict! {"N" => expr::as_string(&n)},
        );
        t.add_container(
            ContainerBuilder::new()
                .image("busybox")
                .command(&["/bin/sh", "-c"])
                .args(exprs![script]),
        )?;
        t.add_path_output("doubled", "/tmp/doubled", type_token::<i64>())
    })?
    .add_template("main", |t| {
        t.add_steps(|s| {
            s.add_step(
                "double",
                TemplateRef::local("childDoubler"),
                |c| Ok(c.register(dict! {"iterationNumber" => c.item::<i64>()?})),
                StepOptions::new().loop_with(LoopSpec::items(literal(json!([1, 2, 3])))),
            )?;
            Ok(())
        })
    })?
    .set_entrypoint("main")?
    .get_full_scope()
}
