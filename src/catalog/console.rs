//! Migration console library
//!
//! Imported by the other workflows; runs console commands and assembles the
//! services config the console reads.

use crate::dict;
use crate::error::Result;
use crate::expr::{self, empty};
use crate::exprs;
use crate::template::ContainerBuilder;
use crate::types::{type_token, Record};
use crate::workflow::{WorkflowBuilder, WorkflowScope, WorkflowSettings};

use super::common::{image_inputs, image_params};
use super::CatalogOptions;

pub const NAME: &str = "migration-console";

pub const RUN_COMMAND: &str = "runMigrationCommand";
pub const GET_CONSOLE_CONFIG: &str = "getConsoleConfig";

const CONSOLE_CONFIG_PATH: &str = "/tmp/migration_services.yaml";

const CONFIG_SCRIPT: &str = "set -e\n\
echo '{{SOURCE}}' > /tmp/source.json\n\
echo '{{TARGET}}' > /tmp/target.json\n\
echo '{{SNAPSHOT}}' > /tmp/snapshot.json\n\
console-config-builder --source /tmp/source.json --target /tmp/target.json \
--snapshot /tmp/snapshot.json > {{OUT}}";

pub fn build(options: &CatalogOptions) -> Result<WorkflowScope> {
    WorkflowBuilder::create(
        WorkflowSettings::new(NAME).service_account(&options.service_account),
    )
    .add_template(RUN_COMMAND, |t| {
        t.describe("Run a shell command inside the console image");
        let command = t.add_required_input("command", type_token::<String>(), None)?;
        let inputs = t.add_inputs_from_record(&image_params(&["MigrationConsole"]))?;
        let (image, pull_policy) = image_inputs(&inputs, "MigrationConsole")?;
        t.add_container(
            ContainerBuilder::new()
                .image_info(image, pull_policy)
                .command(&["/bin/sh", "-c"])
                .args(exprs![command]),
        )
    })?
    .add_template(GET_CONSOLE_CONFIG, |t| {
        let target = t.add_required_input("targetConfig", type_token::<Record>(), None)?;
        let source = t.add_optional_input("sourceConfig", |_| Ok(empty::<Record>()))?;
        let snapshot = t.add_optional_input("snapshotConfig", |_| Ok(empty::<Record>()))?;
        let inputs = t.add_inputs_from_record(&image_params(&["MigrationConsole"]))?;
        let (image, pull_policy) = image_inputs(&inputs, "MigrationConsole")?;
        let script = expr::fill_template(
            CONFIG_SCRIPT,
            dict! {
                "SOURCE" => expr::serialize::<Record>(source),
                "TARGET" => expr::serialize::<Record>(target),
                "SNAPSHOT" => expr::serialize::<Record>(snapshot),
                "OUT" => CONSOLE_CONFIG_PATH,
            },
        );
        t.add_container(
            ContainerBuilder::new()
                .image_info(image, pull_policy)
                .command(&["/bin/sh", "-c"])
                .args(exprs![script]),
        )?;
        t.add_path_output("configContents", CONSOLE_CONFIG_PATH, type_token::<String>())
    })?
    .get_full_scope()
}
