//! Full migration: for each source/target pair, snapshot the source, bulk
//! load every configured snapshot into the target and start a replayer

use serde_json::{json, Value};

use crate::dict;
use crate::error::Result;
use crate::expr::{self, literal, workflow_param, workflow_value, Expr, IntoExpr};
use crate::exprs;
use crate::graph::{select_inputs_for_register, LoopSpec, StepOptions, TaskOptions, TemplateRef};
use crate::template::{ContainerBuilder, ResourceAction, ResourceBuilder};
use crate::types::{type_token, Record};
use crate::workflow::{WorkflowBuilder, WorkflowScope, WorkflowSettings};

use super::common::{
    common_workflow_params, image_inputs, image_params, image_params_from_config_map,
    IMAGE_CONFIG_MAP_PARAM, IMAGE_KEYS,
};
use super::console::{self, RUN_COMMAND};
use super::{bulk_load, CatalogOptions};

pub const NAME: &str = "full-migration";

/// Upper bound on consecutive backfill iterations per snapshot
const RFS_ITERATIONS: i64 = 100;

const SNAPSHOT_SCRIPT: &str = "set -e\n\
echo '{{SOURCE}}' > /tmp/source.json\n\
console snapshot create --source /tmp/source.json --config '{{SNAPSHOT}}' \
--output /tmp/snapshot.json";

/// Switches applied to every backfill after the first
fn experimental_backfill_settings() -> Expr<Value> {
    literal(json!({"maxShardSizeBytes": 85899345920_i64, "allowLooseVersionMatching": true}))
}

pub fn build(options: &CatalogOptions) -> Result<WorkflowScope> {
    let console = console::build(options)?;
    let bulk_load = bulk_load::build(options)?;
    let run_command = console.template_ref(RUN_COMMAND)?;
    let run_bulk_load = bulk_load.template_ref("runBulkLoad")?;
    let bulk_load_images = image_params(&["MigrationConsole", "ReindexFromSnapshot"]);

    WorkflowBuilder::create(
        WorkflowSettings::new(NAME)
            .service_account(&options.service_account)
            .parallelism(options.parallelism),
    )
    .add_params(&common_workflow_params(options))?
    .import_library(&console)?
    .import_library(&bulk_load)?
    .add_template("doNothing", |t| {
        t.add_steps(|s| s.add_step_group(|_| Ok(())))
    })?
    .add_template("createOrGetSnapshot", |t| {
        let source = t.add_required_input("sourceConfig", type_token::<Record>(), None)?;
        let snapshot = t.add_required_input("snapshotConfig", type_token::<Record>(), None)?;
        let inputs = t.add_inputs_from_record(&image_params(&["MigrationConsole"]))?;
        let (image, pull_policy) = image_inputs(&inputs, "MigrationConsole")?;
        let script = expr::fill_template(
            SNAPSHOT_SCRIPT,
            dict! {
                "SOURCE" => expr::serialize::<Record>(source),
                "SNAPSHOT" => expr::serialize::<Record>(snapshot),
            },
        );
        t.add_container(
            ContainerBuilder::new()
                .image_info(image, pull_policy)
                .command(&["/bin/sh", "-c"])
                .args(exprs![script]),
        )?;
        t.add_path_output("snapshotConfig", "/tmp/snapshot.json", type_token::<Record>())
    })?
    .add_template("runReplayerForTarget", |t| {
        let target = t.add_required_input("targetConfig", type_token::<Record>(), None)?;
        let inputs = t.add_inputs_from_record(&image_params(&["TrafficReplayer"]))?;
        let (image, pull_policy) = image_inputs(&inputs, "TrafficReplayer")?;
        let name = expr::concat(exprs![workflow_value("name"), "-replayer"]);
        t.add_resource(
            ResourceBuilder::new(
                ResourceAction::Create,
                expr::make_dict(dict! {
                    "apiVersion" => "apps/v1",
                    "kind" => "Deployment",
                    "metadata" => expr::make_dict(dict! {"name" => &name}),
                    "spec" => expr::make_dict(dict! {
                        "replicas" => 1,
                        "template" => expr::make_dict(dict! {
                            "spec" => expr::make_dict(dict! {
                                "containers" => expr::to_array(exprs![expr::make_dict(dict! {
                                    "name" => "replayer",
                                    "image" => image,
                                    "imagePullPolicy" => pull_policy,
                                    "args" => expr::to_array(exprs![
                                        "--target-uri",
                                        expr::as_string(expr::json_path_strict(&target, "endpoint")),
                                    ]),
                                })]),
                            }),
                        }),
                    }),
                }),
            )
            .set_owner_reference(true),
        )
    })?
    .add_template("runSingleRfsIteration", |t| {
        t.add_required_input("sessionName", type_token::<String>(), None)?;
        let iteration = t.add_required_input("iterationNumber", type_token::<i64>(), None)?;
        t.add_required_input("sourceConfig", type_token::<Record>(), None)?;
        t.add_required_input("snapshotConfig", type_token::<Record>(), None)?;
        t.add_required_input("targetConfig", type_token::<Record>(), None)?;
        let backfill =
            t.add_required_input("documentBackfillConfig", type_token::<Record>(), None)?;
        t.add_inputs_from_record(&bulk_load_images)?;
        t.add_dag(|d| {
            d.add_task(
                "createSnapshot",
                TemplateRef::local("createOrGetSnapshot"),
                |c| select_inputs_for_register(c.caller(), c),
                TaskOptions::new(),
            )?;
            d.add_task(
                "runRfsIteration",
                run_bulk_load.clone(),
                |c| {
                    let tuned = expr::ternary::<Record>(
                        expr::gt(&iteration, 1),
                        expr::merge_dicts(exprs![&backfill, experimental_backfill_settings()]),
                        backfill.clone(),
                    );
                    Ok(select_inputs_for_register(c.caller(), c)?
                        .set(
                            "snapshotConfig",
                            c.task_output::<Record>("createSnapshot", "snapshotConfig")?,
                        )
                        .set("documentBackfillConfig", tuned))
                },
                TaskOptions::new().depends_on(&["createSnapshot"]),
            )?;
            Ok(())
        })
    })?
    .add_template("runRfsContinuously", |t| {
        t.add_required_input("sessionName", type_token::<String>(), None)?;
        t.add_required_input("sourceConfig", type_token::<Record>(), None)?;
        t.add_required_input("snapshotConfig", type_token::<Record>(), None)?;
        t.add_required_input("targetConfig", type_token::<Record>(), None)?;
        t.add_required_input("documentBackfillConfig", type_token::<Record>(), None)?;
        t.add_inputs_from_record(&bulk_load_images)?;
        let iterations = expr::to_array((1..=RFS_ITERATIONS).map(|i| literal(i).into_node()));
        t.add_steps(|s| {
            s.add_step(
                "runRfsIteration",
                TemplateRef::local("runSingleRfsIteration"),
                |c| {
                    let n = c.item::<i64>()?;
                    let session = expr::concat_with(
                        "-",
                        exprs![c.caller().get::<String>("sessionName")?, expr::as_string(&n)],
                    );
                    Ok(select_inputs_for_register(c.caller(), c)?
                        .set("sessionName", session)
                        .set("iterationNumber", n))
                },
                StepOptions::new().loop_with(LoopSpec::items(iterations)),
            )?;
            Ok(())
        })
    })?
    .add_template("foreachSnapshotMigration", |t| {
        let source = t.add_required_input("sourceConfig", type_token::<Record>(), None)?;
        t.add_required_input("targetConfig", type_token::<Record>(), None)?;
        let migration =
            t.add_required_input("snapshotExtractAndLoadConfig", type_token::<Record>(), None)?;
        t.add_inputs_from_record(&bulk_load_images)?;
        let backfill = expr::dig::<Value>(&migration, &["documentBackfillConfig"], json!({}));
        t.add_steps(|s| {
            let id = s.add_step(
                "idGenerator",
                TemplateRef::local("doNothing"),
                |c| Ok(c.register(Vec::new())),
                StepOptions::new(),
            )?;
            s.add_step(
                "metadataEvaluate",
                run_command.clone(),
                |c| {
                    let command = expr::concat(exprs![
                        "console metadata evaluate --source-version ",
                        expr::as_string(expr::json_path_strict(&source, "version")),
                    ]);
                    Ok(select_inputs_for_register(c.caller(), c)?.set("command", command))
                },
                StepOptions::new(),
            )?;
            s.add_step(
                "runRfs",
                TemplateRef::local("runRfsContinuously"),
                |c| {
                    Ok(select_inputs_for_register(c.caller(), c)?
                        .set("sessionName", id.id())
                        .set(
                            "snapshotConfig",
                            expr::dig::<Value>(&migration, &["snapshotConfig"], json!({})),
                        )
                        .set("documentBackfillConfig", &backfill))
                },
                StepOptions::new().when(expr::not(expr::is_empty(&backfill))),
            )?;
            Ok(())
        })
    })?
    .add_template("foreachMigrationPair", |t| {
        t.add_required_input("sourceConfig", type_token::<Record>(), None)?;
        t.add_required_input("targetConfig", type_token::<Record>(), None)?;
        let migrations = t.add_required_input(
            "snapshotExtractAndLoadConfigArray",
            type_token::<Vec<Record>>(),
            None,
        )?;
        t.add_inputs_from_record(&image_params(&[
            "MigrationConsole",
            "ReindexFromSnapshot",
            "TrafficReplayer",
        ]))?;
        t.add_steps(|s| {
            s.add_step(
                "foreachSnapshotMigration",
                TemplateRef::local("foreachSnapshotMigration"),
                |c| {
                    Ok(select_inputs_for_register(c.caller(), c)?
                        .set("snapshotExtractAndLoadConfig", c.item::<Record>()?))
                },
                StepOptions::new()
                    .when(expr::not(expr::is_empty(&migrations)))
                    .loop_with(LoopSpec::items(&migrations)),
            )?;
            s.add_step(
                "runReplayerForTarget",
                TemplateRef::local("runReplayerForTarget"),
                |c| select_inputs_for_register(c.caller(), c),
                StepOptions::new(),
            )?;
            Ok(())
        })
    })?
    .add_template("main", |t| {
        t.describe("Entry point: one migration pass per source/target pair");
        let configs = t.add_required_input(
            "migrationConfigs",
            type_token::<Vec<Record>>(),
            Some("list of {sourceConfig, targetConfig, snapshotExtractAndLoadConfigs}"),
        )?;
        t.add_inputs_from_record(&image_params_from_config_map(
            &workflow_param::<String>(IMAGE_CONFIG_MAP_PARAM),
            IMAGE_KEYS,
        ))?;
        t.add_steps(|s| {
            s.add_step(
                "foreachMigrationPair",
                TemplateRef::local("foreachMigrationPair"),
                |c| {
                    let item = c.item::<Record>()?;
                    let field = |key: &str| expr::serialize::<Value>(expr::get(&item, key));
                    Ok(select_inputs_for_register(c.caller(), c)?
                        .set("sourceConfig", field("sourceConfig"))
                        .set("targetConfig", field("targetConfig"))
                        .set(
                            "snapshotExtractAndLoadConfigArray",
                            field("snapshotExtractAndLoadConfigs"),
                        ))
                },
                StepOptions::new().loop_with(LoopSpec::items(&configs)),
            )?;
            s.add_step(
                "cleanup",
                TemplateRef::local("doNothing"),
                |c| Ok(c.register(Vec::new())),
                StepOptions::new(),
            )?;
            Ok(())
        })
    })?
    .set_entrypoint("main")?
    .get_full_scope()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{self, RenderOptions};

    #[test]
    fn test_full_migration_structure() {
        let scope = build(&CatalogOptions::default()).unwrap();
        assert_eq!(scope.entrypoint(), Some("main"));
        assert_eq!(scope.settings().parallelism, Some(100));
        assert!(scope.params().get(IMAGE_CONFIG_MAP_PARAM).is_some());
        assert_eq!(scope.registry().libraries().count(), 2);
    }

    #[test]
    fn test_full_migration_renders() {
        let scope = build(&CatalogOptions::default()).unwrap();
        let yaml = render::render(&scope, &RenderOptions::default()).unwrap();
        assert!(yaml.contains("configMapKeyRef"));
        assert!(yaml.contains("migrationConsoleImage"));
        assert!(yaml.contains("name: document-bulk-load"));
        assert!(yaml.contains("{{steps.idGenerator.id}}"));
        assert!(yaml.contains("withParam"));
    }

    #[test]
    fn test_rfs_loop_expands_in_plan() {
        let scope = build(&CatalogOptions::default()).unwrap();
        let plans = render::plan(&scope, Some("runRfsContinuously")).unwrap();
        assert_eq!(plans[0].invocations.len(), RFS_ITERATIONS as usize);
        let first = &plans[0].invocations[0];
        assert!(first
            .arguments
            .iter()
            .any(|(name, value)| name == "iterationNumber" && value == "1"));
    }
}
