//! Document bulk load: backfill workers, their coordinator cluster and the
//! steps that drive a load to completion

use serde_json::json;

use crate::dict;
use crate::error::Result;
use crate::expr::{self, literal, workflow_value, Expr};
use crate::exprs;
use crate::graph::{select_inputs_for_register, StepOptions, TemplateRef};
use crate::template::{
    ContainerBuilder, ResourceAction, ResourceBuilder, RetryPolicy, RetryStrategy,
};
use crate::types::{type_token, Record};
use crate::workflow::{WorkflowBuilder, WorkflowScope, WorkflowSettings};

use super::common::{image_inputs, image_params};
use super::console::{self, GET_CONSOLE_CONFIG, RUN_COMMAND};
use super::CatalogOptions;

pub const NAME: &str = "document-bulk-load";

const WORKER_PREFIX: &str = "bulk-load-";
const COORDINATOR_PREFIX: &str = "rfs-coordinator-";

const STATUS_SCRIPT: &str = "set -e\n\
echo '{{CONFIG}}' > /config/migration_services.yaml\n\
console --config-file /config/migration_services.yaml backfill status --deep-check \
--session {{SESSION_NAME}}";

const COORDINATOR_DELETE_SCRIPT: &str = "kubectl delete statefulset,service,secret \
-l coordinator={{NAME}} --ignore-not-found";

/// `<prefix><session>` as a string expression
fn prefixed(prefix: &str, session: &Expr<String>) -> Expr<String> {
    expr::concat(exprs![prefix, session])
}

/// Worker ReplicaSet manifest
fn backfill_replica_set(
    session: &Expr<String>,
    replicas: Expr<i64>,
    config: Expr<String>,
    image: Expr<String>,
    pull_policy: Expr,
    coordinator_secret: Expr<String>,
) -> Expr<Record> {
    expr::make_dict(dict! {
        "apiVersion" => "apps/v1",
        "kind" => "ReplicaSet",
        "metadata" => expr::make_dict(dict! {
            "name" => prefixed(WORKER_PREFIX, session),
            "labels" => expr::make_dict(dict! {
                "workflows.argoproj.io/workflow" => workflow_value("name"),
                "migrations/session" => session,
            }),
        }),
        "spec" => expr::make_dict(dict! {
            "replicas" => replicas,
            "template" => expr::make_dict(dict! {
                "spec" => expr::make_dict(dict! {
                    "containers" => expr::to_array(exprs![expr::make_dict(dict! {
                        "name" => "bulk-loader",
                        "image" => image,
                        "imagePullPolicy" => pull_policy,
                        "env" => expr::to_array(exprs![
                            expr::make_dict(dict! {"name" => "RFS_CONFIG_B64", "value" => config}),
                            expr::make_dict(dict! {
                                "name" => "COORDINATOR_SECRET",
                                "value" => coordinator_secret,
                            }),
                        ]),
                    })]),
                }),
            }),
        }),
    })
}

pub fn build(options: &CatalogOptions) -> Result<WorkflowScope> {
    let console = console::build(options)?;
    let run_command = console.template_ref(RUN_COMMAND)?;
    let get_console_config = console.template_ref(GET_CONSOLE_CONFIG)?;

    WorkflowBuilder::create(
        WorkflowSettings::new(NAME).service_account(&options.service_account),
    )
    .import_library(&console)?
    .add_template("doNothing", |t| {
        t.add_steps(|s| s.add_step_group(|_| Ok(())))
    })?
    .add_template("stopHistoricalBackfill", |t| {
        let session = t.add_required_input("sessionName", type_token::<String>(), None)?;
        t.add_resource(
            ResourceBuilder::new(
                ResourceAction::Delete,
                expr::make_dict(dict! {
                    "apiVersion" => "apps/v1",
                    "kind" => "ReplicaSet",
                    "metadata" => expr::make_dict(dict! {
                        "name" => prefixed(WORKER_PREFIX, &session),
                    }),
                }),
            )
            .flags(&["--ignore-not-found"]),
        )
    })?
    .add_template("waitForCompletion", |t| {
        t.add_required_input("configContents", type_token::<String>(), None)?;
        t.add_required_input("sessionName", type_token::<String>(), None)?;
        t.add_inputs_from_record(&image_params(&["MigrationConsole"]))?;
        t.add_steps(|s| {
            s.add_step(
                "checkBackfillStatus",
                run_command.clone(),
                |c| {
                    let inputs = c.caller();
                    let command = expr::fill_template(
                        STATUS_SCRIPT,
                        dict! {
                            "CONFIG" => inputs.get::<String>("configContents")?,
                            "SESSION_NAME" => inputs.get::<String>("sessionName")?,
                        },
                    );
                    Ok(select_inputs_for_register(inputs, c)?.set("command", command))
                },
                StepOptions::new(),
            )?;
            Ok(())
        })?;
        t.add_retry_parameters(
            RetryStrategy::new(200, RetryPolicy::Always).with_backoff("5", 2, Some("300")),
        )
    })?
    .add_template("startHistoricalBackfill", |t| {
        let session = t.add_required_input("sessionName", type_token::<String>(), None)?;
        let replicas = t.add_required_input("podReplicas", type_token::<i64>(), None)?;
        let rfs_config = t.add_required_input("rfsConfig", type_token::<Record>(), None)?;
        let use_coordinator =
            t.add_optional_input("useCoordinator", |_| Ok(literal(true)))?;
        let inputs = t.add_inputs_from_record(&image_params(&["ReindexFromSnapshot"]))?;
        let (image, pull_policy) = image_inputs(&inputs, "ReindexFromSnapshot")?;
        let secret = expr::ternary::<String>(
            use_coordinator,
            expr::concat(exprs![COORDINATOR_PREFIX, &session, "-creds"]),
            "empty",
        );
        t.add_resource(
            ResourceBuilder::new(
                ResourceAction::Create,
                backfill_replica_set(
                    &session,
                    replicas,
                    expr::to_base64(expr::serialize::<Record>(rfs_config)),
                    image,
                    pull_policy.erase(),
                    secret,
                ),
            )
            .set_owner_reference(true),
        )
    })?
    .add_template("startHistoricalBackfillFromConfig", |t| {
        t.add_required_input("sessionName", type_token::<String>(), None)?;
        let config = t.add_required_input(
            "documentBackfillConfig",
            type_token::<Record>(),
            Some("backfill settings: podReplicas, loggingConfig, repoConfig, resources"),
        )?;
        t.add_inputs_from_record(&image_params(&["ReindexFromSnapshot"]))?;
        t.add_steps(|s| {
            s.add_step(
                "startHistoricalBackfill",
                TemplateRef::local("startHistoricalBackfill"),
                |c| {
                    let rfs_config = expr::merge_dicts(exprs![
                        expr::omit(&config, &["podReplicas", "resources"]),
                        expr::make_dict(dict! {
                            "loggingConfig" => expr::dig::<String>(&config, &["loggingConfig"], ""),
                            "useLocalStack" => expr::dig::<bool>(
                                &config,
                                &["repoConfig", "useLocalStack"],
                                false,
                            ),
                        }),
                    ]);
                    Ok(select_inputs_for_register(c.caller(), c)?
                        .set("podReplicas", expr::dig::<i64>(&config, &["podReplicas"], 1))
                        .set("rfsConfig", rfs_config))
                },
                StepOptions::new(),
            )?;
            Ok(())
        })
    })?
    .add_template("runBulkLoad", |t| {
        t.add_required_input("sessionName", type_token::<String>(), None)?;
        t.add_required_input("targetConfig", type_token::<Record>(), None)?;
        t.add_required_input("snapshotConfig", type_token::<Record>(), None)?;
        t.add_required_input("documentBackfillConfig", type_token::<Record>(), None)?;
        t.add_inputs_from_record(&image_params(&["MigrationConsole", "ReindexFromSnapshot"]))?;
        t.add_steps(|s| {
            s.add_step(
                "startHistoricalBackfillFromConfig",
                TemplateRef::local("startHistoricalBackfillFromConfig"),
                |c| select_inputs_for_register(c.caller(), c),
                StepOptions::new(),
            )?;
            let config = s.add_step(
                "setupWaitForCompletion",
                get_console_config.clone(),
                |c| select_inputs_for_register(c.caller(), c),
                StepOptions::new(),
            )?;
            s.add_step(
                "waitForCompletion",
                TemplateRef::local("waitForCompletion"),
                |c| {
                    Ok(select_inputs_for_register(c.caller(), c)?
                        .set("configContents", config.output::<String>("configContents")?))
                },
                StepOptions::new(),
            )?;
            s.add_step(
                "stopHistoricalBackfill",
                TemplateRef::local("stopHistoricalBackfill"),
                |c| select_inputs_for_register(c.caller(), c),
                StepOptions::new(),
            )?;
            Ok(())
        })
    })?
    .add_template("createCoordinatorSecret", |t| {
        let session = t.add_required_input("sessionName", type_token::<String>(), None)?;
        let credentials = t.add_required_input("credentials", type_token::<Record>(), None)?;
        t.add_resource(ResourceBuilder::new(
            ResourceAction::Apply,
            expr::make_dict(dict! {
                "apiVersion" => "v1",
                "kind" => "Secret",
                "metadata" => expr::make_dict(dict! {
                    "name" => expr::concat(exprs![COORDINATOR_PREFIX, &session, "-creds"]),
                    "labels" => expr::make_dict(dict! {
                        "coordinator" => prefixed(COORDINATOR_PREFIX, &session),
                    }),
                }),
                "stringData" => expr::make_dict(dict! {
                    "username" => expr::dig::<String>(&credentials, &["username"], "admin"),
                    "password" => expr::dig::<String>(&credentials, &["password"], ""),
                }),
            }),
        ))
    })?
    .add_template("deployCoordinatorCluster", |t| {
        let session = t.add_required_input("sessionName", type_token::<String>(), None)?;
        let name = prefixed(COORDINATOR_PREFIX, &session);
        t.add_resource(
            ResourceBuilder::new(
                ResourceAction::Apply,
                expr::make_dict(dict! {
                    "apiVersion" => "apps/v1",
                    "kind" => "StatefulSet",
                    "metadata" => expr::make_dict(dict! {
                        "name" => &name,
                        "labels" => expr::make_dict(dict! {"coordinator" => &name}),
                    }),
                    "spec" => expr::make_dict(dict! {
                        "serviceName" => &name,
                        "replicas" => 1,
                        "selector" => literal(json!({"matchLabels": {"app": "rfs-coordinator"}})),
                    }),
                }),
            )
            .set_owner_reference(true)
            .success_condition("status.readyReplicas == 1"),
        )
    })?
    .add_template("deleteCoordinatorCluster", |t| {
        let session = t.add_required_input("sessionName", type_token::<String>(), None)?;
        let script = expr::fill_template(
            COORDINATOR_DELETE_SCRIPT,
            dict! {"NAME" => prefixed(COORDINATOR_PREFIX, &session)},
        );
        t.add_container(
            ContainerBuilder::new()
                .image("bitnami/kubectl:latest")
                .command(&["/bin/sh", "-c"])
                .args(exprs![script]),
        )
    })?
    .add_template("setupAndRunBulkLoad", |t| {
        t.add_required_input("sessionName", type_token::<String>(), None)?;
        t.add_required_input("targetConfig", type_token::<Record>(), None)?;
        t.add_required_input("snapshotConfig", type_token::<Record>(), None)?;
        let backfill = t.add_required_input("documentBackfillConfig", type_token::<Record>(), None)?;
        t.add_inputs_from_record(&image_params(&["MigrationConsole", "ReindexFromSnapshot"]))?;
        let dedicated = expr::not(expr::dig::<bool>(
            &backfill,
            &["useTargetClusterForWorkCoordination"],
            true,
        ));
        t.add_steps(|s| {
            s.add_step(
                "createCoordinatorSecret",
                TemplateRef::local("createCoordinatorSecret"),
                |c| {
                    Ok(select_inputs_for_register(c.caller(), c)?.set(
                        "credentials",
                        expr::dig::<serde_json::Value>(&backfill, &["coordinatorCredentials"], json!({})),
                    ))
                },
                StepOptions::new().when(dedicated.clone()),
            )?;
            s.add_step(
                "deployCoordinatorCluster",
                TemplateRef::local("deployCoordinatorCluster"),
                |c| select_inputs_for_register(c.caller(), c),
                StepOptions::new().when(dedicated.clone()),
            )?;
            s.add_step(
                "runBulkLoad",
                TemplateRef::local("runBulkLoad"),
                |c| select_inputs_for_register(c.caller(), c),
                StepOptions::new(),
            )?;
            s.add_step(
                "deleteCoordinatorCluster",
                TemplateRef::local("deleteCoordinatorCluster"),
                |c| select_inputs_for_register(c.caller(), c),
                StepOptions::new().when(dedicated),
            )?;
            Ok(())
        })
    })?
    .get_full_scope()
}
