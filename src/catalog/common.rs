//! Parameters and templates shared by the migration workflows

use crate::error::Result;
use crate::expr::{literal, Expr};
use crate::template::{define_param, define_required_param, InputScope, ParamDef, ParamRecord};
use crate::types::{type_token, ImagePullPolicy};

use super::CatalogOptions;

/// Logical images the migration containers are built from
pub const IMAGE_KEYS: &[&str] = &["MigrationConsole", "ReindexFromSnapshot", "TrafficReplayer"];

pub const IMAGE_CONFIG_MAP_PARAM: &str = "imageConfigMapName";

pub fn location_param(key: &str) -> String {
    format!("image{}Location", key)
}

pub fn pull_policy_param(key: &str) -> String {
    format!("image{}PullPolicy", key)
}

/// `MigrationConsole` -> `migrationConsole`
pub(crate) fn lowercase_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Required location/pull-policy pair per image
pub fn image_params(keys: &[&str]) -> ParamRecord {
    keys.iter().fold(ParamRecord::new(), |record, key| {
        record
            .with(define_required_param(
                &location_param(key),
                type_token::<String>(),
                Some("container image reference"),
            ))
            .with(define_required_param(
                &pull_policy_param(key),
                type_token::<ImagePullPolicy>(),
                None,
            ))
    })
}

/// Location/pull-policy pairs looked up in the images ConfigMap
pub fn image_params_from_config_map(map: &Expr<String>, keys: &[&str]) -> ParamRecord {
    keys.iter().fold(ParamRecord::new(), |record, key| {
        let stem = lowercase_first(key);
        record
            .with(ParamDef::config_map_key(
                &location_param(key),
                map.clone(),
                &format!("{}Image", stem),
            ))
            .with(ParamDef::config_map_key(
                &pull_policy_param(key),
                map.clone(),
                &format!("{}PullPolicy", stem),
            ))
    })
}

/// Inputs declared by [`image_params`] for one image
pub fn image_inputs(
    inputs: &InputScope,
    key: &str,
) -> Result<(Expr<String>, Expr<ImagePullPolicy>)> {
    Ok((
        inputs.get(&location_param(key))?,
        inputs.get(&pull_policy_param(key))?,
    ))
}

/// Workflow-level parameters every migration workflow carries
pub fn common_workflow_params(options: &CatalogOptions) -> ParamRecord {
    ParamRecord::new().with(
        define_param::<String>(
            IMAGE_CONFIG_MAP_PARAM,
            literal(options.image_config_map.clone()),
        )
        .with_description("ConfigMap holding image locations and pull policies"),
    )
}
