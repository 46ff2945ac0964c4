//! End-to-end: build, render and plan the doubler workflow

use argo_forge::catalog::{self, doubler, CatalogOptions};
use argo_forge::render::{self, OutputFormat, RenderOptions};
use pretty_assertions::assert_eq;
use serde_json::Value;

fn rendered_json() -> Value {
    let scope = doubler::build(&CatalogOptions::default()).unwrap();
    let options = RenderOptions {
        format: OutputFormat::Json,
        ..RenderOptions::default()
    };
    serde_json::from_str(&render::render(&scope, &options).unwrap()).unwrap()
}

#[test]
fn test_doubler_scope() {
    let scope = catalog::build("doubler", &CatalogOptions::default()).unwrap();
    assert_eq!(scope.entrypoint(), Some("main"));
    let names: Vec<&str> = scope.templates().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["childDoubler", "main"]);
}

#[test]
fn test_doubler_manifest() {
    let doc = rendered_json();
    assert_eq!(doc["apiVersion"], "argoproj.io/v1alpha1");
    assert_eq!(doc["kind"], "WorkflowTemplate");
    assert_eq!(doc["metadata"]["name"], "doubler");
    assert_eq!(doc["spec"]["entrypoint"], "main");

    let main = &doc["spec"]["templates"][1];
    assert_eq!(main["name"], "main");
    let step = &main["steps"][0][0];
    assert_eq!(step["template"], "childDoubler");
    assert_eq!(step["withItems"], serde_json::json!([1, 2, 3]));
    assert_eq!(step["arguments"]["parameters"][0]["name"], "iterationNumber");
    assert_eq!(step["arguments"]["parameters"][0]["value"], "{{item}}");

    let child = &doc["spec"]["templates"][0];
    assert_eq!(child["inputs"]["parameters"][0]["name"], "iterationNumber");
    assert_eq!(child["outputs"]["parameters"][0]["valueFrom"]["path"], "/tmp/doubled");
}

#[test]
fn test_doubler_plan_expands_loop() {
    let scope = doubler::build(&CatalogOptions::default()).unwrap();
    let plans = render::plan(&scope, None).unwrap();
    assert_eq!(plans.len(), 1);
    assert_eq!(plans[0].template, "main");
    let values: Vec<&str> = plans[0]
        .invocations
        .iter()
        .map(|i| i.arguments[0].1.as_str())
        .collect();
    assert_eq!(values, vec!["1", "2", "3"]);
    assert!(plans[0].invocations.iter().all(|i| i.target == "childDoubler"));
}

#[test]
fn test_yaml_and_json_agree() {
    let scope = doubler::build(&CatalogOptions::default()).unwrap();
    let yaml = render::render(&scope, &RenderOptions::default()).unwrap();
    let from_yaml: Value = serde_yaml::from_str(&yaml).unwrap();
    assert_eq!(from_yaml, rendered_json());
}
