//! Expression algebra: constant folding, lookups and round-trips

use argo_forge::dict;
use argo_forge::expr::{self, eval, literal, Expr, InfixOp};
use argo_forge::exprs;
use argo_forge::types::{Record, Shape};
use proptest::prelude::*;
use serde_json::{json, Value};

fn folded<T>(e: &Expr<T>) -> Option<Value> {
    eval::fold(e.node()).unwrap()
}

fn config() -> Expr<Value> {
    literal(json!({
        "podReplicas": 4,
        "repoConfig": {"useLocalStack": true},
        "resources": {"limits": {"cpu": "2"}},
        "clusters": [{"name": "src"}, {"name": "dst"}]
    }))
}

// ═══════════════════════════════════════════════════════════════
// LOOKUPS
// ═══════════════════════════════════════════════════════════════

#[test]
fn test_dig_present_and_absent() {
    let cfg = config();
    let replicas: Expr<i64> = expr::dig(&cfg, &["podReplicas"], 1);
    assert_eq!(folded(&replicas), Some(json!(4)));
    let local: Expr<bool> = expr::dig(&cfg, &["repoConfig", "useLocalStack"], false);
    assert_eq!(folded(&local), Some(json!(true)));
    let logging: Expr<String> = expr::dig(&cfg, &["loggingConfig", "level"], "info");
    assert_eq!(folded(&logging), Some(json!("info")));
}

#[test]
fn test_dig_through_nested_array() {
    let cfg = config();
    let name: Expr<String> = expr::dig(&cfg, &["clusters", "1", "name"], "none");
    assert_eq!(folded(&name), Some(json!("dst")));
    let past_end: Expr<String> = expr::dig(&cfg, &["clusters", "5", "name"], "none");
    assert_eq!(folded(&past_end), Some(json!("none")));
}

#[test]
fn test_division_at_integer_edges() {
    let overflow = expr::div(literal(i64::MIN), literal(-1i64));
    assert_eq!(folded(&overflow), Some(json!(-(i64::MIN as f64))));
    let exact = expr::div(literal(i64::MIN), literal(2i64));
    assert_eq!(folded(&exact), Some(json!(i64::MIN / 2)));
    let rem = expr::infix(InfixOp::Mod, literal(i64::MIN), literal(-1i64));
    assert!(eval::fold(rem.node()).is_ok());
}

#[test]
fn test_json_path_strict() {
    let cfg = config();
    let cpu = expr::json_path_strict(&cfg, "$.resources.limits.cpu");
    assert_eq!(folded(&cpu), Some(json!("2")));
    let second = expr::json_path_strict(&cfg, "clusters[1].name");
    assert_eq!(folded(&second), Some(json!("dst")));
}

#[test]
fn test_json_path_strict_missing_fails() {
    let missing = expr::json_path_strict(config(), "resources.requests");
    let err = eval::fold(missing.node()).unwrap_err();
    assert_eq!(err.code(), "FORGE-044");
}

#[test]
fn test_merge_and_omit() {
    let merged = expr::merge_dicts(exprs![
        expr::omit(config(), &["clusters", "resources"]),
        literal(json!({"repoConfig": {"region": "us-east-2"}, "podReplicas": 8})),
    ]);
    assert_eq!(
        folded(&merged),
        Some(json!({
            "podReplicas": 8,
            "repoConfig": {"useLocalStack": true, "region": "us-east-2"}
        }))
    );
}

// ═══════════════════════════════════════════════════════════════
// TEXT
// ═══════════════════════════════════════════════════════════════

#[test]
fn test_fill_template_with_constants() {
    let e = expr::fill_template(
        "delete {{NAME}} in {{NS}} keep {{OTHER}}",
        dict! {"NAME" => "rfs-coordinator-x", "NS" => literal("ma")},
    );
    assert_eq!(folded(&e), Some(json!("delete rfs-coordinator-x in ma keep {{OTHER}}")));
}

#[test]
fn test_ternary_over_empty() {
    let secret = literal("");
    let name = expr::ternary::<String>(
        expr::is_empty(&secret),
        "empty",
        expr::concat(exprs!["creds-", &secret]),
    );
    assert_eq!(folded(&name), Some(json!("empty")));
}

#[test]
fn test_to_base64_folds() {
    let e = expr::to_base64(literal("hello"));
    assert_eq!(folded(&e), Some(json!("aGVsbG8=")));
}

#[test]
fn test_deserialize_record_shape() {
    let text = expr::serialize::<Value>(config());
    assert_eq!(text.shape(), Shape::serialized(Shape::Object));
    let record: Expr<Record> = expr::deserialize_record(text);
    assert_eq!(record.shape(), Shape::Object);
}

// ═══════════════════════════════════════════════════════════════
// PROPERTIES
// ═══════════════════════════════════════════════════════════════

fn arb_json() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i32>().prop_map(Value::from),
        "[a-zA-Z0-9 _-]{0,12}".prop_map(Value::from),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

fn edge_i64() -> impl Strategy<Value = i64> {
    prop_oneof![
        Just(0i64),
        Just(-1i64),
        Just(1i64),
        Just(i64::MIN),
        Just(i64::MAX),
        any::<i64>(),
    ]
}

/// A value nesting `leaf` under `steps`, paired with the dig keys that reach it
fn nested_with_path() -> impl Strategy<Value = (Value, Vec<String>, i32)> {
    let step = (any::<bool>(), "[a-z]{1,6}", 0usize..3);
    (prop::collection::vec(step, 1..5), any::<i32>()).prop_map(|(steps, leaf)| {
        let mut value = json!(leaf);
        let mut keys = Vec::with_capacity(steps.len());
        for (in_array, key, idx) in steps.into_iter().rev() {
            if in_array {
                let mut items = vec![json!("pad"); idx];
                items.push(value);
                value = Value::Array(items);
                keys.push(idx.to_string());
            } else {
                let mut fields = serde_json::Map::new();
                fields.insert(key.clone(), value);
                value = Value::Object(fields);
                keys.push(key);
            }
        }
        keys.reverse();
        (value, keys, leaf)
    })
}

proptest! {
    #[test]
    fn prop_integer_division_never_panics(a in edge_i64(), b in edge_i64()) {
        let quotient = eval::fold(expr::div(literal(a), literal(b)).node());
        prop_assert!(quotient.is_ok());
        if a.checked_rem(b) == Some(0) {
            if let Some(q) = a.checked_div(b) {
                prop_assert_eq!(quotient.unwrap(), Some(json!(q)));
            }
        }

        let rem = eval::fold(expr::infix(InfixOp::Mod, literal(a), literal(b)).node());
        prop_assert!(rem.is_ok());
        if let Some(r) = a.checked_rem(b) {
            prop_assert_eq!(rem.unwrap(), Some(json!(r)));
        }
    }

    #[test]
    fn prop_dig_finds_nested_value((value, keys, leaf) in nested_with_path()) {
        let path: Vec<&str> = keys.iter().map(String::as_str).collect();
        let e: Expr<i64> = expr::dig(literal(value), &path, 0);
        prop_assert_eq!(eval::fold(e.node()).unwrap(), Some(json!(leaf)));
    }

    #[test]
    fn prop_serialize_deserialize_round_trip(value in arb_json()) {
        let e = expr::deserialize(expr::serialize::<Value>(literal(value.clone())));
        prop_assert_eq!(eval::fold(e.node()).unwrap(), Some(value));
    }

    #[test]
    fn prop_serialize_is_json_text(value in arb_json()) {
        let e = expr::serialize::<Value>(literal(value.clone()));
        let text = eval::fold(e.node()).unwrap();
        let parsed: Value = match text {
            Some(Value::String(s)) => serde_json::from_str(&s).unwrap(),
            other => panic!("expected text, got {:?}", other),
        };
        prop_assert_eq!(parsed, value);
    }

    #[test]
    fn prop_dig_absent_yields_default(key in "[a-z]{1,8}", default in any::<i32>()) {
        let e: Expr<i64> = expr::dig(literal(json!({})), &[key.as_str()], default);
        prop_assert_eq!(eval::fold(e.node()).unwrap(), Some(json!(default)));
    }
}
