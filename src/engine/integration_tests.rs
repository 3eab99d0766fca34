// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! End-to-end evaluator scenarios: the literal input/output pairs the
//! engine guarantees, plus the cross-cutting properties (determinism,
//! phase isolation, short-circuiting, idempotence, cycle detection).

use std::sync::Arc;

use async_trait::async_trait;

use crate::adapters::MemorySecretStore;
use crate::config::{EngineConfig, TreeKind};
use crate::document::{Path, Value};
use crate::engine::harness::{
    context, context_with, context_with_secrets, eval_yaml, eval_yaml_in,
    eval_yaml_with_overrides, get, yaml,
};
use crate::engine::{EngineContext, Evaluator};
use crate::errors::EvalError;
use crate::expr::Expr;
use crate::merge::merge_documents;
use crate::operators::{CallCtx, OpMeta, Operator, OperatorRegistry, Phase, Response};

#[tokio::test]
async fn test_simple_grab() {
    let out = eval_yaml("a: 1\nb: (( grab a ))\n").await.unwrap();
    assert_eq!(out, yaml("a: 1\nb: 1\n"));
}

#[tokio::test]
async fn test_defaulting_chain() {
    let out = eval_yaml("x: (( grab missing || \"default\" ))\n").await.unwrap();
    assert_eq!(get(&out, "x"), &Value::String("default".into()));
}

#[tokio::test]
async fn test_concat_with_arithmetic() {
    let out = eval_yaml("n: 3\ns: (( concat \"count-\" (n + 2) ))\n")
        .await
        .unwrap();
    assert_eq!(out, yaml("n: 3\ns: count-5\n"));
}

#[tokio::test]
async fn test_ternary_with_comparison() {
    let out = eval_yaml("age: 30\nok: (( age >= 18 ? \"adult\" : \"minor\" ))\n")
        .await
        .unwrap();
    assert_eq!(get(&out, "ok"), &Value::String("adult".into()));
}

#[tokio::test]
async fn test_cycle_reports_both_nodes() {
    let err = eval_yaml("a: (( grab b ))\nb: (( grab a ))\n")
        .await
        .unwrap_err();
    let leaves = err.leaves();
    let cycle = leaves
        .iter()
        .find_map(|e| match e {
            EvalError::CircularDependency { cycle } => Some(cycle.clone()),
            _ => None,
        })
        .expect("expected a CircularDependency error");
    assert!(cycle.contains(&"a".to_string()));
    assert!(cycle.contains(&"b".to_string()));
}

#[tokio::test]
async fn test_param_missing_is_fatal_after_param_phase() {
    let err = eval_yaml("k: (( param \"please provide k\" ))\n")
        .await
        .unwrap_err();
    match &err {
        EvalError::Param { path, message } => {
            assert_eq!(path, "k");
            assert_eq!(message, "please provide k");
        }
        other => panic!("expected Param error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_param_satisfied_by_override() {
    let out = eval_yaml_with_overrides(
        "k: (( param \"please provide k\" ))\n",
        vec![("k", Value::String("supplied".into()))],
    )
    .await
    .unwrap();
    assert_eq!(get(&out, "k"), &Value::String("supplied".into()));
}

#[tokio::test]
async fn test_vault_try_fallback_invokes_adapter_exactly_twice() {
    let store = Arc::new(MemorySecretStore::new());
    let ctx = context_with_secrets(store.clone());
    let out = eval_yaml_in(
        ctx,
        "p: (( vault-try \"secret/missing:x\" \"secret/missing2:y\" \"fallback\" ))\n",
    )
    .await
    .unwrap();
    assert_eq!(get(&out, "p"), &Value::String("fallback".into()));
    assert_eq!(store.calls(), 2);
}

#[tokio::test]
async fn test_prepend_merge_before_evaluation() {
    let merged = merge_documents(vec![
        yaml("l: [a, b]\n"),
        yaml("l: [\"(( prepend ))\", c]\n"),
    ])
    .unwrap();
    assert_eq!(merged, yaml("l: [c, a, b]\n"));

    // the merged document then evaluates cleanly (no expressions remain)
    let out = Evaluator::new(context(), merged.clone()).run().await.unwrap();
    assert_eq!(out, merged);
}

#[tokio::test]
async fn test_vault_field_selection() {
    let store = Arc::new(MemorySecretStore::new());
    store.insert_field("secret/db", "password", "hunter2");
    let ctx = context_with_secrets(store);
    let out = eval_yaml_in(ctx, "pw: (( vault \"secret/db:password\" ))\n")
        .await
        .unwrap();
    assert_eq!(get(&out, "pw"), &Value::String("hunter2".into()));
}

#[tokio::test]
async fn test_vault_path_concatenation() {
    let store = Arc::new(MemorySecretStore::new());
    store.insert_field("secret/prod/db", "password", "s3cr3t");
    let ctx = context_with_secrets(store);
    let out = eval_yaml_in(
        ctx,
        "meta:\n  env: prod\npw: (( vault \"secret/\" meta.env \"/db:password\" ))\n",
    )
    .await
    .unwrap();
    assert_eq!(get(&out, "pw"), &Value::String("s3cr3t".into()));
}

#[tokio::test]
async fn test_short_circuit_or_skips_vault_side_effects() {
    let store = Arc::new(MemorySecretStore::new());
    store.insert_field("secret/x", "f", "should-not-be-read");
    let ctx = context_with_secrets(store.clone());
    let out = eval_yaml_in(
        ctx,
        "a: present\nx: (( grab a || (vault \"secret/x:f\") ))\n",
    )
    .await
    .unwrap();
    assert_eq!(get(&out, "x"), &Value::String("present".into()));
    assert_eq!(store.calls(), 0);
}

#[tokio::test]
async fn test_ternary_evaluates_only_selected_branch() {
    let store = Arc::new(MemorySecretStore::new());
    let ctx = context_with_secrets(store.clone());
    let out = eval_yaml_in(
        ctx,
        "flag: true\nx: (( flag ? \"cheap\" : (vault \"secret/slow:f\") ))\n",
    )
    .await
    .unwrap();
    assert_eq!(get(&out, "x"), &Value::String("cheap".into()));
    assert_eq!(store.calls(), 0);
}

#[tokio::test]
async fn test_determinism_under_parallel_execution() {
    let doc = "\
base: 10
a: (( base + 1 ))
b: (( base + 2 ))
c: (( base + 3 ))
d: (( base + 4 ))
e: (( concat a \"-\" b \"-\" c \"-\" d ))
f: (( grab e ))
g: (( a < b ? \"lt\" : \"ge\" ))
";
    let first = eval_yaml(doc).await.unwrap();
    for _ in 0..4 {
        let again = eval_yaml(doc).await.unwrap();
        assert_eq!(first, again);
    }
}

#[tokio::test]
async fn test_sequential_and_parallel_agree() {
    let doc = "\
base: 2
x: (( base * 3 ))
y: (( base * 5 ))
sum: (( x + y ))
";
    let parallel = eval_yaml(doc).await.unwrap();

    let mut config = EngineConfig::default();
    config.parallel = false;
    let sequential = eval_yaml_in(context_with(config), doc).await.unwrap();
    assert_eq!(parallel, sequential);
    assert_eq!(get(&parallel, "sum"), &Value::Int(16));
}

#[tokio::test]
async fn test_cow_tree_produces_same_result() {
    let doc = "a: 1\nb: (( grab a ))\nc: (( a + 41 ))\n";
    let sharded = eval_yaml(doc).await.unwrap();

    let mut config = EngineConfig::default();
    config.tree = TreeKind::Cow;
    let cow = eval_yaml_in(context_with(config), doc).await.unwrap();
    assert_eq!(sharded, cow);
    assert_eq!(get(&cow, "c"), &Value::Int(42));
}

#[tokio::test]
async fn test_idempotence_of_resolution() {
    let doc = "n: 3\na: (( n * 2 ))\nb: (( concat \"v-\" a ))\n";
    let once = eval_yaml(doc).await.unwrap();
    let twice = Evaluator::new(context(), once.clone()).run().await.unwrap();
    assert_eq!(once, twice);
}

#[tokio::test]
async fn test_phase_isolation_defer_resolves_before_eval() {
    // defer (Merge phase) must complete before grab (Eval phase) runs,
    // and the deferred text must survive the run untouched
    let out = eval_yaml("a: (( defer grab b ))\nb: (( grab c ))\nc: 1\n")
        .await
        .unwrap();
    assert_eq!(get(&out, "a"), &Value::String("(( grab b ))".into()));
    assert_eq!(get(&out, "b"), &Value::Int(1));
}

#[tokio::test]
async fn test_dependency_chain_through_multiple_waves() {
    let out = eval_yaml(
        "a: 1\nb: (( a + 1 ))\nc: (( b + 1 ))\nd: (( c + 1 ))\ne: (( d + 1 ))\n",
    )
    .await
    .unwrap();
    assert_eq!(get(&out, "e"), &Value::Int(5));
}

#[tokio::test]
async fn test_env_var_resolution() {
    std::env::set_var("LAYERCAKE_TEST_ENV_VALUE", "from-env");
    let out = eval_yaml("v: (( grab $LAYERCAKE_TEST_ENV_VALUE ))\n")
        .await
        .unwrap();
    assert_eq!(get(&out, "v"), &Value::String("from-env".into()));
}

#[tokio::test]
async fn test_missing_env_var_defaults_through_or() {
    let out = eval_yaml("v: (( grab $LAYERCAKE_TEST_UNSET_VAR || \"fallback\" ))\n")
        .await
        .unwrap();
    assert_eq!(get(&out, "v"), &Value::String("fallback".into()));
}

#[tokio::test]
async fn test_join_keys_and_base64() {
    let out = eval_yaml(
        "m:\n  x: 1\n  y: 2\nks: (( keys m ))\nlist: [a, b, c]\njoined: (( join \",\" list ))\nenc: (( base64 \"hello\" ))\ndec: (( base64-decode enc ))\n",
    )
    .await
    .unwrap();
    assert_eq!(get(&out, "ks"), &yaml("[x, y]"));
    assert_eq!(get(&out, "joined"), &Value::String("a,b,c".into()));
    assert_eq!(get(&out, "enc"), &Value::String("aGVsbG8=".into()));
    assert_eq!(get(&out, "dec"), &Value::String("hello".into()));
}

#[tokio::test]
async fn test_empty_null_negate_stringify() {
    let out = eval_yaml(
        "e: (( empty map ))\nn: (( null ))\nt: (( negate false ))\ns: (( stringify meta ))\nmeta:\n  a: 1\n",
    )
    .await
    .unwrap();
    assert_eq!(get(&out, "e"), &Value::empty_map());
    assert_eq!(get(&out, "n"), &Value::Null);
    assert_eq!(get(&out, "t"), &Value::Bool(true));
    assert_eq!(get(&out, "s"), &Value::String("a: 1".into()));
}

#[tokio::test]
async fn test_file_operator_reads_through_fabric() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("motd.txt"), "welcome").unwrap();

    let mut config = EngineConfig::default();
    config.fabric.file_base = Some(dir.path().to_path_buf());
    let out = eval_yaml_in(context_with(config), "motd: (( file \"motd.txt\" ))\n")
        .await
        .unwrap();
    assert_eq!(get(&out, "motd"), &Value::String("welcome".into()));
}

#[tokio::test]
async fn test_ips_arithmetic() {
    let out = eval_yaml(
        "one: (( ips \"10.0.0.0/24\" 5 ))\nmany: (( ips \"10.0.0.0/24\" 5 3 ))\nlast: (( ips \"10.0.0.0/24\" -1 ))\n",
    )
    .await
    .unwrap();
    assert_eq!(get(&out, "one"), &Value::String("10.0.0.5".into()));
    assert_eq!(
        get(&out, "many"),
        &yaml("[10.0.0.5, 10.0.0.6, 10.0.0.7]")
    );
    assert_eq!(get(&out, "last"), &Value::String("10.0.0.255".into()));
}

#[tokio::test]
async fn test_static_ips_allocation() {
    let out = eval_yaml(
        "\
networks:
  - name: private
    subnets:
      - static:
          - 10.0.0.10 - 10.0.0.20
jobs:
  - name: web
    instances: 2
    networks:
      - name: private
        static_ips: (( static_ips 0 3 ))
",
    )
    .await
    .unwrap();
    assert_eq!(
        get(&out, "jobs.0.networks.0.static_ips"),
        &yaml("[10.0.0.10, 10.0.0.13]")
    );
}

#[tokio::test]
async fn test_vault_results_are_deduplicated_across_nodes() {
    let store = Arc::new(MemorySecretStore::new());
    store.insert_field("secret/shared", "f", "v");
    let ctx = context_with_secrets(store.clone());
    eval_yaml_in(
        ctx.clone(),
        "a: (( vault \"secret/shared:f\" ))\nb: (( vault \"secret/shared:f\" ))\nc: (( vault \"secret/shared:f\" ))\n",
    )
    .await
    .unwrap();
    // three nodes, one underlying adapter call; nothing slipped past the
    // batched dispatch into its own flight
    assert_eq!(store.calls(), 1);
    assert_eq!(ctx.fabric.underlying_calls(), 0);
}

#[tokio::test]
async fn test_fallback_arm_errors_still_surface() {
    // the left arm's miss is absorbed, but when the right arm also fails
    // the error is fatal
    let err = eval_yaml("x: (( grab missing || grab also.missing ))\n")
        .await
        .unwrap_err();
    assert!(matches!(err.leaves()[0], EvalError::Reference { .. }));
}

#[tokio::test]
async fn test_type_errors_are_fatal() {
    let err = eval_yaml("a: hi\nb: (( a + 1 ))\n").await.unwrap_err();
    assert!(matches!(err.leaves()[0], EvalError::Type { .. }));
}

#[tokio::test]
async fn test_unknown_operator_in_strict_mode() {
    let mut config = EngineConfig::default();
    config.strict_operators = true;
    let err = eval_yaml_in(context_with(config), "x: (( grabb a ))\n")
        .await
        .unwrap_err();
    assert!(matches!(
        err.leaves()[0],
        EvalError::UnknownOperator { .. }
    ));
}

// ---- pluggable operators ----

/// Test operator that always defers; drives the unresolvable-run path.
struct AlwaysDeferOp;

const ALWAYS_DEFER_META: OpMeta = OpMeta::eval("always-defer", 0, 0);

#[async_trait]
impl Operator for AlwaysDeferOp {
    fn meta(&self) -> &OpMeta {
        &ALWAYS_DEFER_META
    }

    async fn run(
        &self,
        _ev: &Evaluator,
        _ctx: &CallCtx,
        _args: &[Expr],
    ) -> Result<Response, EvalError> {
        Ok(Response::Defer)
    }
}

/// Test operator exercising the Inject response.
struct InjectOp;

const INJECT_META: OpMeta = OpMeta {
    name: "inject-test",
    phase: Phase::Merge,
    min_args: 0,
    max_args: 0,
    precedence: None,
    right_assoc: false,
    thread_safe: true,
    writer: true,
    batchable: false,
    external: false,
};

#[async_trait]
impl Operator for InjectOp {
    fn meta(&self) -> &OpMeta {
        &INJECT_META
    }

    async fn run(
        &self,
        _ev: &Evaluator,
        _ctx: &CallCtx,
        _args: &[Expr],
    ) -> Result<Response, EvalError> {
        Ok(Response::Inject(yaml("injected: true\n")))
    }
}

fn context_with_extra_ops() -> Arc<EngineContext> {
    let mut registry = OperatorRegistry::with_builtins();
    registry.register(Arc::new(AlwaysDeferOp)).unwrap();
    registry.register(Arc::new(InjectOp)).unwrap();

    let base = EngineContext::with_defaults(EngineConfig::default());
    Arc::new(EngineContext::new(
        EngineConfig::default(),
        Arc::new(registry),
        base.fabric.clone(),
    ))
}

#[tokio::test]
async fn test_unresolvable_run_reports_remaining_nodes() {
    let err = eval_yaml_in(context_with_extra_ops(), "stuck: (( always-defer ))\n")
        .await
        .unwrap_err();
    match err {
        EvalError::Unresolvable { remaining } => {
            assert_eq!(remaining, vec!["stuck".to_string()]);
        }
        other => panic!("expected Unresolvable, got {:?}", other),
    }
}

#[tokio::test]
async fn test_inject_response_merges_into_parent() {
    let out = eval_yaml_in(
        context_with_extra_ops(),
        "parent:\n  marker: (( inject-test ))\n  existing: 1\n",
    )
    .await
    .unwrap();
    assert_eq!(get(&out, "parent.injected"), &Value::Bool(true));
    assert_eq!(get(&out, "parent.existing"), &Value::Int(1));
    assert!(out.find(&Path::parse("parent.marker")).is_none());
}

#[tokio::test]
async fn test_cancellation_propagates() {
    let evaluator = Evaluator::new(context(), yaml("a: 1\nb: (( grab a ))\n"));
    evaluator.cancel_handle().cancel();
    let err = evaluator.run().await.unwrap_err();
    assert_eq!(err, EvalError::Cancelled);
}

#[tokio::test]
async fn test_metrics_record_operators_and_waves() {
    let ctx = context();
    Evaluator::new(ctx.clone(), yaml("a: 1\nb: (( grab a ))\nc: (( a + 1 ))\n"))
        .run()
        .await
        .unwrap();
    let snapshot = ctx.snapshot_metrics();
    assert!(snapshot.operators.contains_key("grab"));
    assert!(snapshot.operators.contains_key("+"));
    assert!(!snapshot.waves.is_empty());
    assert!(snapshot.caches.iter().any(|c| c.name == "parse"));
}

#[tokio::test]
async fn test_nested_grab_inside_concat() {
    let out = eval_yaml(
        "meta:\n  name: web\nid: (( concat (grab meta.name) \"-01\" ))\n",
    )
    .await
    .unwrap();
    assert_eq!(get(&out, "id"), &Value::String("web-01".into()));
}

#[tokio::test]
async fn test_multi_error_aggregation_within_a_phase() {
    let err = eval_yaml(
        "a: hi\nbad1: (( a + 1 ))\nbad2: (( a - 1 ))\n",
    )
    .await
    .unwrap_err();
    assert_eq!(err.leaves().len(), 2);
}

#[tokio::test]
async fn test_failed_dependency_skips_dependents() {
    // bad fails with a type error; its dependent must not surface its own
    // error on top (it is skipped, not run)
    let err = eval_yaml("a: hi\nbad: (( a + 1 ))\nuses: (( grab bad ))\n")
        .await
        .unwrap_err();
    assert_eq!(err.leaves().len(), 1);
    assert!(matches!(err.leaves()[0], EvalError::Type { .. }));
}
