//! Render-spec repair inside a turn.

use std::sync::Arc;

use serde_json::{Value, json};
use toolgate::context::ToolCallContext;
use toolgate::ledger::CreditLedger;
use toolgate::service::DisabledCompletionService;
use toolgate::store::MemoryStore;
use toolgate::tools::{BuiltinServices, Dispatcher, builtin_registry};
use toolgate::turn::Turn;
use toolgate::validate::{RenderSpecContract, SelfHealingValidator, ShapeContract};

fn dispatcher() -> Dispatcher {
    let services = BuiltinServices::new(
        Arc::new(CreditLedger::open_in_memory().unwrap()),
        Arc::new(DisabledCompletionService::default()),
    );
    Dispatcher::new(Arc::new(builtin_registry(&services).unwrap()))
}

fn ctx() -> ToolCallContext {
    ToolCallContext::new("user-1", "ws-1", Arc::new(MemoryStore::new()))
        .with_capabilities(["manage_tasks"])
}

fn assert_root_resolves(spec: &Value) {
    let root = spec["root"].as_str().unwrap();
    assert!(spec["elements"].get(root).is_some(), "root '{root}' missing");
    assert!(RenderSpecContract.validate(spec).is_valid());
}

#[tokio::test]
async fn dangling_root_is_repaired_then_loop_is_broken() {
    let dispatcher = dispatcher();
    let ctx = ctx();
    let mut turn = Turn::new(&dispatcher, &ctx);
    let broken = json!({"spec": {"root": "x", "elements": {}}});

    let first = turn.call("render_view", broken.clone()).await;
    let payload = first.payload().unwrap();
    assert_root_resolves(&payload["output"]);
    assert_eq!(payload["validation"]["valid"], false);
    assert_eq!(payload["validation"]["attempt"], 1);
    assert_eq!(payload["validation"]["loop_broken"], false);

    let second = turn.call("render_view", broken).await;
    let payload = second.payload().unwrap();
    assert_root_resolves(&payload["output"]);
    assert_eq!(payload["validation"]["loop_broken"], true);
    assert!(
        payload["validation"]["instruction"]
            .as_str()
            .unwrap()
            .contains("plain text")
    );
}

#[tokio::test]
async fn fallback_carries_earlier_results_of_the_turn() {
    let dispatcher = dispatcher();
    let ctx = ctx();
    let mut turn = Turn::new(&dispatcher, &ctx);

    let created = turn
        .call("create_task", json!({"title": "Book venue"}))
        .await;
    assert!(created.is_success());

    let repaired = turn
        .call("render_view", json!({"spec": {"root": "main", "elements": {}}}))
        .await;
    let output = &repaired.payload().unwrap()["output"];
    assert_root_resolves(output);
    assert_eq!(output["root"], "main");
    let children = output["elements"]["main"]["children"].as_array().unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(turn.prior_results().len(), 1);
}

#[tokio::test]
async fn valid_output_resets_the_streak() {
    let dispatcher = dispatcher();
    let ctx = ctx();
    let mut turn = Turn::new(&dispatcher, &ctx);
    let broken = json!({"spec": {"root": "x", "elements": {}}});
    let good = json!({"spec": {
        "root": "card",
        "elements": {"card": {"type": "Card", "props": {}, "children": []}}
    }});

    turn.call("render_view", broken.clone()).await;
    turn.call("render_view", good).await;
    assert_eq!(turn.validator().streak("render_spec"), 0);

    let again = turn.call("render_view", broken).await;
    assert_eq!(again.payload().unwrap()["validation"]["attempt"], 1);
}

#[test]
fn each_turn_starts_with_a_clean_validator() {
    let mut first = SelfHealingValidator::new();
    first.check(&RenderSpecContract, json!({"root": "x", "elements": {}}), &[]);
    assert_eq!(first.streak("render_spec"), 1);
    assert_eq!(SelfHealingValidator::new().streak("render_spec"), 0);
}
