//! Dispatcher pipeline over a full catalog: unknown names, the permission
//! gate, the meta-tool exemption, the argument schema and the call timeout.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::{Value, json};
use toolgate::context::ToolCallContext;
use toolgate::ledger::{CreditLedger, ScopeKey};
use toolgate::service::{
    Completion, CompletionService, DisabledCompletionService, ServiceFuture,
};
use toolgate::store::MemoryStore;
use toolgate::tools::permission::capabilities;
use toolgate::tools::{
    BuiltinServices, DispatchConfig, Dispatcher, FailureKind, HandlerFuture, ToolDefinition, ToolHandler,
    ToolName, ToolRegistry, ToolResult, builtin_registry, definition_for,
};

/// Stands in for `delete_task` and counts how often it runs.
struct CountingDelete {
    calls: Arc<AtomicUsize>,
}

impl ToolHandler for CountingDelete {
    fn call<'a>(&'a self, _args: Value, _ctx: &'a ToolCallContext) -> HandlerFuture<'a> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { ToolResult::success(json!({"deleted": true})) })
    }
}

/// A completion backend that never answers in time.
struct Stalled;

impl CompletionService for Stalled {
    fn summarize<'a>(&'a self, _text: &'a str, _model: &'a str) -> ServiceFuture<'a, Completion> {
        Box::pin(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Completion {
                text: "too late".into(),
                prompt_tokens: None,
                completion_tokens: None,
            })
        })
    }
}

fn services() -> BuiltinServices {
    BuiltinServices::new(
        Arc::new(CreditLedger::open_in_memory().unwrap()),
        Arc::new(DisabledCompletionService::default()),
    )
}

fn with_counting_delete() -> (Dispatcher, Arc<AtomicUsize>) {
    let services = services();
    let calls = Arc::new(AtomicUsize::new(0));
    let mut builder = ToolRegistry::builder();
    for name in ToolName::ALL {
        let def = if name == ToolName::DeleteTask {
            ToolDefinition::new(
                name,
                "Delete a task.",
                json!({"type": "object", "properties": {"task_id": {"type": "string"}}, "required": ["task_id"]}),
                CountingDelete {
                    calls: Arc::clone(&calls),
                },
            )
            .requires("manage_projects")
        } else {
            definition_for(name, &services)
        };
        builder.register(def).unwrap();
    }
    (Dispatcher::new(Arc::new(builder.build().unwrap())), calls)
}

fn ctx() -> ToolCallContext {
    ToolCallContext::new("user-1", "ws-1", Arc::new(MemoryStore::new()))
}

#[tokio::test]
async fn denied_call_never_reaches_the_handler() {
    let (dispatcher, calls) = with_counting_delete();
    let result = dispatcher
        .dispatch(
            "delete_task",
            json!({"task_id": "t-1"}),
            &ctx(),
            &capabilities(Vec::<String>::new()),
        )
        .await;

    let failure = result.failure_ref().unwrap();
    assert_eq!(failure.kind, FailureKind::Unauthorized);
    assert_eq!(failure.missing_capabilities, vec!["manage_projects"]);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn granted_call_reaches_the_handler_once() {
    let (dispatcher, calls) = with_counting_delete();
    let ctx = ctx().with_capabilities(["manage_projects"]);
    let result = dispatcher
        .execute("delete_task", json!({"task_id": "t-1"}), &ctx)
        .await;
    assert!(result.is_success());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn meta_tools_need_no_capabilities() {
    let dispatcher = Dispatcher::new(Arc::new(builtin_registry(&services()).unwrap()));
    let ctx = ctx();
    let selected = dispatcher
        .execute("select_action", json!({"action": "list_tasks"}), &ctx)
        .await;
    assert_eq!(selected.payload().unwrap()["selected"], "list_tasks");

    let nothing = dispatcher.execute("no_op", json!({}), &ctx).await;
    assert_eq!(nothing.payload().unwrap()["ok"], true);
}

#[tokio::test]
async fn unknown_names_are_typed_failures() {
    let dispatcher = Dispatcher::new(Arc::new(builtin_registry(&services()).unwrap()));
    let result = dispatcher
        .execute("drop_database", json!({}), &ctx().with_capabilities(["manage_projects"]))
        .await;
    assert_eq!(result.failure_ref().unwrap().kind, FailureKind::UnknownTool);
}

#[tokio::test]
async fn schema_violations_are_invalid_arguments() {
    let dispatcher = Dispatcher::new(Arc::new(builtin_registry(&services()).unwrap()));
    let ctx = ctx().with_capabilities(["manage_tasks"]);
    let result = dispatcher
        .execute("create_task", json!({"title": 42}), &ctx)
        .await;
    assert_eq!(
        result.failure_ref().unwrap().kind,
        FailureKind::InvalidArguments
    );

    let created = dispatcher
        .execute("create_task", json!({"title": "Plan sprint"}), &ctx)
        .await;
    assert_eq!(created.payload().unwrap()["created_by"], "user-1");
}

#[test]
fn catalog_exports_every_tool() {
    let registry = builtin_registry(&services()).unwrap();
    let specs = registry.specs();
    assert_eq!(specs.len(), ToolName::ALL.len());
    assert!(specs.iter().all(|s| s["type"] == "function"));
}

#[tokio::test]
async fn timed_out_summary_refunds_its_hold() {
    let ledger = Arc::new(CreditLedger::open_in_memory().unwrap());
    let scope = ScopeKey::new("ws-1", "user-1");
    ledger.set_allocation(&scope, 10).unwrap();
    let services = BuiltinServices::new(Arc::clone(&ledger), Arc::new(Stalled));
    let dispatcher = Dispatcher::new(Arc::new(builtin_registry(&services).unwrap()))
        .with_config(DispatchConfig::default().with_timeout(Some(Duration::from_millis(50))));

    let result = dispatcher
        .execute(
            "generate_summary",
            json!({"text": "a short note"}),
            &ctx().with_capabilities(["use_ai"]),
        )
        .await;

    assert_eq!(result.failure_ref().unwrap().kind, FailureKind::Transient);
    assert_eq!(ledger.balance(&scope).unwrap().remaining(), 10);
    let totals = ledger.reservation_totals(&scope).unwrap();
    assert_eq!(totals.pending, 0);
    assert_eq!(totals.committed, 0);
    assert_eq!(totals.released, 2);
}
