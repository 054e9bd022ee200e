//! The dispatch boundary.
//!
//! [`Dispatcher::dispatch`] resolves a wire name, checks permissions,
//! validates arguments, runs the handler under a timeout and converts every
//! outcome, panics included, into a [`ToolResult`]. Nothing above this layer
//! ever observes an unhandled error.
//!
//! The dispatcher holds no mutable state and adds no concurrency control.
//! One turn dispatches one call at a time; shared mutable state (the credit
//! ledger) guards itself.

use super::core::{FailureKind, ToolFailure, ToolResult, log_tool_call, validate_arguments};
use super::permission::{Authorization, Capabilities, authorize};
use super::registry::ToolRegistry;
use crate::context::ToolCallContext;
use futures::FutureExt;
use serde_json::Value;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// Default timeout for one handler invocation (60 seconds).
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Validate arguments against the tool's JSON Schema before invoking it.
    pub validate_args: bool,
    /// Upper bound on one handler invocation. `None` disables the timeout.
    pub timeout: Option<Duration>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            validate_args: true,
            timeout: Some(DEFAULT_TOOL_TIMEOUT),
        }
    }
}

impl DispatchConfig {
    pub fn with_arg_validation(mut self, enabled: bool) -> Self {
        self.validate_args = enabled;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Executes tool calls against an immutable registry.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            config: DispatchConfig::default(),
        }
    }

    pub fn with_config(mut self, config: DispatchConfig) -> Self {
        self.config = config;
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Run a call with the capabilities carried by `ctx`.
    pub async fn execute(&self, name: &str, args: Value, ctx: &ToolCallContext) -> ToolResult {
        self.dispatch(name, args, ctx, ctx.capabilities()).await
    }

    /// Run a call with an explicit capability set.
    pub async fn dispatch(
        &self,
        name: &str,
        args: Value,
        ctx: &ToolCallContext,
        granted: &Capabilities,
    ) -> ToolResult {
        let Some(def) = self.registry.lookup(name) else {
            info!("[tool] rejected unknown tool '{name}'");
            return ToolResult::failure(FailureKind::UnknownTool, format!("unknown tool '{name}'"));
        };

        if let Authorization::Denied { missing } = authorize(def, granted) {
            warn!(
                "[tool] denied {name} for user={}: missing {}",
                ctx.user_id(),
                missing.join(", ")
            );
            return ToolFailure::unauthorized(name, missing).into();
        }

        if self.config.validate_args
            && let Some(failure) = validate_arguments(def, &args)
        {
            return failure.into();
        }

        log_tool_call(name, ctx.user_id(), &args);
        let start = Instant::now();

        let handler = def.handler();
        // A handler may panic before it returns a future, or while polling it.
        let call = match std::panic::catch_unwind(AssertUnwindSafe(|| handler.call(args, ctx))) {
            Ok(future) => AssertUnwindSafe(future).catch_unwind(),
            Err(payload) => return panic_failure(name, payload),
        };

        let outcome = match self.config.timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    info!(
                        "[tool] {name} timed out after {:.1}s (limit: {:.0}s)",
                        start.elapsed().as_secs_f64(),
                        limit.as_secs_f64()
                    );
                    return ToolResult::failure(
                        FailureKind::Transient,
                        format!(
                            "tool '{name}' timed out after {:.0} seconds",
                            limit.as_secs_f64()
                        ),
                    );
                }
            },
            None => call.await,
        };

        let result = match outcome {
            Ok(result) => result,
            Err(payload) => return panic_failure(name, payload),
        };

        debug!(
            "[tool] {name} completed in {:.0}ms (success={})",
            start.elapsed().as_secs_f64() * 1000.0,
            result.is_success()
        );
        if let ToolResult::Failure(f) = &result {
            trace!("[tool] {name} failure: {:?} {}", f.kind, f.message);
        }
        result
    }
}

fn panic_failure(name: &str, payload: Box<dyn Any + Send>) -> ToolResult {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());
    error!("[tool] {name} panicked: {detail}");
    ToolResult::failure(
        FailureKind::Internal,
        format!("tool '{name}' failed unexpectedly: {detail}"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::tools::core::{FnHandler, HandlerFuture, ToolDefinition, ToolHandler};
    use crate::tools::names::ToolName;
    use crate::tools::permission::capabilities;
    use serde_json::json;

    struct Panics;

    impl ToolHandler for Panics {
        fn call<'a>(&'a self, _args: Value, _ctx: &'a ToolCallContext) -> HandlerFuture<'a> {
            panic!("boom before the future");
        }
    }

    fn ok_def(name: ToolName) -> ToolDefinition {
        ToolDefinition::new(
            name,
            "ok",
            json!({"type": "object"}),
            FnHandler::new(|_: Value| async { ToolResult::success(json!({"ok": true})) }),
        )
    }

    fn registry_with(custom: ToolDefinition) -> Arc<ToolRegistry> {
        let mut builder = ToolRegistry::builder();
        let custom_name = custom.name;
        builder.register(custom).unwrap();
        for name in ToolName::ALL {
            if name != custom_name {
                builder.register(ok_def(name)).unwrap();
            }
        }
        Arc::new(builder.build().unwrap())
    }

    fn ctx() -> ToolCallContext {
        ToolCallContext::new("u1", "w1", Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn unknown_tool_is_terminal() {
        let d = Dispatcher::new(registry_with(ok_def(ToolName::NoOp)));
        let result = d.execute("drop_database", json!({}), &ctx()).await;
        let failure = result.failure_ref().unwrap();
        assert_eq!(failure.kind, FailureKind::UnknownTool);
        assert!(!failure.retryable());
        assert_eq!(failure.message, "unknown tool 'drop_database'");
    }

    #[tokio::test]
    async fn sync_panic_becomes_internal_failure() {
        let def = ToolDefinition::new(ToolName::ListTasks, "p", json!({"type": "object"}), Panics);
        let d = Dispatcher::new(registry_with(def));
        let result = d.execute("list_tasks", json!({}), &ctx()).await;
        let failure = result.failure_ref().unwrap();
        assert_eq!(failure.kind, FailureKind::Internal);
        assert!(failure.message.contains("boom before the future"));
    }

    #[tokio::test]
    async fn async_panic_becomes_internal_failure() {
        let def = ToolDefinition::new(
            ToolName::ListTasks,
            "p",
            json!({"type": "object"}),
            FnHandler::new(|_: Value| async {
                let explode = true;
                if explode {
                    panic!("boom inside the future");
                }
                ToolResult::success(json!(null))
            }),
        );
        let d = Dispatcher::new(registry_with(def));
        let result = d.execute("list_tasks", json!({}), &ctx()).await;
        assert_eq!(result.failure_ref().unwrap().kind, FailureKind::Internal);
    }

    #[tokio::test]
    async fn slow_handler_times_out_as_transient() {
        let def = ToolDefinition::new(
            ToolName::ListTasks,
            "slow",
            json!({"type": "object"}),
            FnHandler::new(|_: Value| async {
                tokio::time::sleep(Duration::from_secs(600)).await;
                ToolResult::success(json!(null))
            }),
        );
        let d = Dispatcher::new(registry_with(def))
            .with_config(DispatchConfig::default().with_timeout(Some(Duration::from_millis(50))));
        let result = d.execute("list_tasks", json!({}), &ctx()).await;
        let failure = result.failure_ref().unwrap();
        assert_eq!(failure.kind, FailureKind::Transient);
        assert!(failure.message.contains("timed out"));
    }

    #[tokio::test]
    async fn schema_violation_is_invalid_arguments() {
        let def = ToolDefinition::new(
            ToolName::CreateTask,
            "needs title",
            json!({
                "type": "object",
                "properties": {"title": {"type": "string"}},
                "required": ["title"]
            }),
            FnHandler::new(|_: Value| async { ToolResult::success(json!(null)) }),
        )
        .requires("manage_tasks");
        let d = Dispatcher::new(registry_with(def));
        let granted = capabilities(["manage_tasks"]);
        let result = d.dispatch("create_task", json!({}), &ctx(), &granted).await;
        assert_eq!(
            result.failure_ref().unwrap().kind,
            FailureKind::InvalidArguments
        );

        let unchecked = d
            .clone()
            .with_config(DispatchConfig::default().with_arg_validation(false));
        let result = unchecked
            .dispatch("create_task", json!({}), &ctx(), &granted)
            .await;
        assert!(result.is_success());
    }

    #[tokio::test]
    async fn denial_wins_over_invalid_arguments() {
        let def = ok_def(ToolName::DeleteTask).requires("manage_projects");
        let d = Dispatcher::new(registry_with(def));
        let result = d
            .dispatch("delete_task", json!("not an object"), &ctx(), &Capabilities::new())
            .await;
        assert_eq!(result.failure_ref().unwrap().kind, FailureKind::Unauthorized);
    }
}
