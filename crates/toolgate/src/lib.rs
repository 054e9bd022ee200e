//! Safe execution core for LLM agents that call side-effecting tools.
//!
//! `toolgate` sits between an agent loop and a catalog of tools. Every call
//! goes through the same pipeline:
//!
//! 1. The [`Dispatcher`](tools::dispatch::Dispatcher) resolves the tool name
//!    against an immutable [`ToolRegistry`](tools::registry::ToolRegistry).
//! 2. The permission gate ([`authorize`](tools::permission::authorize))
//!    checks the caller's granted capabilities.
//! 3. The handler runs. Metered handlers hold credits through the
//!    [`CreditLedger`](ledger::CreditLedger) for the duration of their
//!    external call.
//! 4. Structured output with a declared shape contract is checked by the
//!    per-turn [`SelfHealingValidator`](validate::SelfHealingValidator).
//! 5. Every outcome, including panics and timeouts, comes back as a typed
//!    [`ToolResult`](tools::core::ToolResult).
//!
//! # Getting started
//!
//! ```ignore
//! use std::sync::Arc;
//! use toolgate::prelude::*;
//!
//! let ledger = Arc::new(CreditLedger::open("credits.db")?);
//! let services = BuiltinServices::new(ledger, Arc::new(DisabledCompletionService::default()));
//! let registry = builtin_registry(&services)?;
//! let dispatcher = Dispatcher::new(Arc::new(registry));
//!
//! let store: Arc<dyn DataAccess> = Arc::new(MemoryStore::new());
//! let ctx = ToolCallContext::new("user-1", "workspace-1", store)
//!     .with_capabilities(["manage_tasks"]);
//!
//! let mut turn = Turn::new(&dispatcher, &ctx);
//! let result = turn.call("create_task", serde_json::json!({"title": "Ship it"})).await;
//! println!("{}", result.to_json());
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`tools`] | Tool names, definitions, registry, permission gate, dispatcher, built-in tools |
//! | [`ledger`] | Credit balances, reserve/commit/release, scoped reservation guard, metered calls |
//! | [`validate`] | Shape contracts and the per-turn self-healing validator |
//! | [`pagination`] | Keyset cursors and page assembly |
//! | [`store`] | Data-access collaborator interface and the in-memory store |
//! | [`turn`] | Per-turn call sequencing and output healing |
//! | [`context`] | Per-call identity, capabilities, and data access |
//! | [`service`] | Completion-service client and retry policy |

pub mod context;
pub mod ledger;
pub mod pagination;
pub mod prelude;
pub mod service;
pub mod store;
pub mod tools;
pub mod turn;
pub mod validate;

use schemars::JsonSchema;

// Re-export schemars for downstream crates defining their own tool arguments.
pub use schemars;

/// Generate a JSON Schema `serde_json::Value` for a tool's argument type.
///
/// # Example
///
/// ```
/// use schemars::JsonSchema;
/// use serde::Deserialize;
/// use toolgate::json_schema_for;
///
/// #[derive(Deserialize, JsonSchema)]
/// struct DeleteArgs {
///     task_id: String,
/// }
///
/// let schema = json_schema_for::<DeleteArgs>();
/// assert_eq!(schema["type"], "object");
/// assert!(schema["required"].as_array().unwrap().contains(&"task_id".into()));
/// ```
pub fn json_schema_for<T: JsonSchema>() -> serde_json::Value {
    let schema = schemars::schema_for!(T);
    serde_json::to_value(schema)
        .unwrap_or_else(|_| serde_json::json!({"type": "object", "properties": {}}))
}
