//! Convenience re-exports for common `toolgate` types.
//!
//! ```ignore
//! use toolgate::prelude::*;
//! ```
//!
//! Covers building a registry, dispatching calls in a turn, and metering
//! external calls. Ledger internals (receipts, wire responses, clocks) and
//! the pagination helpers stay in their modules.

// ── Core types ──────────────────────────────────────────────────────
pub use crate::context::ToolCallContext;
pub use crate::json_schema_for;
pub use crate::turn::Turn;

// ── Tools ───────────────────────────────────────────────────────────
pub use crate::tools::{
    BuiltinServices, DispatchConfig, Dispatcher, FailureKind, FnHandler, HandlerFuture,
    ToolDefinition, ToolFailure, ToolHandler, ToolName, ToolRegistry, ToolResult,
    builtin_registry, parse_args,
};

// ── Credits ─────────────────────────────────────────────────────────
pub use crate::ledger::{
    CreditLedger, LedgerError, MeteringConfig, ReservationGuard, ReserveRequest, ScopeKey,
    run_metered,
};

// ── Output contracts ────────────────────────────────────────────────
pub use crate::validate::{RenderSpecContract, SelfHealingValidator, ShapeContract, Validation};

// ── Data and services ───────────────────────────────────────────────
pub use crate::pagination::{Cursor, Page, PaginationConfig};
pub use crate::service::{CompletionService, DisabledCompletionService, HttpCompletionService};
pub use crate::store::{DataAccess, MemoryStore, Query};
