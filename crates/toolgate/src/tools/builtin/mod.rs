//! Built-in tool catalog.
//!
//! [`definition_for`] maps every [`ToolName`] to its definition with an
//! exhaustive `match`, so adding a name without a handler fails to compile.
//! [`builtin_registry`] registers the whole catalog.
//!
//! | Tool | Capability | Notes |
//! |------|------------|-------|
//! | `select_action` | none (meta) | records the agent's chosen action |
//! | `no_op` | none (meta) | explicit "do nothing" |
//! | `create_task` | `manage_tasks` | |
//! | `list_tasks` | none | keyset-paginated |
//! | `delete_task` | `manage_projects` | |
//! | `generate_summary` | `use_ai` | metered through the credit ledger |
//! | `render_view` | none | output checked against the render spec contract |

mod meta;
mod render;
mod summary;
mod tasks;

use super::core::{ToolDefinition, ToolFailure, ToolResult};
use super::names::ToolName;
use super::registry::{RegistryError, ToolRegistry};
use crate::ledger::{CreditLedger, MeteringConfig};
use crate::pagination::PaginationConfig;
use crate::service::CompletionService;
use serde::Serialize;
use std::sync::Arc;

pub const TASKS_TABLE: &str = "tasks";

pub const MANAGE_TASKS: &str = "manage_tasks";
pub const MANAGE_PROJECTS: &str = "manage_projects";
pub const USE_AI: &str = "use_ai";

/// Default model id passed to the completion service.
pub const DEFAULT_SUMMARY_MODEL: &str = "openai/gpt-4o-mini";

/// Shared collaborators for the built-in handlers.
#[derive(Clone)]
pub struct BuiltinServices {
    pub ledger: Arc<CreditLedger>,
    pub completion: Arc<dyn CompletionService>,
    pub metering: MeteringConfig,
    pub pagination: PaginationConfig,
    pub summary_model: String,
}

impl BuiltinServices {
    pub fn new(ledger: Arc<CreditLedger>, completion: Arc<dyn CompletionService>) -> Self {
        Self {
            ledger,
            completion,
            metering: MeteringConfig::default(),
            pagination: PaginationConfig::default(),
            summary_model: DEFAULT_SUMMARY_MODEL.to_string(),
        }
    }

    pub fn with_metering(mut self, metering: MeteringConfig) -> Self {
        self.metering = metering;
        self
    }

    pub fn with_pagination(mut self, pagination: PaginationConfig) -> Self {
        self.pagination = pagination;
        self
    }

    pub fn with_summary_model(mut self, model: impl Into<String>) -> Self {
        self.summary_model = model.into();
        self
    }
}

impl std::fmt::Debug for BuiltinServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuiltinServices")
            .field("metering", &self.metering)
            .field("pagination", &self.pagination)
            .field("summary_model", &self.summary_model)
            .finish_non_exhaustive()
    }
}

/// The built-in definition for `name`.
pub fn definition_for(name: ToolName, services: &BuiltinServices) -> ToolDefinition {
    match name {
        ToolName::SelectAction => meta::select_action(),
        ToolName::NoOp => meta::no_op(),
        ToolName::CreateTask => tasks::create_task(),
        ToolName::ListTasks => tasks::list_tasks(services.pagination),
        ToolName::DeleteTask => tasks::delete_task(),
        ToolName::GenerateSummary => summary::generate_summary(services),
        ToolName::RenderView => render::render_view(),
    }
}

/// Registry holding the complete built-in catalog.
pub fn builtin_registry(services: &BuiltinServices) -> Result<ToolRegistry, RegistryError> {
    let mut builder = ToolRegistry::builder();
    for name in ToolName::ALL {
        builder.register(definition_for(name, services))?;
    }
    builder.build()
}

fn finish<T: Serialize>(outcome: Result<T, ToolFailure>) -> ToolResult {
    match outcome {
        Ok(payload) => ToolResult::success(payload),
        Err(failure) => failure.into(),
    }
}
