//! Canonical tool names.
//!
//! [`ToolName`] is the closed set of tools the dispatcher can route to. The
//! registry refuses to build unless every variant has a definition, so the
//! catalog and the name space cannot drift apart. Parsing an unrecognised
//! string is the only way to get an "unknown tool" outcome.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    SelectAction,
    NoOp,
    CreateTask,
    ListTasks,
    DeleteTask,
    GenerateSummary,
    RenderView,
}

impl ToolName {
    /// Every tool name, in registration order.
    pub const ALL: [ToolName; 7] = [
        ToolName::SelectAction,
        ToolName::NoOp,
        ToolName::CreateTask,
        ToolName::ListTasks,
        ToolName::DeleteTask,
        ToolName::GenerateSummary,
        ToolName::RenderView,
    ];

    /// The wire name the model uses to call this tool.
    pub const fn as_str(self) -> &'static str {
        match self {
            ToolName::SelectAction => "select_action",
            ToolName::NoOp => "no_op",
            ToolName::CreateTask => "create_task",
            ToolName::ListTasks => "list_tasks",
            ToolName::DeleteTask => "delete_task",
            ToolName::GenerateSummary => "generate_summary",
            ToolName::RenderView => "render_view",
        }
    }

    /// Meta tools have no side effects and skip the permission gate.
    pub const fn is_meta(self) -> bool {
        matches!(self, ToolName::SelectAction | ToolName::NoOp)
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string does not name any registered tool.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown tool '{0}'")]
pub struct UnknownTool(pub String);

impl FromStr for ToolName {
    type Err = UnknownTool;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ToolName::ALL
            .iter()
            .copied()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| UnknownTool(s.to_string()))
    }
}
