use super::super::core::{FnHandler, ToolDefinition, ToolResult};
use super::super::names::ToolName;
use crate::json_schema_for;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;

#[derive(Deserialize, JsonSchema)]
struct SelectActionArgs {
    /// The action (tool name or plain-language step) the agent will take next.
    action: String,
    /// Why this action was chosen.
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Deserialize, JsonSchema)]
struct NoOpArgs {
    /// Why nothing needs to be done.
    #[serde(default)]
    reason: Option<String>,
}

pub(super) fn select_action() -> ToolDefinition {
    ToolDefinition::new(
        ToolName::SelectAction,
        "Declare the next action before taking it. Has no side effects.",
        json_schema_for::<SelectActionArgs>(),
        FnHandler::new(|args: SelectActionArgs| async move {
            let action = args.action.trim().to_string();
            if action.is_empty() {
                return ToolResult::invalid_arguments("action must not be empty");
            }
            ToolResult::success(json!({"selected": action, "reason": args.reason}))
        }),
    )
}

pub(super) fn no_op() -> ToolDefinition {
    ToolDefinition::new(
        ToolName::NoOp,
        "Do nothing. Use when the request needs no tool call.",
        json_schema_for::<NoOpArgs>(),
        FnHandler::new(|args: NoOpArgs| async move {
            ToolResult::success(json!({"ok": true, "reason": args.reason}))
        }),
    )
}
