use super::super::core::{FnHandler, ToolDefinition, ToolResult};
use super::super::names::ToolName;
use crate::validate::RenderSpecContract;
use serde::Deserialize;
use serde_json::{Value, json};

#[derive(Deserialize)]
struct RenderArgs {
    spec: Value,
}

/// Hands the agent's render spec back as the tool output. The spec is
/// checked against [`RenderSpecContract`] by the turn, not here.
pub(super) fn render_view() -> ToolDefinition {
    ToolDefinition::new(
        ToolName::RenderView,
        "Render a view for the user. `spec` is {root, elements}: `root` is the id of the top \
         element and `elements` maps ids to {type, props, children} nodes, where `children` \
         lists element ids.",
        json!({
            "type": "object",
            "properties": {
                "spec": {
                    "description": "Render spec: {\"root\": id, \"elements\": {id: {\"type\", \"props\", \"children\"}}}"
                }
            },
            "required": ["spec"]
        }),
        FnHandler::new(|args: RenderArgs| async move { ToolResult::success(args.spec) }),
    )
    .with_output_contract(RenderSpecContract)
}
