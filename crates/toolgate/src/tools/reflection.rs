//! Structured reflection on tool failures.
//!
//! Turns a [`ToolFailure`] into recovery guidance the model can act on, so a
//! denied or rejected call leads to a targeted next step instead of a blind
//! retry.

use super::core::{FailureKind, ToolFailure};

/// Recovery suggestions for a failure, most specific first.
pub fn recovery_hints(failure: &ToolFailure) -> Vec<String> {
    let mut hints = Vec::new();

    match failure.kind {
        FailureKind::UnknownTool => {
            hints.push("Call one of the tools listed in your tool definitions.".into());
        }
        FailureKind::Unauthorized => {
            hints.push(
                "The user is not allowed to run this tool. Tell them which permission is missing \
                 instead of retrying."
                    .into(),
            );
        }
        FailureKind::InvalidArguments => {
            hints.push("Fix the arguments named in the error and call the tool again.".into());
            let lower = failure.message.to_lowercase();
            if lower.contains("cursor") {
                hints.push(
                    "Pass next_cursor back exactly as returned, or omit it to start over.".into(),
                );
            }
            if lower.contains("not found") {
                hints.push("List the items first to get a valid id.".into());
            }
        }
        FailureKind::InsufficientCredits => {
            hints.push(
                "The user has run out of credits. Do not retry; explain that the action needs \
                 more credits."
                    .into(),
            );
        }
        FailureKind::ReservationExpired => {
            hints.push(
                "The action was not billed and its result was discarded. Do not retry \
                 automatically; ask the user before running it again."
                    .into(),
            );
        }
        FailureKind::Transient => {
            hints.push(
                "A dependency timed out or was unreachable. No credits were charged. You may \
                 retry once, or continue without this result."
                    .into(),
            );
        }
        FailureKind::Internal => {
            hints.push(
                "The tool failed unexpectedly. Continue without it and tell the user.".into(),
            );
        }
    }

    hints
}

/// Format a tool failure as a human-readable block: the error, recovery
/// hints, and a truncated preview of the arguments used.
pub fn format_tool_failure(tool_name: &str, arguments: &str, failure: &ToolFailure) -> String {
    let mut msg = format!("Error from tool '{tool_name}':\n  {}\n", failure.message);

    let hints = recovery_hints(failure);
    if !hints.is_empty() {
        msg.push_str("\nRecovery:\n");
        for hint in &hints {
            msg.push_str(&format!("  - {hint}\n"));
        }
    }

    let args_preview: String = arguments.chars().take(200).collect();
    msg.push_str(&format!("\nArguments used: {args_preview}"));
    if arguments.chars().count() > 200 {
        msg.push_str("...");
    }

    msg
}
