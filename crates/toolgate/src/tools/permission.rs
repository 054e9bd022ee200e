//! Permission gate.
//!
//! A tool may require zero or more capabilities. Capabilities are opaque
//! string identifiers; the caller must hold every one of them. Meta tools
//! ([`ToolName::is_meta`](super::names::ToolName::is_meta)) are exempt.

use super::core::ToolDefinition;
use std::collections::BTreeSet;

/// The set of capabilities granted to a caller.
pub type Capabilities = BTreeSet<String>;

/// Build a [`Capabilities`] set from anything string-like.
pub fn capabilities<I, S>(items: I) -> Capabilities
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items.into_iter().map(Into::into).collect()
}

/// Result of a permission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authorization {
    Granted,
    /// Sorted list of required capabilities the caller does not hold.
    Denied { missing: Vec<String> },
}

impl Authorization {
    pub fn is_granted(&self) -> bool {
        matches!(self, Authorization::Granted)
    }
}

/// Check a tool definition against the caller's granted capabilities.
pub fn authorize(def: &ToolDefinition, granted: &Capabilities) -> Authorization {
    if def.name.is_meta() {
        return Authorization::Granted;
    }

    let missing: Vec<String> = def
        .required_capabilities
        .iter()
        .filter(|cap| !granted.contains(*cap))
        .cloned()
        .collect();

    if missing.is_empty() {
        Authorization::Granted
    } else {
        Authorization::Denied { missing }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::core::{FnHandler, ToolResult};
    use crate::tools::names::ToolName;
    use serde_json::{Value, json};

    fn def(name: ToolName) -> ToolDefinition {
        ToolDefinition::new(
            name,
            "test tool",
            json!({"type": "object"}),
            FnHandler::new(|_: Value| async { ToolResult::success(json!(null)) }),
        )
    }

    #[test]
    fn no_requirements_always_granted() {
        let d = def(ToolName::ListTasks);
        assert!(authorize(&d, &Capabilities::new()).is_granted());
    }

    #[test]
    fn single_requirement_missing_is_denied() {
        let d = def(ToolName::DeleteTask).requires("manage_projects");
        assert_eq!(
            authorize(&d, &Capabilities::new()),
            Authorization::Denied {
                missing: vec!["manage_projects".into()]
            }
        );
        assert!(authorize(&d, &capabilities(["manage_projects"])).is_granted());
    }

    #[test]
    fn all_requirements_must_be_present() {
        let d = def(ToolName::GenerateSummary)
            .requires("use_ai")
            .requires("billing");
        assert_eq!(
            authorize(&d, &capabilities(["use_ai"])),
            Authorization::Denied {
                missing: vec!["billing".into()]
            }
        );
        assert!(authorize(&d, &capabilities(["billing", "use_ai", "extra"])).is_granted());
    }

    #[test]
    fn capability_match_is_exact() {
        let d = def(ToolName::CreateTask).requires("manage_tasks");
        assert!(!authorize(&d, &capabilities(["MANAGE_TASKS", "manage_task"])).is_granted());
    }

    #[test]
    fn meta_tools_skip_the_gate() {
        let d = def(ToolName::NoOp).requires("anything");
        assert!(authorize(&d, &Capabilities::new()).is_granted());
    }
}
