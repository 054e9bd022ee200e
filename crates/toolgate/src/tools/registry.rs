//! Immutable tool catalog.
//!
//! Built once at process start through [`ToolRegistryBuilder`] and shared
//! read-only (typically behind an `Arc`) afterwards. Registration mistakes
//! surface as [`RegistryError`]s from `build()`, never at call time.

use super::core::ToolDefinition;
use super::names::ToolName;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("tool '{0}' is registered twice")]
    Duplicate(ToolName),
    #[error("no definition registered for: {}", join_names(.0))]
    Missing(Vec<ToolName>),
    #[error("meta tool '{0}' cannot require capabilities")]
    MetaRequiresCapabilities(ToolName),
}

fn join_names(names: &[ToolName]) -> String {
    names
        .iter()
        .map(|n| n.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Collects definitions before the registry is frozen.
#[derive(Default)]
pub struct ToolRegistryBuilder {
    tools: BTreeMap<ToolName, ToolDefinition>,
}

impl ToolRegistryBuilder {
    /// Add a definition. A second definition for the same name is an error.
    pub fn register(&mut self, def: ToolDefinition) -> Result<(), RegistryError> {
        if self.tools.contains_key(&def.name) {
            return Err(RegistryError::Duplicate(def.name));
        }
        if def.name.is_meta() && !def.required_capabilities.is_empty() {
            return Err(RegistryError::MetaRequiresCapabilities(def.name));
        }
        self.tools.insert(def.name, def);
        Ok(())
    }

    /// Add a definition (builder pattern).
    pub fn with(mut self, def: ToolDefinition) -> Result<Self, RegistryError> {
        self.register(def)?;
        Ok(self)
    }

    /// Freeze the catalog. Fails unless every [`ToolName`] has a definition.
    pub fn build(self) -> Result<ToolRegistry, RegistryError> {
        let missing: Vec<ToolName> = ToolName::ALL
            .iter()
            .copied()
            .filter(|name| !self.tools.contains_key(name))
            .collect();
        if !missing.is_empty() {
            return Err(RegistryError::Missing(missing));
        }
        Ok(ToolRegistry { tools: self.tools })
    }
}

/// Read-only map from tool name to definition.
pub struct ToolRegistry {
    tools: BTreeMap<ToolName, ToolDefinition>,
}

impl ToolRegistry {
    pub fn builder() -> ToolRegistryBuilder {
        ToolRegistryBuilder::default()
    }

    pub fn get(&self, name: ToolName) -> Option<&ToolDefinition> {
        self.tools.get(&name)
    }

    /// Resolve a wire name. `None` means the name is not a tool.
    pub fn lookup(&self, name: &str) -> Option<&ToolDefinition> {
        name.parse::<ToolName>().ok().and_then(|n| self.get(n))
    }

    pub fn definitions(&self) -> impl Iterator<Item = &ToolDefinition> {
        self.tools.values()
    }

    /// Function-calling definitions for the model, in name order.
    pub fn specs(&self) -> Vec<Value> {
        self.tools.values().map(ToolDefinition::spec).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::core::{FnHandler, ToolResult};
    use serde_json::json;

    fn def(name: ToolName) -> ToolDefinition {
        ToolDefinition::new(
            name,
            "test tool",
            json!({"type": "object"}),
            FnHandler::new(|_: Value| async { ToolResult::success(json!(null)) }),
        )
    }

    fn full_builder() -> ToolRegistryBuilder {
        let mut builder = ToolRegistry::builder();
        for name in ToolName::ALL {
            builder.register(def(name)).unwrap();
        }
        builder
    }

    #[test]
    fn complete_catalog_builds() {
        let registry = full_builder().build().unwrap();
        assert_eq!(registry.len(), ToolName::ALL.len());
        assert!(registry.lookup("delete_task").is_some());
        assert!(registry.lookup("nope").is_none());
    }

    #[test]
    fn duplicate_registration_fails_fast() {
        let mut builder = full_builder();
        let err = builder.register(def(ToolName::ListTasks)).unwrap_err();
        assert_eq!(err, RegistryError::Duplicate(ToolName::ListTasks));
    }

    #[test]
    fn missing_definitions_fail_the_build() {
        let builder = ToolRegistry::builder()
            .with(def(ToolName::NoOp))
            .unwrap()
            .with(def(ToolName::SelectAction))
            .unwrap();
        let err = builder.build().unwrap_err();
        match &err {
            RegistryError::Missing(names) => {
                assert_eq!(names.len(), ToolName::ALL.len() - 2);
                assert!(names.contains(&ToolName::DeleteTask));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().contains("delete_task"));
    }

    #[test]
    fn meta_tools_cannot_demand_capabilities() {
        let err = ToolRegistry::builder()
            .register(def(ToolName::SelectAction).requires("admin"))
            .unwrap_err();
        assert_eq!(err, RegistryError::MetaRequiresCapabilities(ToolName::SelectAction));
    }

    #[test]
    fn specs_follow_name_order() {
        let registry = full_builder().build().unwrap();
        let names: Vec<String> = registry
            .specs()
            .iter()
            .map(|s| s["function"]["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names.first().map(String::as_str), Some("select_action"));
        assert_eq!(names.len(), 7);
    }
}
