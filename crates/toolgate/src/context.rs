//! Per-call context handed to every handler.

use crate::ledger::ScopeKey;
use crate::store::DataAccess;
use crate::tools::permission::Capabilities;
use std::fmt;
use std::sync::{Arc, Mutex};

/// Caller identity, granted capabilities and the data-access handle.
///
/// Handlers receive it by shared reference. The only field that can change
/// during a call is the workspace override, which sits behind its own lock.
pub struct ToolCallContext {
    user_id: String,
    workspace_id: String,
    timezone: Option<String>,
    session_id: Option<String>,
    capabilities: Capabilities,
    data: Arc<dyn DataAccess>,
    workspace_override: Mutex<Option<String>>,
}

impl ToolCallContext {
    pub fn new(
        user_id: impl Into<String>,
        workspace_id: impl Into<String>,
        data: Arc<dyn DataAccess>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            workspace_id: workspace_id.into(),
            timezone: None,
            session_id: None,
            capabilities: Capabilities::new(),
            data,
            workspace_override: Mutex::new(None),
        }
    }

    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = Some(timezone.into());
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// The workspace calls act on: the override if one is set, otherwise the
    /// workspace the context was created for.
    pub fn workspace_id(&self) -> String {
        self.workspace_override
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .unwrap_or_else(|| self.workspace_id.clone())
    }

    pub fn base_workspace_id(&self) -> &str {
        &self.workspace_id
    }

    /// Switch (or with `None`, restore) the effective workspace.
    pub fn set_workspace_override(&self, workspace_id: Option<String>) {
        *self
            .workspace_override
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = workspace_id;
    }

    pub fn timezone(&self) -> Option<&str> {
        self.timezone.as_deref()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub fn data(&self) -> &dyn DataAccess {
        self.data.as_ref()
    }

    /// Credit balance key for this caller in the effective workspace.
    pub fn scope_key(&self) -> ScopeKey {
        ScopeKey::new(self.workspace_id(), self.user_id.clone())
    }
}

impl fmt::Debug for ToolCallContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolCallContext")
            .field("user_id", &self.user_id)
            .field("workspace_id", &self.workspace_id())
            .field("timezone", &self.timezone)
            .field("session_id", &self.session_id)
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}
