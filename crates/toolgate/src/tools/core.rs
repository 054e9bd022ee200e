//! Tool abstraction: handlers, definitions, and typed outcomes.
//!
//! A [`ToolDefinition`] pairs a [`ToolName`] with its input schema, the
//! capabilities a caller must hold, an optional output shape contract, and
//! the [`ToolHandler`] that does the work. Handlers never throw at the
//! dispatcher: every outcome is a [`ToolResult`].

use crate::context::ToolCallContext;
use crate::tools::names::ToolName;
use crate::tools::reflection;
use crate::validate::ShapeContract;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Value, json};
use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, info, trace};

/// Boxed future returned by [`ToolHandler::call`].
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = ToolResult> + Send + 'a>>;

// ── Outcomes ───────────────────────────────────────────────────────

/// Classification of a failed tool call.
///
/// Determines whether the agent should correct its input and retry, or
/// treat the failure as terminal for this attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The name does not resolve to any registered tool.
    UnknownTool,
    /// The caller lacks one or more required capabilities.
    Unauthorized,
    /// Arguments failed schema or business-rule validation.
    InvalidArguments,
    /// The credit balance cannot cover the call.
    InsufficientCredits,
    /// The reservation lapsed before the metered work could be billed.
    ReservationExpired,
    /// Timeout or network failure of an external dependency.
    Transient,
    /// Handler panic or collaborator fault.
    Internal,
}

impl FailureKind {
    /// Whether the agent may retry (with corrected input, or a fresh
    /// reservation for transient faults).
    pub fn is_retryable(self) -> bool {
        matches!(self, FailureKind::InvalidArguments | FailureKind::Transient)
    }
}

/// A failed tool call, as reported to the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolFailure {
    pub kind: FailureKind,
    pub message: String,
    /// Capabilities the caller was missing (authorization failures only).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing_capabilities: Vec<String>,
}

impl ToolFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            missing_capabilities: Vec::new(),
        }
    }

    /// Authorization failure listing every missing capability.
    pub fn unauthorized(tool: &str, missing: Vec<String>) -> Self {
        Self {
            kind: FailureKind::Unauthorized,
            message: format!(
                "permission denied for tool '{tool}': missing capabilities: {}",
                missing.join(", ")
            ),
            missing_capabilities: missing,
        }
    }

    pub fn retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl fmt::Display for ToolFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Normalized outcome of a tool call.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolResult {
    Success(Value),
    Failure(ToolFailure),
}

impl ToolResult {
    /// Serialize `payload` into a success result.
    pub fn success(payload: impl Serialize) -> Self {
        match serde_json::to_value(payload) {
            Ok(value) => ToolResult::Success(value),
            Err(e) => ToolResult::failure(
                FailureKind::Internal,
                format!("tool produced unserializable output: {e}"),
            ),
        }
    }

    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        ToolResult::Failure(ToolFailure::new(kind, message))
    }

    /// Business-rule violation the agent can fix and retry.
    pub fn invalid_arguments(message: impl Into<String>) -> Self {
        ToolResult::failure(FailureKind::InvalidArguments, message)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ToolResult::Success(_))
    }

    pub fn payload(&self) -> Option<&Value> {
        match self {
            ToolResult::Success(v) => Some(v),
            ToolResult::Failure(_) => None,
        }
    }

    pub fn failure_ref(&self) -> Option<&ToolFailure> {
        match self {
            ToolResult::Success(_) => None,
            ToolResult::Failure(f) => Some(f),
        }
    }

    /// JSON form handed back to the agent: the payload itself on success,
    /// `{error, kind, retryable, hints, ...}` on failure.
    pub fn to_json(&self) -> Value {
        match self {
            ToolResult::Success(v) => v.clone(),
            ToolResult::Failure(f) => {
                let mut out = json!({
                    "error": f.message,
                    "kind": f.kind,
                    "retryable": f.retryable(),
                    "hints": reflection::recovery_hints(f),
                });
                if !f.missing_capabilities.is_empty() {
                    out["missing_capabilities"] = json!(f.missing_capabilities);
                }
                out
            }
        }
    }
}

impl From<ToolFailure> for ToolResult {
    fn from(failure: ToolFailure) -> Self {
        ToolResult::Failure(failure)
    }
}

// ── Handler trait ──────────────────────────────────────────────────

/// The work behind a tool.
///
/// Handlers receive the already-authorized arguments and the caller's
/// context. Business-rule problems (a missing title, an unknown id) are
/// returned as [`FailureKind::InvalidArguments`] failures. Panics are caught
/// by the dispatcher, but handlers should not rely on that.
///
/// # Example
///
/// ```ignore
/// struct Archive;
///
/// impl ToolHandler for Archive {
///     fn call<'a>(&'a self, args: Value, ctx: &'a ToolCallContext) -> HandlerFuture<'a> {
///         Box::pin(async move {
///             let args: ArchiveArgs = match parse_args(args) {
///                 Ok(a) => a,
///                 Err(failure) => return failure,
///             };
///             // ... use ctx.data()
///             ToolResult::success(json!({"archived": args.id}))
///         })
///     }
/// }
/// ```
pub trait ToolHandler: Send + Sync {
    fn call<'a>(&'a self, args: Value, ctx: &'a ToolCallContext) -> HandlerFuture<'a>;
}

/// Type-erased async handler for [`FnHandler`].
type ErasedHandler = Box<dyn Fn(Value) -> HandlerFuture<'static> + Send + Sync>;

/// A closure-based handler that auto-parses typed arguments.
///
/// Use for stateless tools that do not need the call context (meta tools,
/// test doubles). Argument parse errors become `InvalidArguments` failures.
pub struct FnHandler {
    handler: ErasedHandler,
}

impl FnHandler {
    pub fn new<A, F, Fut>(handler: F) -> Self
    where
        A: DeserializeOwned + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ToolResult> + Send + 'static,
    {
        let erased = move |raw: Value| -> HandlerFuture<'static> {
            match parse_args::<A>(raw) {
                Ok(args) => Box::pin(handler(args)),
                Err(failure) => Box::pin(async move { failure }),
            }
        };
        Self {
            handler: Box::new(erased),
        }
    }
}

impl ToolHandler for FnHandler {
    fn call<'a>(&'a self, args: Value, _ctx: &'a ToolCallContext) -> HandlerFuture<'a> {
        (self.handler)(args)
    }
}

impl fmt::Debug for FnHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnHandler").finish_non_exhaustive()
    }
}

// ── ToolDefinition ─────────────────────────────────────────────────

/// Immutable description of one tool, fixed at process start.
pub struct ToolDefinition {
    pub name: ToolName,
    pub description: String,
    /// JSON Schema the arguments must satisfy.
    pub input_schema: Value,
    /// Every capability here must be granted to the caller.
    pub required_capabilities: BTreeSet<String>,
    /// Shape contract applied to the success payload by a [`Turn`](crate::turn::Turn).
    pub output_contract: Option<Arc<dyn ShapeContract>>,
    handler: Arc<dyn ToolHandler>,
}

impl ToolDefinition {
    pub fn new(
        name: ToolName,
        description: impl Into<String>,
        input_schema: Value,
        handler: impl ToolHandler + 'static,
    ) -> Self {
        Self {
            name,
            description: description.into(),
            input_schema,
            required_capabilities: BTreeSet::new(),
            output_contract: None,
            handler: Arc::new(handler),
        }
    }

    /// Require a capability (builder pattern). May be called repeatedly.
    pub fn requires(mut self, capability: impl Into<String>) -> Self {
        self.required_capabilities.insert(capability.into());
        self
    }

    /// Declare the shape contract for this tool's output (builder pattern).
    pub fn with_output_contract(mut self, contract: impl ShapeContract + 'static) -> Self {
        self.output_contract = Some(Arc::new(contract));
        self
    }

    pub fn handler(&self) -> &dyn ToolHandler {
        self.handler.as_ref()
    }

    /// Function-calling definition exported to the model.
    pub fn spec(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name.as_str(),
                "description": self.description,
                "parameters": self.input_schema,
            },
            "required_capabilities": self.required_capabilities,
        })
    }
}

impl fmt::Debug for ToolDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDefinition")
            .field("name", &self.name)
            .field("required_capabilities", &self.required_capabilities)
            .field(
                "output_contract",
                &self.output_contract.as_ref().map(|c| c.name().to_string()),
            )
            .finish()
    }
}

// ── Helpers ────────────────────────────────────────────────────────

/// Parse tool arguments into a typed struct, or an `InvalidArguments`
/// failure the handler can return as-is.
pub fn parse_args<T: DeserializeOwned>(args: Value) -> Result<T, ToolResult> {
    serde_json::from_value(args).map_err(|e| {
        ToolResult::invalid_arguments(format!(
            "invalid tool arguments: {e}. Provide JSON matching the tool's parameter schema."
        ))
    })
}

/// Validate arguments against a definition's input schema.
///
/// Returns `None` when valid. An invalid schema is treated as "no schema".
pub fn validate_arguments(def: &ToolDefinition, args: &Value) -> Option<ToolFailure> {
    let validator = jsonschema::validator_for(&def.input_schema).ok()?;

    let errors: Vec<String> = validator
        .iter_errors(args)
        .map(|e| format!("  - {}: {e}", e.instance_path()))
        .collect();

    if errors.is_empty() {
        None
    } else {
        Some(ToolFailure::new(
            FailureKind::InvalidArguments,
            format!(
                "argument validation failed for tool '{}':\n{}",
                def.name,
                errors.join("\n")
            ),
        ))
    }
}

const ARGS_PREVIEW_CHARS: usize = 120;

/// Log a tool call at INFO level with a truncated preview of arguments.
pub fn log_tool_call(name: &str, user_id: &str, args: &Value) {
    let raw = args.to_string();
    info!("[tool] {name}({}) user={user_id}", args_preview(&raw));
    debug!("[tool] {name} full args ({} bytes)", raw.len());
    trace!("[tool] {name} arguments: {raw}");
}

/// First [`ARGS_PREVIEW_CHARS`] characters of `raw`, with `...` if cut.
fn args_preview(raw: &str) -> String {
    let mut preview: String = raw.chars().take(ARGS_PREVIEW_CHARS).collect();
    if raw.chars().count() > ARGS_PREVIEW_CHARS {
        preview.push_str("...");
    }
    preview
}
