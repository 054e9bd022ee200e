//! Tool abstractions for agent function calling.
//!
//! Every agent capability (creating a task, summarizing text, rendering a
//! view) is a [`ToolDefinition`] keyed by a closed [`ToolName`]. Definitions
//! are collected into an immutable [`ToolRegistry`] at boot and executed
//! through a [`Dispatcher`], which applies the permission gate, argument
//! validation, panic containment and timeouts.
//!
//! # Defining tools
//!
//! - **[`FnHandler`]**: closure-based, auto-parses arguments, ignores the
//!   call context. Best for meta tools and test doubles.
//! - **`impl ToolHandler`**: full struct with access to the
//!   [`ToolCallContext`](crate::context::ToolCallContext). Best for tools that
//!   touch the data store or the ledger.
//!
//! # Submodules
//!
//! - [`names`]: the closed [`ToolName`] enum.
//! - [`core`]: [`ToolHandler`], [`ToolDefinition`], [`ToolResult`].
//! - [`permission`]: capability checks.
//! - [`registry`]: [`ToolRegistry`] and its builder.
//! - [`dispatch`]: [`Dispatcher`].
//! - [`builtin`]: the built-in tool catalog.
//! - [`reflection`]: recovery hints for failed calls.

pub mod builtin;
pub mod core;
pub mod dispatch;
pub mod names;
pub mod permission;
pub mod reflection;
pub mod registry;

pub use builtin::{BuiltinServices, builtin_registry, definition_for};
pub use core::{
    FailureKind, FnHandler, HandlerFuture, ToolDefinition, ToolFailure, ToolHandler, ToolResult,
    parse_args, validate_arguments,
};
pub use dispatch::{DEFAULT_TOOL_TIMEOUT, DispatchConfig, Dispatcher};
pub use names::{ToolName, UnknownTool};
pub use permission::{Authorization, Capabilities, authorize, capabilities};
pub use registry::{RegistryError, ToolRegistry, ToolRegistryBuilder};
