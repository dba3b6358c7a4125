//! Model API plumbing for toolgate.
//!
//! Transcript types, the narrow transport interface the orchestrator consumes,
//! and the retry classification wrapped around every upstream call.

mod client;
mod error;
mod retry;
mod types;

pub use client::{ContextLimitHandler, HttpTransport, ModelTransport, RetryingClient};
pub use error::{ApiFailure, FailureKind, LlmError, Result};
pub use retry::{
    CredentialRefresher, RETRY_AFTER_HEADER, RetryConfig, RetryDecision, RetryPolicy,
    RetryReason, SHOULD_RETRY_HEADER,
};
pub use types::{ChatMessage, Role, ToolCall, ToolDefinition, validate_tool_name};
