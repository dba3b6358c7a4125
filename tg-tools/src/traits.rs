use crate::content::{ProgressNotification, ToolOutput};
use crate::error::{Result, ToolError};
use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
    /// Has side effects; mutating calls are serialized per resource.
    pub is_mutating: bool,
    /// Edits files; auto-allowed in `acceptEdits` mode.
    pub is_file_edit: bool,
    /// Can be dropped mid-flight without leaving partial state behind.
    pub supports_abort: bool,
}

/// A capability the model can invoke.
///
/// The permission hooks all take input that already passed schema validation.
#[async_trait]
pub trait Tool: Send + Sync {
    fn spec(&self) -> ToolSpec;

    /// Normalized signature remembered by session decisions (a command, a
    /// directory). `None` means tool-wide.
    fn permission_key(&self, _input: &serde_json::Value) -> Option<String> {
        None
    }

    /// Every key rule content patterns are matched against, most specific
    /// first (a file path, then its directory).
    fn rule_keys(&self, input: &serde_json::Value) -> Vec<String> {
        self.permission_key(input).into_iter().collect()
    }

    /// Bring a rule content pattern into the form of [`Tool::rule_keys`].
    /// `None` marks a pattern that can never match.
    fn normalize_pattern(&self, pattern: &str) -> Option<String> {
        Some(pattern.to_string())
    }

    /// Lock key for mutating calls; calls sharing a key never overlap.
    fn resource_key(&self, _input: &serde_json::Value) -> Option<String> {
        None
    }

    /// Canonical form of the input that execution must use.
    fn canonicalize(&self, input: serde_json::Value) -> Result<serde_json::Value> {
        Ok(input)
    }

    /// Free-form justification shown when the call needs confirmation.
    fn permission_hint(&self, _input: &serde_json::Value) -> Option<String> {
        None
    }

    async fn execute(&self, input: serde_json::Value, ctx: &ToolContext) -> Result<ToolOutput>;
}

/// Per-call handle passed into [`Tool::execute`].
#[derive(Debug, Clone)]
pub struct ToolContext {
    call_id: String,
    progress_tx: Option<UnboundedSender<ProgressNotification>>,
    cancel: CancellationToken,
}

impl ToolContext {
    pub fn new(call_id: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            progress_tx: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_progress(mut self, tx: UnboundedSender<ProgressNotification>) -> Self {
        self.progress_tx = Some(tx);
        self
    }

    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn emit_progress(&self, message: impl Into<String>) {
        self.emit(message.into(), None);
    }

    pub fn emit_progress_data(&self, message: impl Into<String>, data: serde_json::Value) {
        self.emit(message.into(), Some(data));
    }

    fn emit(&self, message: String, data: Option<serde_json::Value>) {
        if let Some(tx) = &self.progress_tx {
            let _ = tx.send(ProgressNotification {
                tool_call_id: self.call_id.clone(),
                message,
                data,
            });
        }
    }
}

pub fn to_llm_tool_def(tool: &dyn Tool) -> tg_llm::ToolDefinition {
    let spec = tool.spec();
    tg_llm::ToolDefinition {
        name: spec.name,
        description: spec.description,
        parameters: spec.input_schema,
    }
}

pub(crate) fn require_string(args: &serde_json::Value, key: &str) -> Result<String> {
    let Some(v) = args.get(key) else {
        return Err(ToolError::InvalidArguments(format!("missing key: {key}")));
    };
    match v {
        serde_json::Value::String(s) => Ok(s.clone()),
        other => Err(ToolError::InvalidArguments(format!(
            "key {key} must be string, got {other:?}"
        ))),
    }
}

pub(crate) fn optional_u64(args: &serde_json::Value, key: &str) -> Result<Option<u64>> {
    match args.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => v.as_u64().map(Some).ok_or_else(|| {
            ToolError::InvalidArguments(format!("key {key} must be a non-negative integer"))
        }),
    }
}
