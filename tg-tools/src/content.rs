//! Tool result content blocks and progress notifications.

use serde::{Deserialize, Serialize};

/// Marker text carried by results of interrupted tool calls.
pub const CANCELLED_MESSAGE: &str = "[Request interrupted by user for tool use]";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSource {
    /// Always `"base64"` for locally produced images.
    #[serde(rename = "type")]
    pub kind: String,
    pub media_type: String,
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    Image { source: ImageSource },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn base64_image(media_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self::Image {
            source: ImageSource {
                kind: "base64".to_string(),
                media_type: media_type.into(),
                data: data.into(),
            },
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            Self::Image { .. } => None,
        }
    }
}

/// Join each run of consecutive text blocks with `\n`.
///
/// Non-text blocks are kept in place and split runs. Output order equals
/// input order modulo the joins; nothing is dropped.
pub fn coalesce_text<I>(blocks: I) -> Vec<ContentBlock>
where
    I: IntoIterator<Item = ContentBlock>,
{
    let mut out: Vec<ContentBlock> = Vec::new();
    for block in blocks {
        if let ContentBlock::Text { text } = &block {
            if let Some(ContentBlock::Text { text: prev }) = out.last_mut() {
                prev.push('\n');
                prev.push_str(text);
                continue;
            }
        }
        out.push(block);
    }
    out
}

/// Output of a single tool invocation, before it is bound to a call id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub content: Vec<ContentBlock>,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::text(text)],
            is_error: false,
        }
    }

    pub fn blocks(content: Vec<ContentBlock>) -> Self {
        Self {
            content,
            is_error: false,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::text(text)],
            is_error: true,
        }
    }
}

/// Terminal result for one tool call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    #[serde(rename = "type")]
    pub kind: ToolResultKind,
    pub content: Vec<ContentBlock>,
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub cancelled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolResultKind {
    ToolResult,
}

impl ToolResult {
    /// Build a result; adjacent text blocks are coalesced.
    pub fn new(
        tool_call_id: impl Into<String>,
        content: Vec<ContentBlock>,
        is_error: bool,
    ) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            kind: ToolResultKind::ToolResult,
            content: coalesce_text(content),
            is_error,
            cancelled: false,
        }
    }

    pub fn from_output(tool_call_id: impl Into<String>, output: ToolOutput) -> Self {
        Self::new(tool_call_id, output.content, output.is_error)
    }

    pub fn error(tool_call_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(tool_call_id, vec![ContentBlock::text(message)], true)
    }

    pub fn cancelled(tool_call_id: impl Into<String>) -> Self {
        Self {
            cancelled: true,
            ..Self::error(tool_call_id, CANCELLED_MESSAGE)
        }
    }
}

/// Non-terminal update streamed while a tool runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressNotification {
    pub tool_call_id: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}
