//! Folding tool results into transcript-ready content.

use serde::Serialize;
use tg_llm::ChatMessage;
use tg_tools::{ContentBlock, ToolResult, coalesce_text};

/// Content appended to the transcript for one turn's tool results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranscriptMessage {
    pub tool_call_ids: Vec<String>,
    pub content: Vec<ContentBlock>,
    pub is_error: bool,
}

/// Flatten `results` in order, joining every run of adjacent text blocks.
pub fn merge(results: &[ToolResult]) -> TranscriptMessage {
    TranscriptMessage {
        tool_call_ids: results.iter().map(|r| r.tool_call_id.clone()).collect(),
        content: coalesce_text(results.iter().flat_map(|r| r.content.iter().cloned())),
        is_error: results.iter().any(|r| r.is_error),
    }
}

/// One `tool` role message per result, images rendered as placeholders.
pub fn to_chat_messages(results: &[ToolResult]) -> Vec<ChatMessage> {
    results
        .iter()
        .map(|result| {
            let text = result
                .content
                .iter()
                .map(|block| match block {
                    ContentBlock::Text { text } => text.clone(),
                    ContentBlock::Image { source } => format!("[image: {}]", source.media_type),
                })
                .collect::<Vec<_>>()
                .join("\n");
            let content = if result.is_error {
                format!("Error: {text}")
            } else {
                text
            };
            ChatMessage::tool(result.tool_call_id.clone(), content)
        })
        .collect()
}

/// Reorder buffer: results arrive by completion, leave by issue index.
#[derive(Debug)]
pub struct TurnResults {
    slots: Vec<Option<ToolResult>>,
    next: usize,
}

impl TurnResults {
    pub fn new(len: usize) -> Self {
        Self {
            slots: vec![None; len],
            next: 0,
        }
    }

    pub fn insert(&mut self, index: usize, result: ToolResult) {
        match self.slots.get_mut(index) {
            Some(slot) if slot.is_none() && index >= self.next => *slot = Some(result),
            Some(_) => {
                tracing::warn!(
                    index,
                    tool_call_id = %result.tool_call_id,
                    "duplicate result ignored"
                );
            }
            None => {
                tracing::warn!(index, len = self.slots.len(), "result index out of range");
            }
        }
    }

    /// Results whose predecessors have all been drained or are ready now.
    pub fn drain_ready(&mut self) -> Vec<ToolResult> {
        let mut out = Vec::new();
        while let Some(slot) = self.slots.get_mut(self.next) {
            let Some(result) = slot.take() else { break };
            out.push(result);
            self.next += 1;
        }
        out
    }

    pub fn is_complete(&self) -> bool {
        self.next == self.slots.len()
    }
}
