//! In-memory "allow for this session" decisions. Never persisted.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionDecisionEntry {
    pub tool_name: String,
    /// `None` covers every input of the tool.
    pub normalized_key: Option<String>,
    pub granted_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct SessionDecisionCache {
    entries: DashMap<(String, Option<String>), SessionDecisionEntry>,
}

impl SessionDecisionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remember(&self, tool_name: &str, normalized_key: Option<&str>) {
        let key = (tool_name.to_string(), normalized_key.map(str::to_string));
        tracing::info!(tool_name, normalized_key, "session decision remembered");
        self.entries
            .entry(key)
            .or_insert_with(|| SessionDecisionEntry {
                tool_name: tool_name.to_string(),
                normalized_key: normalized_key.map(str::to_string),
                granted_at: Utc::now(),
            });
    }

    /// True when `normalized_key` or the tool as a whole was remembered.
    pub fn is_remembered(&self, tool_name: &str, normalized_key: Option<&str>) -> bool {
        let exact = normalized_key.is_some_and(|key| {
            self.entries
                .contains_key(&(tool_name.to_string(), Some(key.to_string())))
        });
        exact || self.entries.contains_key(&(tool_name.to_string(), None))
    }

    pub fn entries(&self) -> Vec<SessionDecisionEntry> {
        let mut out: Vec<_> = self.entries.iter().map(|e| e.value().clone()).collect();
        out.sort_by(|a, b| a.granted_at.cmp(&b.granted_at));
        out
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
