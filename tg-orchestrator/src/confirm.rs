//! Human confirmation for "ask" decisions.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConfirmationChoice {
    AllowOnce,
    AllowAlwaysThisSession,
    Deny,
}

impl ConfirmationChoice {
    pub const ALL: [Self; 3] = [Self::AllowOnce, Self::AllowAlwaysThisSession, Self::Deny];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::AllowOnce => "allow-once",
            Self::AllowAlwaysThisSession => "allow-always-this-session",
            Self::Deny => "deny",
        }
    }

    pub fn allows(self) -> bool {
        !matches!(self, Self::Deny)
    }
}

impl fmt::Display for ConfirmationChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the UI is asked to confirm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationPrompt {
    pub tool_call_id: String,
    pub tool_name: String,
    pub description: String,
    pub options: Vec<ConfirmationChoice>,
}

impl ConfirmationPrompt {
    pub fn new(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            description: description.into(),
            options: ConfirmationChoice::ALL.to_vec(),
        }
    }
}

/// UI collaborator answering confirmation prompts.
#[async_trait]
pub trait Confirmer: Send + Sync {
    async fn confirm(&self, prompt: &ConfirmationPrompt) -> Result<ConfirmationChoice>;
}

/// Answers every prompt with the same choice; for non-interactive use.
#[derive(Debug, Clone, Copy)]
pub struct FixedConfirmer(pub ConfirmationChoice);

#[async_trait]
impl Confirmer for FixedConfirmer {
    async fn confirm(&self, prompt: &ConfirmationPrompt) -> Result<ConfirmationChoice> {
        tracing::debug!(tool_name = %prompt.tool_name, choice = %self.0, "fixed confirmation");
        Ok(self.0)
    }
}
