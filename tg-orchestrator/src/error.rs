use thiserror::Error;

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("rule source error: {0}")]
    RuleSource(String),

    #[error("confirmation failed: {0}")]
    Confirmation(String),

    #[error(transparent)]
    Tool(#[from] tg_tools::ToolError),
}
