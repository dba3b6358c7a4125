//! Permission and execution pipeline between "the model asked to run a tool"
//! and "the result is in the transcript".
//!
//! [`PermissionEvaluator`] turns a [`ToolCallRequest`] into allow, deny or
//! ask using the [`RuleStore`] and [`SessionDecisionCache`];
//! [`ToolExecutionScheduler`] runs allowed calls as [`ExecutionStream`]s;
//! [`merge`] folds results into one [`TranscriptMessage`]. [`Orchestrator`]
//! drives a whole turn, consulting a [`Confirmer`] for "ask" decisions.

mod confirm;
mod context;
mod error;
mod merger;
mod permission;
mod rules;
mod scheduler;
mod session;
mod turn;

pub use confirm::{ConfirmationChoice, ConfirmationPrompt, Confirmer, FixedConfirmer};
pub use context::OrchestratorContext;
pub use error::{OrchestratorError, Result};
pub use merger::{TranscriptMessage, TurnResults, merge, to_chat_messages};
pub use permission::{
    DecisionBehavior, PermissionDecision, PermissionEvaluator, PermissionMode, PreparedCall,
    ToolCallRequest,
};
pub use rules::{Rule, RuleBehavior, RuleLoader, RuleMap, RuleSource, RuleStore, matching_rule};
pub use scheduler::{ExecutionEvent, ExecutionStream, InFlightExecutions, ToolExecutionScheduler};
pub use session::{SessionDecisionCache, SessionDecisionEntry};
pub use turn::{CallAudit, Orchestrator, OrchestratorBuilder, TurnOutcome};
