//! One model turn: evaluate every call in order, confirm, execute, merge.

use crate::confirm::{ConfirmationChoice, ConfirmationPrompt, Confirmer};
use crate::context::OrchestratorContext;
use crate::error::{OrchestratorError, Result};
use crate::merger::{TranscriptMessage, merge};
use crate::permission::{
    DecisionBehavior, PermissionDecision, PermissionEvaluator, PermissionMode, ToolCallRequest,
};
use crate::scheduler::ToolExecutionScheduler;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tg_tools::{ProgressNotification, Tool, ToolRegistry, ToolResult};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Audit record for one call of a turn.
#[derive(Debug, Clone, Serialize)]
pub struct CallAudit {
    pub tool_call_id: String,
    pub tool_name: String,
    pub decision: PermissionDecision,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmation: Option<ConfirmationChoice>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    /// One result per request, in request order.
    pub results: Vec<ToolResult>,
    pub message: TranscriptMessage,
    pub decisions: Vec<CallAudit>,
}

enum Resolution {
    Run(serde_json::Value),
    Done(ToolResult),
}

pub struct Orchestrator {
    context: Arc<OrchestratorContext>,
    registry: Arc<ToolRegistry>,
    scheduler: ToolExecutionScheduler,
    confirmer: Arc<dyn Confirmer>,
    mode: PermissionMode,
}

pub struct OrchestratorBuilder {
    context: Arc<OrchestratorContext>,
    confirmer: Arc<dyn Confirmer>,
    registry: ToolRegistry,
    mode: PermissionMode,
    max_concurrency: Option<usize>,
}

impl OrchestratorBuilder {
    pub fn tool(mut self, tool: Arc<dyn Tool>) -> Result<Self> {
        self.registry.register(tool)?;
        Ok(self)
    }

    pub fn mode(mut self, mode: PermissionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn max_concurrency(mut self, max: Option<usize>) -> Self {
        self.max_concurrency = max;
        self
    }

    pub fn build(self) -> Orchestrator {
        let registry = Arc::new(self.registry);
        let scheduler =
            ToolExecutionScheduler::new(Arc::clone(&registry), self.context.in_flight().clone())
                .with_max_concurrency(self.max_concurrency);
        tracing::info!(
            tools = registry.len(),
            mode = %self.mode,
            session_id = %self.context.session_id(),
            "orchestrator ready"
        );
        Orchestrator {
            context: self.context,
            registry,
            scheduler,
            confirmer: self.confirmer,
            mode: self.mode,
        }
    }
}

impl Orchestrator {
    pub fn builder(
        context: Arc<OrchestratorContext>,
        confirmer: Arc<dyn Confirmer>,
    ) -> OrchestratorBuilder {
        OrchestratorBuilder {
            context,
            confirmer,
            registry: ToolRegistry::new(),
            mode: PermissionMode::Default,
            max_concurrency: None,
        }
    }

    pub fn context(&self) -> &OrchestratorContext {
        &self.context
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn mode(&self) -> PermissionMode {
        self.mode
    }

    fn evaluator(&self) -> PermissionEvaluator<'_> {
        PermissionEvaluator::new(
            &self.registry,
            self.context.rules(),
            self.context.session(),
        )
    }

    pub fn evaluate(&self, request: &ToolCallRequest) -> PermissionDecision {
        self.evaluator().evaluate(request, self.mode)
    }

    pub async fn run_turn(
        &self,
        requests: Vec<ToolCallRequest>,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome> {
        self.run_turn_with_progress(requests, cancel, None).await
    }

    /// Like [`Self::run_turn`], streaming progress notifications to `progress_tx`.
    ///
    /// Fails only when the confirmer fails; tool problems become error results.
    #[tracing::instrument(
        level = "info",
        skip_all,
        fields(session_id = %self.context.session_id(), calls = requests.len())
    )]
    pub async fn run_turn_with_progress(
        &self,
        requests: Vec<ToolCallRequest>,
        cancel: &CancellationToken,
        progress_tx: Option<mpsc::UnboundedSender<ProgressNotification>>,
    ) -> Result<TurnOutcome> {
        let started = Instant::now();
        let mut slots: Vec<Option<ToolResult>> = vec![None; requests.len()];
        let mut decisions = Vec::with_capacity(requests.len());
        let mut batch = Vec::new();
        let mut batch_slots = Vec::new();

        for (index, request) in requests.iter().enumerate() {
            let (audit, resolution) = self.resolve(request, cancel).await?;
            decisions.push(audit);
            match resolution {
                Resolution::Run(input) => {
                    batch.push(ToolCallRequest::new(
                        request.id.clone(),
                        request.tool_name.clone(),
                        input,
                    ));
                    batch_slots.push(index);
                }
                Resolution::Done(result) => slots[index] = Some(result),
            }
        }

        let executed = self.scheduler.run_batch(&batch, cancel, progress_tx).await;
        for (index, result) in batch_slots.into_iter().zip(executed) {
            slots[index] = Some(result);
        }

        let results: Vec<ToolResult> = slots
            .into_iter()
            .zip(&requests)
            .map(|(slot, request)| {
                slot.unwrap_or_else(|| ToolResult::error(&request.id, "no result produced"))
            })
            .collect();
        let message = merge(&results);
        tracing::info!(
            executed = batch.len(),
            errors = results.iter().filter(|r| r.is_error).count(),
            latency_ms = started.elapsed().as_millis() as u64,
            "turn completed"
        );
        Ok(TurnOutcome {
            results,
            message,
            decisions,
        })
    }

    async fn resolve(
        &self,
        request: &ToolCallRequest,
        cancel: &CancellationToken,
    ) -> Result<(CallAudit, Resolution)> {
        let audit = |decision: PermissionDecision, confirmation| CallAudit {
            tool_call_id: request.id.clone(),
            tool_name: request.tool_name.clone(),
            decision,
            confirmation,
        };
        if cancel.is_cancelled() {
            return Ok((
                audit(PermissionDecision::deny("turn cancelled"), None),
                Resolution::Done(ToolResult::cancelled(&request.id)),
            ));
        }

        let evaluator = self.evaluator();
        let decision = evaluator.evaluate(request, self.mode);
        match decision.behavior() {
            DecisionBehavior::Allow => {
                let input = decision
                    .updated_input()
                    .cloned()
                    .unwrap_or_else(|| request.input.clone());
                Ok((audit(decision, None), Resolution::Run(input)))
            }
            DecisionBehavior::Deny => {
                let result = ToolResult::error(&request.id, decision.reason());
                Ok((audit(decision, None), Resolution::Done(result)))
            }
            DecisionBehavior::Ask => {
                let prompt =
                    ConfirmationPrompt::new(&request.id, &request.tool_name, decision.reason());
                let choice = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    choice = self.confirmer.confirm(&prompt) => Some(choice.map_err(|e| {
                        OrchestratorError::Confirmation(format!("{}: {e}", request.id))
                    })?),
                };
                let Some(choice) = choice else {
                    return Ok((
                        audit(decision, None),
                        Resolution::Done(ToolResult::cancelled(&request.id)),
                    ));
                };
                tracing::info!(tool_call_id = %request.id, %choice, "confirmation received");
                if !choice.allows() {
                    let result = ToolResult::error(
                        &request.id,
                        format!("{} was denied by the user", request.tool_name),
                    );
                    return Ok((audit(decision, Some(choice)), Resolution::Done(result)));
                }
                let resolution = match evaluator.prepare(request) {
                    Ok(prepared) => {
                        if choice == ConfirmationChoice::AllowAlwaysThisSession {
                            self.context
                                .session()
                                .remember(&request.tool_name, prepared.permission_key.as_deref());
                        }
                        Resolution::Run(prepared.input)
                    }
                    Err(reason) => Resolution::Done(ToolResult::error(&request.id, reason)),
                };
                Ok((audit(decision, Some(choice)), resolution))
            }
        }
    }
}
