use crate::error::Result;
use crate::rules::{RuleLoader, RuleStore};
use crate::scheduler::InFlightExecutions;
use crate::session::SessionDecisionCache;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Process-wide permission and execution state, built once and passed explicitly.
#[derive(Debug)]
pub struct OrchestratorContext {
    session_id: Uuid,
    started_at: DateTime<Utc>,
    rules: RuleStore,
    session: SessionDecisionCache,
    in_flight: InFlightExecutions,
}

impl OrchestratorContext {
    pub fn new(rules: RuleStore) -> Self {
        let session_id = Uuid::new_v4();
        tracing::debug!(%session_id, rules = rules.len(), "orchestrator context created");
        Self {
            session_id,
            started_at: Utc::now(),
            rules,
            session: SessionDecisionCache::new(),
            in_flight: InFlightExecutions::new(),
        }
    }

    pub fn from_loader(loader: &dyn RuleLoader) -> Result<Self> {
        Ok(Self::new(RuleStore::load(loader)?))
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn rules(&self) -> &RuleStore {
        &self.rules
    }

    pub fn session(&self) -> &SessionDecisionCache {
        &self.session
    }

    pub fn in_flight(&self) -> &InFlightExecutions {
        &self.in_flight
    }
}
