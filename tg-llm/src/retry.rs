//! Classification of failed upstream calls into retry / no-retry.
//!
//! The policy never sleeps; callers apply `wait_ms` themselves (see
//! [`crate::RetryingClient`]).

use crate::error::{ApiFailure, FailureKind};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const SHOULD_RETRY_HEADER: &str = "x-should-retry";
pub const RETRY_AFTER_HEADER: &str = "retry-after";

const OVERLOADED_MARKER: &str = r#""type":"overloaded_error""#;
const CONTEXT_LIMIT_MARKER: &str = "input length and `max_tokens` exceed context limit";
const OVERLOADED_STATUS: u16 = 529;
const JITTER_RATIO: f64 = 0.25;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Upper bound on a server-supplied `retry-after` wait.
    #[serde(default = "default_max_retry_after_ms")]
    pub max_retry_after_ms: u64,
    /// Restricted/offline mode: server retry hints and 429s are not retried.
    #[serde(default)]
    pub restricted: bool,
}

fn default_max_retries() -> u32 {
    10
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    32_000
}

fn default_max_retry_after_ms() -> u64 {
    300_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_retry_after_ms: default_max_retry_after_ms(),
            restricted: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryReason {
    Overloaded,
    ContextLimit,
    ServerHint,
    Transient,
    Timeout,
    Conflict,
    RateLimited,
    AuthExpired,
    ServerError,
    NonRetryable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetryDecision {
    pub should_retry: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait_ms: Option<u64>,
    pub reason: RetryReason,
    /// Retry depends on a collaborator first reshaping the request.
    #[serde(default)]
    pub delegated: bool,
}

impl RetryDecision {
    fn retry(reason: RetryReason, wait_ms: u64) -> Self {
        Self {
            should_retry: true,
            wait_ms: Some(wait_ms),
            reason,
            delegated: false,
        }
    }

    fn stop(reason: RetryReason) -> Self {
        Self {
            should_retry: false,
            wait_ms: None,
            reason,
            delegated: false,
        }
    }
}

/// Invalidates cached credentials so the next attempt re-authenticates.
pub trait CredentialRefresher: Send + Sync {
    fn invalidate(&self);
}

#[derive(Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
    refresher: Option<Arc<dyn CredentialRefresher>>,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            refresher: None,
        }
    }

    pub fn with_refresher(mut self, refresher: Arc<dyn CredentialRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    /// Classify a failure. `attempt` is 1-based and only feeds the backoff.
    ///
    /// First matching rule wins.
    pub fn classify(&self, failure: &ApiFailure, attempt: u32) -> RetryDecision {
        let message = failure.message.as_deref().unwrap_or("");

        if message.contains(OVERLOADED_MARKER) || failure.status == Some(OVERLOADED_STATUS) {
            return RetryDecision::retry(RetryReason::Overloaded, self.wait_ms(failure, attempt));
        }

        if failure.status == Some(400) && message.contains(CONTEXT_LIMIT_MARKER) {
            return RetryDecision {
                should_retry: true,
                wait_ms: None,
                reason: RetryReason::ContextLimit,
                delegated: true,
            };
        }

        match failure.header(SHOULD_RETRY_HEADER) {
            Some("true") if !self.config.restricted => {
                return RetryDecision::retry(
                    RetryReason::ServerHint,
                    self.wait_ms(failure, attempt),
                );
            }
            Some("false") => return RetryDecision::stop(RetryReason::NonRetryable),
            _ => {}
        }

        match failure.kind {
            FailureKind::Connection => {
                return RetryDecision::retry(RetryReason::Transient, self.wait_ms(failure, attempt));
            }
            FailureKind::Timeout => {
                return RetryDecision::retry(RetryReason::Timeout, self.wait_ms(failure, attempt));
            }
            FailureKind::Api => {}
        }

        let Some(status) = failure.status else {
            return RetryDecision::stop(RetryReason::NonRetryable);
        };

        match status {
            408 => RetryDecision::retry(RetryReason::Timeout, self.wait_ms(failure, attempt)),
            409 => RetryDecision::retry(RetryReason::Conflict, self.wait_ms(failure, attempt)),
            429 if self.config.restricted => RetryDecision::stop(RetryReason::RateLimited),
            429 => RetryDecision::retry(RetryReason::RateLimited, self.wait_ms(failure, attempt)),
            401 => {
                if let Some(refresher) = self.refresher.as_ref() {
                    refresher.invalidate();
                }
                RetryDecision::retry(RetryReason::AuthExpired, self.wait_ms(failure, attempt))
            }
            s if s >= 500 => {
                RetryDecision::retry(RetryReason::ServerError, self.wait_ms(failure, attempt))
            }
            _ => RetryDecision::stop(RetryReason::NonRetryable),
        }
    }

    fn wait_ms(&self, failure: &ApiFailure, attempt: u32) -> u64 {
        if let Some(secs) = failure
            .header(RETRY_AFTER_HEADER)
            .and_then(|v| v.trim().parse::<u64>().ok())
        {
            return secs
                .saturating_mul(1000)
                .min(self.config.max_retry_after_ms);
        }
        let ceiling = self.backoff_ceiling(attempt);
        let jitter = rand::thread_rng().gen_range(0.0..=JITTER_RATIO) * ceiling as f64;
        ceiling + jitter as u64
    }

    /// Exponential backoff before jitter: `base * 2^(attempt-1)`, capped.
    pub fn backoff_ceiling(&self, attempt: u32) -> u64 {
        let exp = attempt.saturating_sub(1).min(31);
        self.config
            .base_delay_ms
            .saturating_mul(1u64 << exp)
            .min(self.config.max_delay_ms)
    }
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("config", &self.config)
            .field("refresher", &self.refresher.is_some())
            .finish()
    }
}
