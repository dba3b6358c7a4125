use crate::error::{ApiFailure, LlmError, Result};
use crate::retry::{RetryPolicy, RetryReason};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Issues one request to the model API. Wire framing is the implementor's concern.
#[async_trait]
pub trait ModelTransport: Send + Sync {
    async fn send(
        &self,
        request: &serde_json::Value,
    ) -> std::result::Result<serde_json::Value, ApiFailure>;
}

/// Reshapes a request that exceeded the model's context window.
pub trait ContextLimitHandler: Send + Sync {
    /// Returns `true` if `request` was reduced and may be retried.
    fn shrink(&self, request: &mut serde_json::Value, failure: &ApiFailure) -> bool;
}

/// JSON-over-HTTP transport for a single endpoint.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    headers: Vec<(String, String)>,
}

impl HttpTransport {
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn new(endpoint: &str, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(%e, "reqwest client build failed; falling back to default client");
                reqwest::Client::new()
            });
        Self {
            client,
            endpoint: endpoint.to_string(),
            headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

#[async_trait]
impl ModelTransport for HttpTransport {
    async fn send(
        &self,
        request: &serde_json::Value,
    ) -> std::result::Result<serde_json::Value, ApiFailure> {
        let mut builder = self.client.post(&self.endpoint).json(request);
        for (name, value) in &self.headers {
            builder = builder.header(name, value);
        }
        let response = builder.send().await?;

        let status = response.status();
        if !status.is_success() {
            let headers: HashMap<String, String> = response
                .headers()
                .iter()
                .filter_map(|(k, v)| {
                    v.to_str()
                        .ok()
                        .map(|v| (k.as_str().to_ascii_lowercase(), v.to_string()))
                })
                .collect();
            let body = response.text().await.unwrap_or_default();
            return Err(ApiFailure {
                headers,
                ..ApiFailure::api(status.as_u16(), body)
            });
        }

        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| ApiFailure::api(status.as_u16(), format!("decode response: {e}")))
    }
}

/// Wraps a transport with [`RetryPolicy`] classification and cancellable backoff.
#[derive(Clone)]
pub struct RetryingClient {
    transport: Arc<dyn ModelTransport>,
    policy: RetryPolicy,
    context_handler: Option<Arc<dyn ContextLimitHandler>>,
}

impl RetryingClient {
    pub fn new(transport: Arc<dyn ModelTransport>, policy: RetryPolicy) -> Self {
        Self {
            transport,
            policy,
            context_handler: None,
        }
    }

    pub fn with_context_handler(mut self, handler: Arc<dyn ContextLimitHandler>) -> Self {
        self.context_handler = Some(handler);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Send `request`, retrying classified-retryable failures.
    ///
    /// A second 401 after credentials were already refreshed is terminal.
    #[tracing::instrument(level = "info", skip_all)]
    pub async fn send(
        &self,
        request: serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value> {
        let mut request = request;
        let mut attempt = 1u32;
        let mut reauthenticated = false;

        loop {
            let started = Instant::now();
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(LlmError::Cancelled),
                r = self.transport.send(&request) => r,
            };
            let failure = match outcome {
                Ok(v) => {
                    tracing::debug!(
                        attempt,
                        latency_ms = started.elapsed().as_millis() as u64,
                        "model request succeeded"
                    );
                    return Ok(v);
                }
                Err(f) => f,
            };

            let decision = self.policy.classify(&failure, attempt);
            tracing::info!(
                attempt,
                status = ?failure.status,
                reason = ?decision.reason,
                should_retry = decision.should_retry,
                wait_ms = ?decision.wait_ms,
                "model request failed"
            );

            if decision.delegated {
                let shrunk = self
                    .context_handler
                    .as_ref()
                    .map(|h| h.shrink(&mut request, &failure))
                    .unwrap_or(false);
                if !shrunk {
                    return Err(LlmError::Api(failure));
                }
            } else if !decision.should_retry {
                return Err(LlmError::Api(failure));
            }

            if decision.reason == RetryReason::AuthExpired {
                if reauthenticated {
                    tracing::error!(attempt, "credentials rejected after refresh");
                    return Err(LlmError::Api(failure));
                }
                reauthenticated = true;
            }

            if attempt > self.policy.max_retries() {
                return Err(LlmError::RetriesExhausted {
                    attempts: attempt,
                    last: failure.to_string(),
                });
            }

            let wait = Duration::from_millis(decision.wait_ms.unwrap_or(0));
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(LlmError::Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }
            attempt += 1;
        }
    }
}
