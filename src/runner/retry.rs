//! Timeout and retry policy for model calls.
//!
//! Every call is bounded by a timeout. Transient failures (timeouts, rate
//! limits) are retried with exponential backoff; anything else fails at once.

use crate::error::ModelError;
use crate::llm::{ModelBackend, ModelRequest, ModelResponse};
use std::time::Duration;
use tracing::{debug, warn};

/// How a single model call is bounded and retried.
#[derive(Debug, Clone)]
pub struct CallPolicy {
    pub timeout: Duration,
    /// Attempts after the first one.
    pub retries: u32,
    /// Delay before the first retry; doubled for each further one.
    pub backoff: Duration,
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retries: 2,
            backoff: Duration::from_millis(500),
        }
    }
}

impl From<&crate::config::ModelConfig> for CallPolicy {
    fn from(config: &crate::config::ModelConfig) -> Self {
        Self {
            timeout: config.timeout(),
            retries: config.retries,
            backoff: config.backoff(),
        }
    }
}

/// Call the backend under `policy`.
pub async fn call_with_retry(
    backend: &dyn ModelBackend,
    request: &ModelRequest,
    policy: &CallPolicy,
) -> Result<ModelResponse, ModelError> {
    let mut attempt = 0u32;
    let mut backoff = policy.backoff;

    loop {
        attempt += 1;

        let result = match tokio::time::timeout(policy.timeout, backend.call(request)).await {
            Ok(result) => result,
            Err(_) => Err(ModelError::Timeout(policy.timeout.as_secs())),
        };

        match result {
            Ok(response) => {
                if attempt > 1 {
                    debug!(pipeline = %request.kind, attempt, "Model call succeeded after retry");
                }
                return Ok(response);
            }
            Err(err) if err.is_transient() && attempt <= policy.retries => {
                warn!(
                    pipeline = %request.kind,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    "Transient model error, retrying: {}",
                    err
                );
                tokio::time::sleep(backoff).await;
                backoff = backoff.saturating_mul(2);
            }
            Err(err) => {
                if err.is_transient() {
                    warn!(pipeline = %request.kind, attempt, "Model call failed after retries: {}", err);
                }
                return Err(err);
            }
        }
    }
}
