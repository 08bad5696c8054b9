use std::future::Future;
use std::time::Duration;

use super::types::SandflowError;
use tracing::warn;

/// Retry policy for step invocations: a bounded number of extra attempts
/// separated by a fixed delay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    pub fn none() -> Self {
        Self { max_retries: 0, delay: Duration::ZERO }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay: Duration::from_secs(5),
        }
    }
}

/// Execute an async operation with retry logic.
///
/// Retries only if the error is classified as retryable and the policy's
/// attempt budget is not exhausted. The last error is returned on failure.
pub async fn with_retry<F, Fut, T>(
    operation_name: &str,
    policy: &RetryPolicy,
    mut factory: F,
) -> Result<T, SandflowError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SandflowError>>,
{
    let max_attempts = policy.max_attempts();
    let mut last_error = None;

    for attempt in 0..max_attempts {
        match factory().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                let classification = e.classify();

                if !classification.retryable || attempt + 1 >= max_attempts {
                    if !classification.retryable {
                        warn!(
                            operation = operation_name,
                            error_type = classification.error_type,
                            "Non-retryable error, failing immediately"
                        );
                    } else if max_attempts > 1 {
                        warn!(
                            operation = operation_name,
                            attempt = attempt + 1,
                            max = max_attempts,
                            "Max retries exhausted"
                        );
                    }
                    return Err(e);
                }

                warn!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    max = max_attempts,
                    error_type = classification.error_type,
                    delay_ms = policy.delay.as_millis() as u64,
                    error = %e,
                    "Retrying after error"
                );

                tokio::time::sleep(policy.delay).await;
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| SandflowError::Internal("Retry loop exited unexpectedly".into())))
}
