use std::future::Future;
use std::time::Duration;

use crate::error::FoundryError;
use crate::metrics::AiResponse;

/// Fixed pause between attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Bounded retry with a fixed delay.
///
/// `max_retries` counts additional attempts beyond the first, so a policy
/// makes at most `max_retries + 1` calls. Only retryable errors (transport
/// failures) consume retries; anything else is returned immediately.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(0)
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            delay: DEFAULT_RETRY_DELAY,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Run `attempt` until it succeeds or retries are exhausted. Each call is
    /// independent; nothing from a failed attempt is reused.
    pub async fn execute<F, Fut>(&self, mut attempt: F) -> Result<AiResponse, FoundryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<AiResponse, FoundryError>>,
    {
        let mut current_attempt: u32 = 0;

        loop {
            match attempt().await {
                Ok(mut response) => {
                    response.retry_count = current_attempt;
                    return Ok(response);
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        attempt = current_attempt + 1,
                        max_retries = self.max_retries,
                        error = %e,
                        "attempt failed"
                    );
                    // Exhausted: the last error is the one surfaced.
                    if current_attempt >= self.max_retries {
                        return Err(e);
                    }
                    current_attempt += 1;
                    tokio::time::sleep(self.delay).await;
                }
            }
        }
    }
}
