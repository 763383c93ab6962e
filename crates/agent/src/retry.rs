use std::future::Future;
use std::time::Duration;

use tracing::warn;

const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Bounded exponential backoff: attempt `n` waits `base * 2^n`, capped at 30 seconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Backoff {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Backoff {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self { max_retries, base_delay }
    }

    pub fn none() -> Self {
        Self { max_retries: 0, base_delay: Duration::ZERO }
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(MAX_BACKOFF)
    }

    /// Runs `operation` until it succeeds, fails with a non-retryable error, or retries run out.
    pub async fn retry<T, E, F, Fut>(
        &self,
        operation_name: &'static str,
        is_retryable: impl Fn(&E) -> bool,
        mut operation: F,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(error) if attempt < self.max_retries && is_retryable(&error) => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        event_name = "agent.retry.scheduled",
                        operation = operation_name,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "retrying after transient failure"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}
