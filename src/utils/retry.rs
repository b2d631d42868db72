use std::future::Future;
use std::time::Duration;

use crate::utils::error::AppResult;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(50),
        }
    }
}

/// Re-runs an idempotent read while it fails with a transient store error,
/// doubling the delay after each attempt. Never use this around `append`.
pub async fn retry_read<T, F, Fut>(policy: RetryPolicy, mut op: F) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let attempts = policy.attempts.max(1);
    let mut delay = policy.base_delay;
    let mut attempt = 1;

    loop {
        match op().await {
            Err(e) if e.is_transient() && attempt < attempts => {
                tracing::warn!(
                    "Transient store error on attempt {}/{}: {}",
                    attempt,
                    attempts,
                    e
                );
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2);
                attempt += 1;
            }
            result => return result,
        }
    }
}
