//! # Store Retry Module
//!
//! Retries store operations that fail for transient reasons (pool timeouts,
//! serialization failures, optimistic-concurrency conflicts) using
//! exponential backoff with random jitter.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::config::RecoveryConfig;
use crate::error::Result;

/// Delay before retry number `attempt` (1-based), without jitter
pub fn backoff_delay(config: &RecoveryConfig, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    let delay = config
        .base_retry_delay_ms
        .saturating_mul(1u64 << exponent)
        .min(config.max_retry_delay_ms);
    Duration::from_millis(delay)
}

fn jittered_delay(config: &RecoveryConfig, attempt: u32) -> Duration {
    let base = backoff_delay(config, attempt);
    let jitter_cap = config.base_retry_delay_ms / 2;
    let jitter = if jitter_cap > 0 {
        rand::thread_rng().gen_range(0..=jitter_cap)
    } else {
        0
    };
    (base + Duration::from_millis(jitter)).min(Duration::from_millis(config.max_retry_delay_ms))
}

/// Run `operation`, retrying retryable failures up to `config.max_retries` times
pub async fn with_retry<T, F, Fut>(
    config: &RecoveryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < config.max_retries => {
                attempt += 1;
                let delay = jittered_delay(config, attempt);
                warn!(
                    operation = operation_name,
                    attempt,
                    max_retries = config.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Retrying store operation"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}
