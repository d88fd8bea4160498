//! Bounded retry with exponential backoff
//!
//! Provides:
//! - A retry policy (attempt budget plus backoff shape)
//! - An async combinator driven by a retryable-error predicate
//!
//! Shared by the ledger token exchange and the export request so the two
//! loops cannot drift apart.

use crate::errors::{AppError, Result};
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Bounded retry policy
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Growth factor applied per attempt
    pub multiplier: f64,
    /// Ceiling on any single delay
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(
        max_attempts: u32,
        initial_delay: Duration,
        multiplier: f64,
        max_delay: Duration,
    ) -> Self {
        Self {
            max_attempts,
            initial_delay,
            multiplier,
            max_delay,
        }
    }

    /// Policy applied to ledger traffic: 3 attempts, 1s base, doubled, capped at 30s.
    pub fn ledger() -> Self {
        Self::new(3, Duration::from_secs(1), 2.0, Duration::from_secs(30))
    }

    fn schedule(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.initial_delay,
            multiplier: self.multiplier,
            max_interval: self.max_delay,
            randomization_factor: 0.0,
            max_elapsed_time: None,
            ..ExponentialBackoff::default()
        }
    }
}

/// Run `op` until it succeeds, the error stops being retryable, or the
/// attempt budget is spent. The last error is returned unchanged.
pub async fn retry_with_policy<T, F, Fut>(
    policy: &RetryPolicy,
    is_retryable: impl Fn(&AppError) -> bool,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut schedule = policy.schedule();
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < policy.max_attempts && is_retryable(&err) => {
                let delay = schedule.next_backoff().unwrap_or(policy.max_delay);
                warn!(
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Retryable failure, backing off"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}
