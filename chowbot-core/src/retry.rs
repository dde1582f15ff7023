//! Bounded retry with exponential backoff, shared by every outbound call site.
//!
//! A `RetryPolicy` runs an async operation up to `max_attempts` times, doubling
//! the delay between attempts (base, 2×base, 4×base, ...). Only errors that
//! classify themselves as [`Transient`] are retried; anything else is returned
//! immediately.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio_retry::strategy::ExponentialBackoff;
use tokio_retry::RetryIf;

/// Classifies an error as worth retrying (network blips, 429, 5xx).
pub trait Transient {
    fn is_transient(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay_ms: u64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, 500)
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, base_delay_ms: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay_ms,
            max_delay: Duration::from_secs(10),
        }
    }

    /// Policy with no sleeping between attempts, for tests.
    pub fn immediate(max_attempts: usize) -> Self {
        Self::new(max_attempts, 0)
    }

    /// Delays before each retry. The first attempt is never delayed, so the
    /// sequence has `max_attempts - 1` entries.
    pub fn delays(&self) -> impl Iterator<Item = Duration> {
        // from_millis(2) scaled by the base yields 2*base, 4*base, ...
        // Halving after scaling keeps odd bases exact.
        let max_delay = self.max_delay;
        ExponentialBackoff::from_millis(2)
            .factor(self.base_delay_ms)
            .map(move |d| (d / 2).min(max_delay))
            .take(self.max_attempts.saturating_sub(1))
    }

    /// Run `action` under this policy. `operation` names the call site in logs.
    pub async fn run<T, E, A, Fut>(&self, operation: &'static str, mut action: A) -> Result<T, E>
    where
        A: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Transient + Display,
    {
        let mut attempt = 0usize;
        let max_attempts = self.max_attempts;

        let result = RetryIf::spawn(
            self.delays(),
            || {
                attempt += 1;
                let current = attempt;
                let fut = action();
                async move {
                    match fut.await {
                        Ok(value) => Ok(value),
                        Err(e) => {
                            tracing::warn!(
                                operation,
                                attempt = current,
                                max_attempts,
                                error = %e,
                                "{} attempt {} failed",
                                operation,
                                current
                            );
                            Err(e)
                        }
                    }
                }
            },
            |e: &E| e.is_transient(),
        )
        .await;

        if let Err(ref e) = result {
            if e.is_transient() {
                tracing::error!(operation, attempts = max_attempts, error = %e, "All retry attempts failed");
            }
        }

        result
    }
}
