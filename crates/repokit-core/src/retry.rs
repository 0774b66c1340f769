//! Retry policy for storage calls
//!
//! Storage calls that fail with a transient error (lock contention, pool
//! timeout, I/O hiccup) are re-run with exponential backoff. Everything else
//! propagates on the first failure.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::Result;

/// Default number of retries after the first attempt
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Default delay before the first retry
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default multiplier applied to the delay after each retry
pub const DEFAULT_BACKOFF_FACTOR: u32 = 2;

/// Exponential backoff retry policy keyed on [`crate::Error::is_transient`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Delay multiplier per retry
    pub backoff_factor: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Set the maximum number of retries
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set the delay before the first retry
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set the backoff multiplier
    pub fn backoff_factor(mut self, factor: u32) -> Self {
        self.backoff_factor = factor;
        self
    }

    /// Delay before retry number `retry` (0-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let multiplier = self.backoff_factor.saturating_pow(retry);
        self.base_delay.saturating_mul(multiplier)
    }

    /// Worst-case time spent sleeping if every retry is used
    pub fn total_backoff(&self) -> Duration {
        (0..self.max_retries)
            .map(|retry| self.delay_for(retry))
            .fold(Duration::ZERO, Duration::saturating_add)
    }

    /// Run `op`, re-running it while it fails transiently and retries remain
    ///
    /// The closure is invoked once per attempt so each attempt gets a fresh future.
    pub async fn execute<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut retries = 0;

        loop {
            match op().await {
                Ok(value) => {
                    if retries > 0 {
                        debug!(operation, retries, "Storage call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if e.is_transient() && retries < self.max_retries => {
                    let delay = self.delay_for(retries);
                    retries += 1;
                    warn!(
                        operation,
                        attempt = retries,
                        wait_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient storage failure, retrying after backoff"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
