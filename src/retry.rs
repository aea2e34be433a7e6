//! Retrying writes that lost an optimistic-concurrency race
//!
//! A registry write is conditioned on the revision it loaded. When another
//! writer commits first the store answers with a conflict, and the whole
//! load/mutate/store cycle runs again. [`with_retry`] drives that cycle; the
//! error type decides which failures are lost races.

use std::collections::hash_map::RandomState;
use std::future::Future;
use std::hash::{BuildHasher, Hasher};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// How hard to retry a conflicting write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Total attempts, the first one included
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles after each further conflict
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Spread delays over `[delay / 2, delay]` so racing writers drift apart
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::for_store_conflicts()
    }
}

impl RetryConfig {
    /// Policy for the instance registry.
    ///
    /// A conflict clears as soon as the competing writer commits, so delays
    /// start at a couple of milliseconds and the attempt budget is generous.
    pub fn for_store_conflicts() -> Self {
        Self {
            max_attempts: 32,
            base_delay: Duration::from_millis(2),
            max_delay: Duration::from_millis(250),
            jitter: true,
        }
    }

    /// Delay after the `conflicts`-th lost race (1-based)
    pub fn delay_after(&self, conflicts: u32) -> Duration {
        let doublings = conflicts.saturating_sub(1).min(20);
        let delay = self
            .base_delay
            .saturating_mul(1 << doublings)
            .min(self.max_delay);
        if !self.jitter {
            return delay;
        }
        let half = delay / 2;
        half + half.mul_f64(unit_random())
    }
}

/// A value in `[0, 1)` from the std per-process hasher seed
fn unit_random() -> f64 {
    let mut hasher = RandomState::new().build_hasher();
    hasher.write_u32(std::process::id());
    (hasher.finish() >> 11) as f64 / (1u64 << 53) as f64
}

/// Errors that can tell a lost race from a real failure
pub trait RetryableError {
    fn is_conflict(&self) -> bool;
}

/// Run `operation` until it succeeds, fails with a non-conflict error, or
/// runs out of attempts. The last error is returned as is.
pub async fn with_retry<F, Fut, T, E>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: RetryableError + std::fmt::Display,
{
    let mut conflicts = 0;
    loop {
        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };
        if !err.is_conflict() {
            return Err(err);
        }

        conflicts += 1;
        if conflicts >= config.max_attempts {
            warn!(operation = operation_name, attempts = conflicts, error = %err, "Giving up after repeated conflicts");
            return Err(err);
        }

        let delay = config.delay_after(conflicts);
        debug!(
            operation = operation_name,
            conflicts,
            delay_ms = delay.as_millis() as u64,
            "Write conflicted, retrying"
        );
        sleep(delay).await;
    }
}
