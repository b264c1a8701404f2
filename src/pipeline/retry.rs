//! Exponential backoff for transient failures.
//!
//! Attempt state is an immutable descriptor passed by value through the
//! retry loop, and the delay sink is an injected closure, so the policy is
//! testable without a clock or real sleeping.

use std::time::Duration;

use rand::Rng;

use crate::config::BackoffSettings;

/// One attempt in a retry sequence. Zero-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attempt {
    pub number: u32,
}

impl Attempt {
    pub fn first() -> Self {
        Self { number: 0 }
    }

    pub fn next(self) -> Self {
        Self {
            number: self.number + 1,
        }
    }
}

/// Exponential backoff: `base × 2^attempt`, multiplicative jitter, capped.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    settings: BackoffSettings,
}

impl BackoffPolicy {
    pub fn new(settings: BackoffSettings) -> Self {
        Self { settings }
    }

    pub fn max_attempts(&self) -> u32 {
        self.settings.max_attempts.max(1)
    }

    pub fn delay_for(&self, attempt: Attempt) -> Duration {
        let exp = self
            .settings
            .base_delay_ms
            .saturating_mul(1u64.checked_shl(attempt.number).unwrap_or(u64::MAX));
        let jitter = 1.0 + rand::thread_rng().gen::<f64>() * self.settings.jitter.clamp(0.0, 1.0);
        let jittered = (exp as f64 * jitter) as u64;
        Duration::from_millis(jittered.min(self.settings.max_delay_ms))
    }
}

/// Run `op` until it succeeds, the error is non-transient, or the attempt
/// budget is spent. Sleeps through `sleep` between transient failures.
pub fn run_with_backoff<T, E>(
    policy: &BackoffPolicy,
    sleep: &dyn Fn(Duration),
    is_transient: impl Fn(&E) -> bool,
    mut op: impl FnMut(Attempt) -> Result<T, E>,
) -> Result<T, E> {
    let mut attempt = Attempt::first();
    loop {
        match op(attempt) {
            Ok(value) => return Ok(value),
            Err(err) => {
                let retries_left = attempt.number + 1 < policy.max_attempts();
                if !is_transient(&err) || !retries_left {
                    return Err(err);
                }
                let delay = policy.delay_for(attempt);
                tracing::debug!(
                    attempt = attempt.number + 1,
                    delay_ms = delay.as_millis() as u64,
                    "Transient failure, backing off"
                );
                sleep(delay);
                attempt = attempt.next();
            }
        }
    }
}
