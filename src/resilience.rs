//! Deadline and retry wrapper applied around every adapter call.
//!
//! The layer knows nothing about verbs or providers: it drives a closure that
//! performs one attempt, and decides from the returned [`Failure`] whether to
//! wait and try again. All retry state lives on the stack of one
//! [`with_resilience`] call.

use crate::failure::Failure;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Retry and deadline settings for one invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ResiliencePolicy {
    /// Overall budget measured from the first attempt.
    pub deadline: Duration,
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles for each further one.
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Extra random delay as a fraction of the computed backoff (0.0 to 1.0).
    pub jitter: f64,
}

impl Default for ResiliencePolicy {
    fn default() -> Self {
        Self {
            deadline: Duration::from_millis(crate::config::DEFAULT_TIMEOUT_MS),
            max_attempts: crate::config::DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: 0.25,
        }
    }
}

impl ResiliencePolicy {
    /// Exponential backoff for the wait after failed attempt number `attempt`
    /// (1-based), before jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Delay before the next attempt. A server-provided hint wins over the
    /// computed backoff and is used as-is.
    fn delay_after(&self, attempt: u32, failure: &Failure) -> Duration {
        if let Some(hint) = failure.retry_after {
            return hint;
        }
        let backoff = self.backoff(attempt);
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 || backoff.is_zero() {
            return backoff;
        }
        let extra = rand::thread_rng().gen_range(0.0..=jitter);
        backoff + backoff.mul_f64(extra)
    }
}

/// Successful result plus the number of attempts it took.
#[derive(Debug, Clone, PartialEq)]
pub struct Attempted<T> {
    pub value: T,
    pub attempts: u32,
}

/// Runs `call` until it succeeds, fails with a non-retryable failure, runs
/// out of attempts, or the deadline expires.
///
/// `call` receives the 1-based attempt number. When the deadline fires the
/// in-flight attempt is dropped and a retryable TIMEOUT failure is returned.
/// Otherwise the last failure is returned unchanged apart from `attempts`.
pub async fn with_resilience<T, F, Fut>(
    policy: &ResiliencePolicy,
    mut call: F,
) -> Result<Attempted<T>, Failure>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, Failure>>,
{
    let deadline = Instant::now() + policy.deadline;
    let max_attempts = policy.max_attempts.max(1);
    let mut attempts = 0u32;

    let outcome = tokio::time::timeout_at(deadline, async {
        loop {
            attempts += 1;
            let failure = match call(attempts).await {
                Ok(value) => return Ok(value),
                Err(failure) => failure,
            };

            if !failure.retryable {
                debug!(attempt = attempts, code = %failure.code, "Not retrying");
                return Err(failure);
            }
            if attempts >= max_attempts {
                warn!(attempts, code = %failure.code, "Giving up after exhausting retries");
                return Err(failure);
            }

            let delay = policy.delay_after(attempts, &failure);
            let remaining = deadline.saturating_duration_since(Instant::now());
            if delay >= remaining {
                warn!(
                    attempt = attempts,
                    delay_ms = delay.as_millis() as u64,
                    remaining_ms = remaining.as_millis() as u64,
                    "Next retry would overrun the deadline, giving up"
                );
                return Err(failure);
            }

            warn!(
                attempt = attempts,
                code = %failure.code,
                delay_ms = delay.as_millis() as u64,
                "Attempt failed, retrying: {}",
                failure.message
            );
            tokio::time::sleep(delay).await;
        }
    })
    .await;

    match outcome {
        Ok(Ok(value)) => Ok(Attempted { value, attempts }),
        Ok(Err(failure)) => Err(failure.with_attempts(attempts)),
        Err(_elapsed) => {
            warn!(attempts, deadline_ms = policy.deadline.as_millis() as u64, "Deadline expired");
            Err(Failure::timeout(format!(
                "Request timed out after {}ms",
                policy.deadline.as_millis()
            ))
            .with_remediation("Increase PERPLEXITY_TIMEOUT_MS or try again")
            .with_attempts(attempts))
        }
    }
}
