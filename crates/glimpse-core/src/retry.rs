//! Retry coordinator
//!
//! Wraps sampler calls with bounded exponential backoff and jitter. Only
//! transient failure kinds are retried; permanent ones surface immediately.
//! Cancellation is observed while a call is in flight and while waiting
//! between calls.

use crate::error::{classify, BackendError, GlimpseError, GlimpseResult, RetryError};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Backoff parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total calls allowed, including the first
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay_ms: u64,
    /// Ceiling on the un-jittered delay
    pub max_delay_ms: u64,
    /// Maximum extra fraction added by jitter (0.5 = up to 50% longer)
    pub jitter_ceiling: f64,
    /// Deadline for a single sampler call
    pub call_timeout_ms: u64,
}

impl RetryPolicy {
    /// With attempt budget
    #[inline]
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// With base and max delay
    #[inline]
    #[must_use]
    pub fn with_delays(mut self, base: Duration, max: Duration) -> Self {
        self.base_delay_ms = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
        self.max_delay_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// With jitter ceiling
    #[inline]
    #[must_use]
    pub fn with_jitter_ceiling(mut self, jitter_ceiling: f64) -> Self {
        self.jitter_ceiling = jitter_ceiling;
        self
    }

    /// Base delay as a duration
    #[inline]
    #[must_use]
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// Max delay as a duration
    #[inline]
    #[must_use]
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Single-call deadline as a duration
    #[inline]
    #[must_use]
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Check bounds
    ///
    /// # Errors
    /// - `GlimpseError::InvalidConfig` on zero attempts, inverted delays, a
    ///   jitter ceiling outside `[0, 1]`, or a zero call timeout
    pub fn validate(&self) -> GlimpseResult<()> {
        if self.max_attempts == 0 {
            return Err(GlimpseError::InvalidConfig("retry max_attempts must be at least 1".into()));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(GlimpseError::InvalidConfig(format!(
                "retry base_delay_ms ({}) exceeds max_delay_ms ({})",
                self.base_delay_ms, self.max_delay_ms
            )));
        }
        if !(0.0..=1.0).contains(&self.jitter_ceiling) {
            return Err(GlimpseError::InvalidConfig(format!(
                "retry jitter_ceiling must be within [0, 1], got {}",
                self.jitter_ceiling
            )));
        }
        if self.call_timeout_ms == 0 {
            return Err(GlimpseError::InvalidConfig("retry call_timeout_ms must be positive".into()));
        }
        Ok(())
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
            jitter_ceiling: 0.5,
            call_timeout_ms: 30_000,
        }
    }
}

/// Un-jittered wait before retry `retry` (0-indexed): `min(max, base * 2^retry)`
#[must_use]
pub fn backoff_delay(retry: u32, base: Duration, max: Duration) -> Duration {
    2u32.checked_pow(retry)
        .and_then(|factor| base.checked_mul(factor))
        .map_or(max, |delay| delay.min(max))
}

/// Jittered wait before retry `retry`, within `[capped, capped * (1 + ceiling)]`
#[must_use]
pub fn jittered_delay<R: Rng + ?Sized>(retry: u32, policy: &RetryPolicy, rng: &mut R) -> Duration {
    let capped = backoff_delay(retry, policy.base_delay(), policy.max_delay());
    let ceiling = policy.jitter_ceiling.clamp(0.0, 1.0);
    if ceiling == 0.0 {
        return capped;
    }
    capped.mul_f64(rng.random_range(1.0..=1.0 + ceiling))
}

/// Runs fallible operations under a [`RetryPolicy`]
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryCoordinator {
    policy: RetryPolicy,
}

impl RetryCoordinator {
    /// Create coordinator for a policy
    #[inline]
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Policy in use
    #[inline]
    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Call `operation` until it succeeds, fails permanently, or the budget
    /// runs out
    ///
    /// `operation` receives the 1-based call number. Each call is bounded by
    /// the policy's call timeout, which counts as a transient `Timeout`.
    ///
    /// # Errors
    /// - `RetryError::Failed` with the last classified failure
    /// - `RetryError::Cancelled` once `cancel` fires; late results are dropped
    pub async fn call_with_backoff<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> Result<T, RetryError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(RetryError::Cancelled { attempts: attempt });
            }
            attempt += 1;

            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(RetryError::Cancelled { attempts: attempt }),
                outcome = tokio::time::timeout(self.policy.call_timeout(), operation(attempt)) => {
                    outcome.unwrap_or(Err(BackendError::Timeout))
                }
            };

            let error = match outcome {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            let kind = classify(&error);
            if !kind.is_transient() {
                tracing::debug!(attempt, %kind, "permanent sampler failure, not retrying");
                return Err(RetryError::Failed {
                    kind,
                    attempts: attempt,
                    message: error.to_string(),
                });
            }
            if attempt >= max_attempts {
                tracing::warn!(attempt, %kind, "sampler retries exhausted");
                return Err(RetryError::Failed {
                    kind,
                    attempts: attempt,
                    message: error.to_string(),
                });
            }

            let delay = jittered_delay(attempt - 1, &self.policy, &mut rand::rng());
            metrics::counter!("glimpse_sample_retries_total").increment(1);
            tracing::debug!(attempt, %kind, ?delay, "backing off before retry");

            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(RetryError::Cancelled { attempts: attempt }),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::default().with_delays(Duration::from_millis(10), Duration::from_millis(1_000))
    }

    #[test]
    fn backoff_doubles_then_caps() {
        let base = Duration::from_secs(1);
        let max = Duration::from_secs(60);
        assert_eq!(backoff_delay(0, base, max), Duration::from_secs(1));
        assert_eq!(backoff_delay(1, base, max), Duration::from_secs(2));
        assert_eq!(backoff_delay(4, base, max), Duration::from_secs(16));
        assert_eq!(backoff_delay(6, base, max), Duration::from_secs(60));
        assert_eq!(backoff_delay(40, base, max), Duration::from_secs(60));
    }

    #[test]
    fn zero_jitter_is_deterministic() {
        let policy = RetryPolicy::default().with_jitter_ceiling(0.0);
        let delay = jittered_delay(2, &policy, &mut rand::rng());
        assert_eq!(delay, Duration::from_secs(4));
    }

    #[test]
    fn policy_validation() {
        assert!(RetryPolicy::default().validate().is_ok());
        assert!(RetryPolicy::default().with_max_attempts(0).validate().is_err());
        assert!(RetryPolicy::default().with_jitter_ceiling(1.5).validate().is_err());
        assert!(RetryPolicy::default()
            .with_delays(Duration::from_secs(10), Duration::from_secs(1))
            .validate()
            .is_err());
    }

    proptest! {
        #[test]
        fn jittered_delay_stays_within_bounds(retry in 0u32..64) {
            let policy = RetryPolicy::default()
                .with_max_attempts(5)
                .with_delays(Duration::from_secs(1), Duration::from_secs(60));
            let delay = jittered_delay(retry, &policy, &mut rand::rng());
            let floor = backoff_delay(retry, policy.base_delay(), policy.max_delay());
            let ceiling = Duration::from_secs(60).mul_f64(1.0 + policy.jitter_ceiling);
            prop_assert!(delay >= floor);
            prop_assert!(delay <= ceiling);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_failures_until_success() {
        let coordinator = RetryCoordinator::new(fast_policy());
        let calls = Arc::new(AtomicU32::new(0));
        let started = tokio::time::Instant::now();

        let counter = calls.clone();
        let result = coordinator
            .call_with_backoff(&CancellationToken::new(), move |_| {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n <= 3 {
                        Err(BackendError::status(429, "slow down"))
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result, Ok("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        // 10 + 20 + 40 ms of backoff, up to 50% jitter each
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(70));
        assert!(elapsed <= Duration::from_millis(106));
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_failures_are_not_retried() {
        let coordinator = RetryCoordinator::new(fast_policy());
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let result: Result<(), _> = coordinator
            .call_with_backoff(&CancellationToken::new(), move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(BackendError::status(401, "expired")) }
            })
            .await;

        assert_eq!(result.unwrap_err().kind(), Some(FailureKind::Authentication));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausting_attempts_returns_last_failure() {
        let coordinator = RetryCoordinator::new(fast_policy().with_max_attempts(3));

        let result: Result<(), _> = coordinator
            .call_with_backoff(&CancellationToken::new(), |_| async {
                Err(BackendError::status(503, "down"))
            })
            .await;

        match result {
            Err(RetryError::Failed { kind, attempts, .. }) => {
                assert_eq!(kind, FailureKind::TransientServer);
                assert_eq!(attempts, 3);
            }
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_calls_time_out_as_transient() {
        let policy = RetryPolicy {
            call_timeout_ms: 50,
            ..fast_policy().with_max_attempts(2)
        };
        let coordinator = RetryCoordinator::new(policy);

        let result: Result<(), _> = coordinator
            .call_with_backoff(&CancellationToken::new(), |_| async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            })
            .await;

        assert_eq!(result.unwrap_err().kind(), Some(FailureKind::Timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_abandons_pending_retries() {
        let coordinator = RetryCoordinator::new(
            RetryPolicy::default().with_delays(Duration::from_secs(5), Duration::from_secs(60)),
        );
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let counter = calls.clone();
        let result: Result<(), _> = coordinator
            .call_with_backoff(&cancel, move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(BackendError::status(500, "boom")) }
            })
            .await;

        assert!(matches!(result, Err(RetryError::Cancelled { attempts: 1 })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
