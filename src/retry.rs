//! Bounded retry with exponential backoff and jitter.
//!
//! Failures are classified by the caller as [`ErrorClass::Transient`] or
//! [`ErrorClass::Fatal`]; only transient failures are re-attempted. The
//! policy itself never logs. Callers that want to surface progress pass an
//! observer to [`RetryPolicy::execute_observed`].

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tokio::time::sleep;

/// Caps the doubling exponent so the shift below cannot overflow.
const MAX_BACKOFF_EXPONENT: u32 = 16;

/// Verdict a classifier returns for a failed attempt.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorClass {
    /// Worth re-attempting after a delay (network blips, throttling).
    Transient,
    /// Retrying cannot help (authorisation failures, invalid input).
    Fatal,
}

/// Implemented by error types that know their own retry class.
///
/// Lets orchestration code retry operations from different subsystems without
/// knowing each error type's failure modes.
pub trait ClassifyError {
    /// Returns the class of this error.
    fn classify(&self) -> ErrorClass;
}

/// Error returned when a retried operation does not succeed.
#[derive(Debug, Error)]
pub enum RetryError<E: std::error::Error + 'static> {
    /// The first failing attempt was classified fatal; no retry happened.
    #[error("operation failed with a non-retryable error: {source}")]
    Fatal {
        /// Underlying error from the single attempt.
        #[source]
        source: E,
    },
    /// Every permitted attempt failed transiently.
    #[error("operation failed after {attempts} attempts: {source}")]
    Exhausted {
        /// Number of attempts performed before giving up.
        attempts: u32,
        /// Underlying error from the final attempt.
        #[source]
        source: E,
    },
}

impl<E: std::error::Error + 'static> RetryError<E> {
    /// Number of attempts that were performed.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        match self {
            Self::Fatal { .. } => 1,
            Self::Exhausted { attempts, .. } => *attempts,
        }
    }

    /// Consumes the wrapper and returns the underlying error.
    #[must_use]
    pub fn into_source(self) -> E {
        match self {
            Self::Fatal { source } | Self::Exhausted { source, .. } => source,
        }
    }
}

/// Bounded exponential backoff policy.
///
/// Delays double per attempt from `initial_delay` up to `max_delay`, with
/// random jitter keeping concurrent runs out of lockstep: the sleep before
/// attempt `n + 1` lands in `[base/2, base]` where `base` is the capped
/// doubled delay for attempt `n`.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

impl RetryPolicy {
    /// Creates a policy permitting `max_attempts` invocations.
    ///
    /// Zero is clamped to one: an operation is always attempted at least
    /// once.
    #[must_use]
    pub const fn new(max_attempts: u32) -> Self {
        let attempts = if max_attempts == 0 { 1 } else { max_attempts };
        Self {
            max_attempts: attempts,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }

    /// Overrides the delay before the first re-attempt.
    #[must_use]
    pub const fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Overrides the ceiling the doubled delay saturates at.
    #[must_use]
    pub const fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Maximum number of invocations this policy permits.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Runs `operation` until it succeeds, fails fatally, or exhausts the
    /// attempt budget.
    ///
    /// # Errors
    ///
    /// Returns [`RetryError::Fatal`] when `classify` deems a failure
    /// non-retryable and [`RetryError::Exhausted`] when the final permitted
    /// attempt fails transiently.
    pub async fn execute<T, E, Op, Fut, C>(&self, operation: Op, classify: C) -> Result<T, RetryError<E>>
    where
        E: std::error::Error + 'static,
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> ErrorClass,
    {
        self.execute_observed(operation, classify, |_, _| {}).await
    }

    /// Like [`Self::execute`], invoking `on_retry(attempt, error)` before
    /// each re-attempt so the caller can report progress.
    ///
    /// # Errors
    ///
    /// See [`Self::execute`].
    pub async fn execute_observed<T, E, Op, Fut, C, O>(
        &self,
        mut operation: Op,
        classify: C,
        mut on_retry: O,
    ) -> Result<T, RetryError<E>>
    where
        E: std::error::Error + 'static,
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> ErrorClass,
        O: FnMut(u32, &E),
    {
        let mut attempt = 1_u32;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => match classify(&error) {
                    ErrorClass::Fatal => return Err(RetryError::Fatal { source: error }),
                    ErrorClass::Transient if attempt >= self.max_attempts => {
                        return Err(RetryError::Exhausted {
                            attempts: attempt,
                            source: error,
                        });
                    }
                    ErrorClass::Transient => {
                        on_retry(attempt, &error);
                        sleep(self.delay_for_attempt(attempt)).await;
                        attempt = attempt.saturating_add(1);
                    }
                },
            }
        }
    }

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
        let base = self
            .initial_delay
            .saturating_mul(1_u32 << exponent)
            .min(self.max_delay);
        let base_ms = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
        let half = base_ms >> 1;
        let jitter = rand::thread_rng().gen_range(0..=half);
        Duration::from_millis(half.saturating_add(jitter))
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    #[derive(Debug, Error)]
    #[error("flaky")]
    struct Flaky;

    fn immediate_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts)
            .with_initial_delay(Duration::ZERO)
            .with_max_delay(Duration::ZERO)
    }

    #[tokio::test]
    async fn transient_failures_consume_the_full_attempt_budget() {
        let calls = Cell::new(0_u32);
        let result: Result<(), RetryError<Flaky>> = immediate_policy(3)
            .execute(
                || {
                    calls.set(calls.get() + 1);
                    async { Err(Flaky) }
                },
                |_| ErrorClass::Transient,
            )
            .await;

        assert_eq!(calls.get(), 3);
        assert!(
            matches!(result, Err(RetryError::Exhausted { attempts: 3, .. })),
            "expected exhaustion after three attempts"
        );
    }

    #[tokio::test]
    async fn fatal_failures_are_not_retried() {
        let calls = Cell::new(0_u32);
        let result: Result<(), RetryError<Flaky>> = immediate_policy(3)
            .execute(
                || {
                    calls.set(calls.get() + 1);
                    async { Err(Flaky) }
                },
                |_| ErrorClass::Fatal,
            )
            .await;

        assert_eq!(calls.get(), 1);
        assert!(matches!(result, Err(RetryError::Fatal { .. })));
    }

    #[tokio::test]
    async fn success_after_transient_failures_returns_the_value() {
        let calls = Cell::new(0_u32);
        let result = immediate_policy(3)
            .execute(
                || {
                    calls.set(calls.get() + 1);
                    let outcome = if calls.get() < 3 { Err(Flaky) } else { Ok(7) };
                    async move { outcome }
                },
                |_| ErrorClass::Transient,
            )
            .await;

        assert_eq!(calls.get(), 3);
        assert!(matches!(result, Ok(7)));
    }

    #[tokio::test]
    async fn observer_sees_each_re_attempt() {
        let mut observed = Vec::new();
        let result: Result<(), RetryError<Flaky>> = immediate_policy(3)
            .execute_observed(
                || async { Err(Flaky) },
                |_| ErrorClass::Transient,
                |attempt, _| observed.push(attempt),
            )
            .await;

        assert!(result.is_err());
        assert_eq!(observed, vec![1, 2]);
    }

    #[test]
    fn zero_attempts_clamp_to_one() {
        assert_eq!(RetryPolicy::new(0).max_attempts(), 1);
    }

    #[test]
    fn delays_double_and_saturate_at_the_ceiling() {
        let policy = RetryPolicy::new(5)
            .with_initial_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(400));

        for (attempt, base_ms) in [(1_u32, 100_u64), (2, 200), (3, 400), (9, 400)] {
            let delay = u64::try_from(policy.delay_for_attempt(attempt).as_millis())
                .unwrap_or(u64::MAX);
            assert!(
                delay >= base_ms >> 1 && delay <= base_ms,
                "attempt {attempt}: delay {delay}ms outside [{}, {base_ms}]",
                base_ms >> 1
            );
        }
    }

    #[test]
    fn retry_error_reports_attempt_counts() {
        let fatal: RetryError<Flaky> = RetryError::Fatal { source: Flaky };
        let exhausted: RetryError<Flaky> = RetryError::Exhausted {
            attempts: 3,
            source: Flaky,
        };

        assert_eq!(fatal.attempts(), 1);
        assert_eq!(exhausted.attempts(), 3);
    }
}
