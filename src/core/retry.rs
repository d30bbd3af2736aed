//! Exponential backoff around one scrape attempt.
//!
//! Authentication and driver failures are fatal and surface immediately.
//! Timeouts, navigation failures and extraction misses are retried up to
//! `max_attempts` with `base * 2^(attempt - 1)` plus jitter, capped at
//! `max_delay`. Both the attempt and the backoff sleep race the shutdown
//! signal so a stop never waits on either.

use std::future::Future;
use std::time::Duration;

use crate::core::shutdown::ShutdownSignal;
use crate::error::WatchError;
use crate::storage::config::RetryConfig;

/// Whether a failure is worth another attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Retryable,
    Fatal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound of the random extra delay, as a fraction of the computed delay.
    pub jitter_ratio: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            jitter_ratio: 0.25,
        }
    }
}

/// Successful value and the attempt that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Retried<T> {
    pub value: T,
    pub attempts: u32,
}

/// Terminal failure after retries (or a fatal first error).
#[derive(Debug)]
pub struct RetryFailure {
    pub error: WatchError,
    pub attempts: u32,
}

impl RetryPolicy {
    #[must_use]
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter_ratio: config.jitter_ratio.clamp(0.0, 1.0),
        }
    }

    #[must_use]
    pub const fn classify(error: &WatchError) -> Classification {
        if error.is_retryable() {
            Classification::Retryable
        } else {
            Classification::Fatal
        }
    }

    /// Backoff before attempt `attempt + 1`, without jitter.
    #[must_use]
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    /// Backoff with random jitter in `[0, jitter_ratio * delay]`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = self.base_delay_for(attempt);
        let jitter = delay.mul_f64(self.jitter_ratio * rand::random::<f64>());
        delay.saturating_add(jitter)
    }

    /// Run `attempt_fn` until it succeeds, fails fatally or attempts run out.
    ///
    /// `attempt_fn` receives the 1-based attempt number.
    ///
    /// # Errors
    /// The last observed error together with the number of attempts made.
    /// Shutdown yields `WatchError::Cancelled`.
    pub async fn run_with_retry<T, F, Fut>(
        &self,
        shutdown: &mut ShutdownSignal,
        mut attempt_fn: F,
    ) -> Result<Retried<T>, RetryFailure>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = crate::error::Result<T>>,
    {
        let mut attempt = 1;
        loop {
            let result = tokio::select! {
                biased;
                () = shutdown.cancelled() => Err(WatchError::Cancelled),
                result = attempt_fn(attempt) => result,
            };

            let error = match result {
                Ok(value) => {
                    return Ok(Retried {
                        value,
                        attempts: attempt,
                    });
                }
                Err(error) => error,
            };

            if matches!(error, WatchError::Cancelled) {
                return Err(RetryFailure {
                    error,
                    attempts: attempt,
                });
            }

            if Self::classify(&error) == Classification::Fatal {
                tracing::warn!(attempt, kind = %error.kind(), error = %error, "Fatal error, not retrying");
                return Err(RetryFailure {
                    error,
                    attempts: attempt,
                });
            }

            if attempt >= self.max_attempts {
                tracing::warn!(attempts = attempt, kind = %error.kind(), error = %error, "Retries exhausted");
                return Err(RetryFailure {
                    error,
                    attempts: attempt,
                });
            }

            let delay = self.delay_for(attempt);
            #[allow(clippy::cast_possible_truncation)]
            let delay_ms = delay.as_millis() as u64;
            tracing::info!(attempt, delay_ms, kind = %error.kind(), error = %error, "Attempt failed, backing off");

            tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    return Err(RetryFailure {
                        error: WatchError::Cancelled,
                        attempts: attempt,
                    });
                }
                () = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}
