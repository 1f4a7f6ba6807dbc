//! Retry policy with exponential backoff
//!
//! The [`RetryPolicy`] is a plain value object: it decides whether a failed
//! attempt may be retried and how long to wait before the next one. The worker
//! pool applies it uniformly at its task-execution boundary, so executors never
//! loop on their own.
//!
//! # Example
//!
//! ```
//! use renderfarm_dl::config::RetryConfig;
//! use renderfarm_dl::retry::RetryPolicy;
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::from(&RetryConfig {
//!     max_attempts: 3,
//!     initial_delay: Duration::from_millis(100),
//!     max_delay: Duration::from_secs(1),
//!     backoff_multiplier: 2.0,
//!     jitter: false,
//! });
//!
//! assert_eq!(policy.backoff(1), Duration::from_millis(100));
//! assert_eq!(policy.backoff(2), Duration::from_millis(200));
//! ```

use crate::config::RetryConfig;
use crate::error::Error;
use rand::Rng;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (connection reset, server error, truncated stream) should return `true`.
/// Permanent failures (bad configuration, unusable path, cancellation) should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            // Any transport failure during a transfer may clear up on the next attempt
            Error::Network(_) => true,
            // Includes 404s: the file host may not have published the output yet
            Error::UnexpectedStatus { .. } => true,
            Error::Io(_) => true,
            Error::TaskPanicked(_) => true,
            Error::Config { .. } => false,
            Error::InvalidPath { .. } => false,
            Error::Serialization(_) => false,
            Error::JobClosed => false,
            Error::Cancelled => false,
            Error::Other(_) => false,
        }
    }
}

/// Decision returned by [`RetryPolicy::evaluate`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-enqueue the task after the given delay
    RetryAfter(Duration),
    /// Give up: the task is permanently failed
    GiveUp,
}

/// Retry policy value object: attempt limit plus backoff function
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
    backoff_multiplier: f64,
    jitter: bool,
}

impl RetryPolicy {
    /// A policy that never retries (one attempt per task)
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            jitter: false,
        }
    }

    /// Total number of attempts allowed per task, first try included
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Backoff delay after the `failed_attempts`-th failure, before jitter
    ///
    /// `initial_delay * multiplier^(failed_attempts - 1)`, capped at `max_delay`.
    pub fn backoff(&self, failed_attempts: u32) -> Duration {
        let exponent = failed_attempts.saturating_sub(1) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs)
    }

    /// Decide what happens after an attempt failed with `error`
    ///
    /// `attempts` is the number of attempts made so far, including the one that just failed.
    pub fn evaluate<E: IsRetryable>(&self, attempts: u32, error: &E) -> RetryDecision {
        if !error.is_retryable() || attempts >= self.max_attempts {
            return RetryDecision::GiveUp;
        }
        let delay = self.backoff(attempts);
        let delay = if self.jitter { add_jitter(delay) } else { delay };
        RetryDecision::RetryAfter(delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_delay: config.initial_delay,
            max_delay: config.max_delay,
            backoff_multiplier: config.backoff_multiplier,
            jitter: config.jitter,
        }
    }
}

/// Add random jitter to a delay to prevent thundering herd
///
/// Jitter is uniformly distributed between 0% and 100% of the delay.
/// This means the actual delay will be between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    let jittered_secs = delay.as_secs_f64() * (1.0 + jitter_factor);
    Duration::from_secs_f64(jittered_secs)
}
