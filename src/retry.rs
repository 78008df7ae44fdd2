//! Transport-level retry policy with jittered backoff.

use rand::Rng;
use std::time::Duration;

/// Backoff policy for [`ReqwestTransport`](crate::transport::ReqwestTransport).
///
/// Only connection failures and timeouts of GET and DELETE requests are
/// retried. Writes are never replayed, and HTTP error statuses are always
/// handed straight back to the caller.
#[derive(Clone, Debug)]
pub struct RetryConfig {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
    pub max_retries: u32,
    pub jitter: JitterMode,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            multiplier: 2.0,
            max_retries: 3,
            jitter: JitterMode::Full,
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_initial_backoff(mut self, delay: Duration) -> Self {
        self.initial_backoff = delay;
        self
    }

    pub fn with_max_backoff(mut self, delay: Duration) -> Self {
        self.max_backoff = delay;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_jitter(mut self, jitter: JitterMode) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before retry number `attempt` (0-based), given the previous delay.
    pub fn next_backoff(&self, attempt: u32, previous: Duration) -> Duration {
        let base = if attempt == 0 {
            self.initial_backoff
        } else {
            let grown = previous.as_secs_f64() * self.multiplier;
            Duration::from_secs_f64(grown.min(self.max_backoff.as_secs_f64()))
        };

        self.jitter.apply(base)
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

/// How much randomness to add to a backoff delay.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum JitterMode {
    /// Exact backoff delay
    None,
    /// Anywhere between zero and the delay
    #[default]
    Full,
    /// Half fixed, half random
    Equal,
}

impl JitterMode {
    fn apply(&self, delay: Duration) -> Duration {
        let secs = delay.as_secs_f64();
        match self {
            JitterMode::None => delay,
            JitterMode::Full => Duration::from_secs_f64(rand::thread_rng().gen::<f64>() * secs),
            JitterMode::Equal => {
                let half = secs / 2.0;
                Duration::from_secs_f64(half + rand::thread_rng().gen::<f64>() * half)
            }
        }
    }
}
