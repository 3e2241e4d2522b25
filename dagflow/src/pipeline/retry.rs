//! Retry policies with configurable backoff and jitter.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Backoff strategy for retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// delay = base * 2^(retry - 1)
    #[default]
    Exponential,
    /// delay = base * retry
    Linear,
    /// delay = base
    Constant,
}

/// Jitter applied on top of the backoff delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// No jitter.
    None,
    /// Adds up to a quarter of the delay.
    #[default]
    Bounded,
    /// Random from 0 to delay.
    Full,
    /// Half fixed, half random.
    Equal,
    /// min(max, random(base, prev * 3))
    Decorrelated,
}

fn default_max_attempts() -> u32 {
    1
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

/// How often and how patiently a node is retried.
///
/// `max_attempts` counts the first attempt, so the default of 1 means no
/// retries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum attempts, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base delay between attempts in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Maximum delay cap in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Backoff strategy.
    #[serde(default)]
    pub backoff: BackoffStrategy,
    /// Jitter strategy.
    #[serde(default)]
    pub jitter: JitterStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff: BackoffStrategy::default(),
            jitter: JitterStrategy::default(),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// A policy allowing `max_attempts` attempts in total.
    #[must_use]
    pub fn attempts(max_attempts: u32) -> Self {
        Self::default().with_max_attempts(max_attempts)
    }

    /// Sets the maximum attempts (at least one).
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub const fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub const fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Sets the backoff strategy.
    #[must_use]
    pub const fn with_backoff(mut self, strategy: BackoffStrategy) -> Self {
        self.backoff = strategy;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub const fn with_jitter(mut self, strategy: JitterStrategy) -> Self {
        self.jitter = strategy;
        self
    }

    /// Backoff delay before retry number `retry` (1-based), before jitter.
    #[must_use]
    pub fn backoff_delay_ms(&self, retry: u32) -> u64 {
        let base = self.base_delay_ms;
        let delay = match self.backoff {
            BackoffStrategy::Exponential => {
                base.saturating_mul(2u64.saturating_pow(retry.saturating_sub(1)))
            }
            BackoffStrategy::Linear => base.saturating_mul(u64::from(retry.max(1))),
            BackoffStrategy::Constant => base,
        };
        delay.min(self.max_delay_ms)
    }
}

/// Per-operation retry bookkeeping.
#[derive(Debug, Default)]
pub struct RetryState {
    /// Attempts made so far.
    pub attempts: u32,
    previous_delay_ms: Option<u64>,
}

impl RetryState {
    /// Creates a new retry state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if no attempts remain.
    #[must_use]
    pub const fn is_exhausted(&self, policy: &RetryPolicy) -> bool {
        self.attempts >= policy.max_attempts
    }

    /// Delay before the next attempt, jitter applied.
    #[must_use]
    pub fn next_delay(&mut self, policy: &RetryPolicy) -> Duration {
        let delay = policy.backoff_delay_ms(self.attempts.max(1));
        let mut rng = rand::thread_rng();

        let jittered = match policy.jitter {
            JitterStrategy::None => delay,
            JitterStrategy::Bounded => delay.saturating_add(rng.gen_range(0..=delay / 4)),
            JitterStrategy::Full => rng.gen_range(0..=delay),
            JitterStrategy::Equal => {
                let half = delay / 2;
                half + rng.gen_range(0..=half)
            }
            JitterStrategy::Decorrelated => {
                let base = policy.base_delay_ms;
                let prev = self.previous_delay_ms.unwrap_or(base);
                let upper = prev.saturating_mul(3).min(policy.max_delay_ms);
                if upper <= base {
                    base
                } else {
                    rng.gen_range(base..=upper)
                }
            }
        };

        self.previous_delay_ms = Some(jittered);
        Duration::from_millis(jittered)
    }
}

/// Runs `operation` until it succeeds, the error is not retryable, or the
/// policy's attempts are used up.
///
/// `operation` receives the 1-based attempt number. `on_retry` is called with
/// the failed attempt number, its error and the delay before each retry.
pub async fn with_retry<T, E, F, Fut, R, N>(
    policy: &RetryPolicy,
    mut operation: F,
    should_retry: R,
    mut on_retry: N,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    N: FnMut(u32, &E, Duration),
{
    let mut state = RetryState::new();

    loop {
        state.attempts += 1;
        match operation(state.attempts).await {
            Ok(value) => return Ok(value),
            Err(e) if !state.is_exhausted(policy) && should_retry(&e) => {
                let delay = state.next_delay(policy);
                on_retry(state.attempts, &e, delay);
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
