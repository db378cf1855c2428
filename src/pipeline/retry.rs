use std::future::Future;
use std::time::Duration;

use rand::Rng;

/// Backoff strategy between attempts
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum BackoffStrategy {
    /// Same delay before every attempt
    #[default]
    Fixed,
    /// Exponential backoff with jitter: delay = min(base * 2^attempt + jitter, max)
    ExponentialWithJitter { base_ms: u64, max_ms: u64 },
}

/// Delay schedule shared by bounded retries and the unbounded reconnect loop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Backoff {
    pub delay: Duration,
    pub strategy: BackoffStrategy,
}

impl Backoff {
    pub fn fixed(delay: Duration) -> Self {
        Self {
            delay,
            strategy: BackoffStrategy::Fixed,
        }
    }

    pub fn exponential(base_ms: u64, max_ms: u64) -> Self {
        Self {
            delay: Duration::from_millis(base_ms),
            strategy: BackoffStrategy::ExponentialWithJitter { base_ms, max_ms },
        }
    }

    /// Calculate delay for a given attempt number (0-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match &self.strategy {
            BackoffStrategy::Fixed => self.delay,
            BackoffStrategy::ExponentialWithJitter { base_ms, max_ms } => {
                let base = base_ms.saturating_mul(2_u64.saturating_pow(attempt));
                let jitter = random_jitter(base / 2);
                let total = base.saturating_add(jitter).min(*max_ms);
                Duration::from_millis(total)
            }
        }
    }
}

/// Bounded retry configuration
#[derive(Clone, Debug)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3, // 1 initial + 2 retries
            backoff: Backoff::fixed(Duration::from_millis(500)),
        }
    }
}

fn random_jitter(max_jitter: u64) -> u64 {
    if max_jitter == 0 {
        return 0;
    }
    rand::thread_rng().gen_range(0..=max_jitter)
}

/// Trait for errors that may be retryable
pub trait IsRetryable {
    fn is_retryable(&self) -> bool;
}

/// Execute an async operation with retries.
/// Only retries on transient errors (as determined by IsRetryable trait).
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable,
{
    let attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_retryable() && attempt + 1 < attempts => {
                let delay = config.backoff.delay_for_attempt(attempt);
                tracing::debug!(
                    attempt = attempt + 1,
                    max = attempts,
                    delay_ms = delay.as_millis() as u64,
                    "retrying after transient error"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
