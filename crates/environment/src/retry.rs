//! Bounded retry with exponential backoff.

use linkbandit_core::config::RetryConfig;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry configuration with exponential backoff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay after the first failed attempt, in milliseconds.
    pub base_delay_ms: u64,
    /// Upper bound on a single attempt, in milliseconds.
    pub request_timeout_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 2000,
            request_timeout_ms: 10_000,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay_ms: config.base_delay_ms,
            request_timeout_ms: config.request_timeout_ms,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt `attempt` (1-based):
    /// `base × 2^(attempt − 1)`.
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u64
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u64::MAX);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }

    /// Every wait the policy would perform if all attempts fail.
    pub fn schedule(&self) -> Vec<Duration> {
        (1..self.max_attempts)
            .map(|attempt| self.backoff_for_attempt(attempt))
            .collect()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// All attempts failed; carries the last failure.
#[derive(Debug)]
pub struct RetryExhausted<E> {
    pub attempts: u32,
    pub last_error: E,
}

/// Run `op` until it succeeds or `policy.max_attempts` attempts have failed,
/// sleeping with exponential backoff between attempts. `op` receives the
/// 1-based attempt number.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    mut op: F,
) -> Result<T, RetryExhausted<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        metrics::counter!("reward.attempts").increment(1);
        match op(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) => {
                metrics::counter!("reward.attempt_failures").increment(1);
                if attempt >= max_attempts {
                    warn!(attempt, max_attempts, error = %e, "retry budget exhausted");
                    return Err(RetryExhausted {
                        attempts: attempt,
                        last_error: e,
                    });
                }
                let delay = policy.backoff_for_attempt(attempt);
                warn!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "attempt failed, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    fn assert_close(actual: Duration, expected: Duration) {
        let diff = if actual > expected {
            actual - expected
        } else {
            expected - actual
        };
        assert!(
            diff <= Duration::from_millis(5),
            "expected {expected:?}, got {actual:?}"
        );
    }

    fn policy(max_attempts: u32, base_delay_ms: u64) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay_ms,
            request_timeout_ms: 1000,
        }
    }

    #[test]
    fn test_backoff_doubles() {
        let p = policy(5, 2000);
        assert_eq!(p.backoff_for_attempt(1), Duration::from_secs(2));
        assert_eq!(p.backoff_for_attempt(2), Duration::from_secs(4));
        assert_eq!(p.backoff_for_attempt(3), Duration::from_secs(8));
        assert_eq!(
            p.schedule(),
            vec![
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8),
                Duration::from_secs(16)
            ]
        );
    }

    #[test]
    fn test_backoff_saturates_instead_of_overflowing() {
        let p = policy(100, 1000);
        assert_eq!(p.backoff_for_attempt(90), Duration::from_millis(u64::MAX));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_third_attempt() {
        let p = policy(3, 2000);
        let mut stamps = Vec::new();

        let result = retry_with_backoff(&p, |attempt| {
            stamps.push(Instant::now());
            async move {
                if attempt < 3 {
                    Err(format!("attempt {attempt} refused"))
                } else {
                    Ok(17.5)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 17.5);
        assert_eq!(stamps.len(), 3);
        assert_close(stamps[1] - stamps[0], Duration::from_secs(2));
        assert_close(stamps[2] - stamps[1], Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_exhausts_budget() {
        let p = policy(3, 2000);
        let start = Instant::now();
        let mut calls = 0u32;

        let result: Result<f64, _> = retry_with_backoff(&p, |_| {
            calls += 1;
            async { Err("unreachable") }
        })
        .await;

        let exhausted = result.unwrap_err();
        assert_eq!(exhausted.attempts, 3);
        assert_eq!(exhausted.last_error, "unreachable");
        assert_eq!(calls, 3);
        // 2s + 4s, and no wait after the last attempt.
        assert_close(start.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_attempt_budget_never_sleeps() {
        let p = policy(1, 2000);
        let start = Instant::now();

        let result: Result<(), _> = retry_with_backoff(&p, |_| async { Err("no") }).await;

        assert_eq!(result.unwrap_err().attempts, 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
