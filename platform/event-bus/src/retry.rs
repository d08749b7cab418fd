//! Exponential backoff shared by stream provisioning, broker reconnects and
//! outbox republish scheduling.

use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first)
    pub max_attempts: u32,
    /// Initial backoff duration (doubles on each retry)
    pub initial_backoff: Duration,
    /// Maximum backoff duration to cap exponential growth
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `retry` (0-based): `initial * 2^retry`, capped
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.min(31));
        self.initial_backoff
            .checked_mul(factor)
            .map_or(self.max_backoff, |d| d.min(self.max_backoff))
    }
}

/// Run `operation` until it succeeds or `config.max_attempts` is used up
///
/// Sleeps `backoff_for(n)` between attempts. The last error is returned
/// unchanged; `context` only labels the log lines.
pub async fn retry_with_backoff<F, Fut, T, E>(
    operation: F,
    config: &RetryConfig,
    context: &str,
) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display + Send,
{
    let max_attempts = config.max_attempts.max(1);
    let mut retry = 0;

    loop {
        let error = match operation().await {
            Ok(value) => {
                if retry > 0 {
                    debug!(context = %context, retries = retry, "Recovered after retry");
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        if retry + 1 >= max_attempts {
            warn!(
                context = %context,
                attempts = retry + 1,
                error = %error,
                "Giving up"
            );
            return Err(error);
        }

        let delay = config.backoff_for(retry);
        warn!(
            context = %context,
            attempt = retry + 1,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Attempt failed, backing off"
        );
        sleep(delay).await;
        retry += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn flaky(calls: &AtomicU32, succeed_on: u32) -> Result<u32, String> {
        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
        if n >= succeed_on {
            Ok(n)
        } else {
            Err(format!("stream unavailable (call {})", n))
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = RetryConfig {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(1),
        };

        let delays: Vec<Duration> = (0..4).map(|r| config.backoff_for(r)).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(250),
                Duration::from_millis(500),
                Duration::from_secs(1),
                Duration::from_secs(1),
            ]
        );
        assert_eq!(config.backoff_for(u32::MAX), Duration::from_secs(1));
    }

    #[test]
    fn test_zero_initial_backoff_means_immediate() {
        let config = RetryConfig {
            initial_backoff: Duration::ZERO,
            ..Default::default()
        };
        assert_eq!(config.backoff_for(12), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_before_budget_runs_out() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let config = RetryConfig::default();

        let result = retry_with_backoff(move || async move { flaky(calls, 3) }, &config, "ensure_stream").await;

        assert_eq!(result, Ok(3));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_last_error_after_budget() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let config = RetryConfig {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
        };
        let started = tokio::time::Instant::now();

        let result =
            retry_with_backoff(move || async move { flaky(calls, u32::MAX) }, &config, "ensure_stream").await;

        assert_eq!(result, Err("stream unavailable (call 3)".to_string()));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        // Slept 1s then 2s
        assert_eq!(started.elapsed().as_secs(), 3);
    }

    #[tokio::test]
    async fn test_zero_attempts_still_runs_once() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let config = RetryConfig {
            max_attempts: 0,
            ..Default::default()
        };

        let result = retry_with_backoff(move || async move { flaky(calls, 5) }, &config, "noop").await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
