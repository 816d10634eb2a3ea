//! Exponential-backoff retry helper shared by every output plugin and by
//! the chain-sync input's reconnect logic.
//!
//! Grounded on `modules/mithril_snapshot_fetcher/src/mithril_snapshot_fetcher.rs`'s
//! doubling-delay download retry loop (`delay = (delay * 2).min(60)`),
//! generalized into a reusable helper with a configurable cap and
//! multiplier.

use std::future::Future;
use std::time::Duration;

/// Retry policy: spec's output-stage default is 3 attempts, 1 s initial
/// delay, 30 s cap, doubling each attempt.
#[derive(Debug, Clone, Copy)]
pub struct BackoffConfig {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2,
        }
    }
}

/// Run `op` until it succeeds or `config.max_attempts` is exhausted,
/// sleeping `config.initial_delay * multiplier^attempt` (capped) between
/// tries. Returns the last error on exhaustion.
pub async fn retry_with_backoff<F, Fut, T, E>(config: &BackoffConfig, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut delay = config.initial_delay;
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if attempt >= config.max_attempts {
                    return Err(error);
                }
                tokio::time::sleep(delay).await;
                delay = (delay * config.multiplier).min(config.max_delay);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_without_retry_when_first_attempt_works() {
        let attempts = AtomicU32::new(0);
        let config = BackoffConfig { initial_delay: Duration::from_millis(1), ..Default::default() };
        let result: Result<u32, &str> = retry_with_backoff(&config, || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Ok(42)
        })
        .await;
        assert_eq!(result, Ok(42));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausts_attempts_and_returns_last_error() {
        let attempts = AtomicU32::new(0);
        let config = BackoffConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            multiplier: 2,
        };
        let result: Result<u32, &str> = retry_with_backoff(&config, || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err("still failing")
        })
        .await;
        assert_eq!(result, Err("still failing"));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
