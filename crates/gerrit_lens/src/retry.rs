//! Backoff for the background SSH work: probing whether `stream-events` is
//! available, and reconnecting the event stream after it drops.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBackoff, ExponentialBuilder, Retryable};

/// First reconnect delay in milliseconds.
pub const INITIAL_BACKOFF_MS: u64 = 1_000;

/// Reconnect delay ceiling in milliseconds.
pub const MAX_BACKOFF_MS: u64 = 60_000;

/// Consecutive failed connections before giving up.
pub const DEFAULT_MAX_RETRIES: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub max_retries: usize,
    pub with_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(INITIAL_BACKOFF_MS),
            Duration::from_millis(MAX_BACKOFF_MS),
            DEFAULT_MAX_RETRIES,
        )
    }
}

impl RetryConfig {
    #[must_use]
    pub fn new(min_delay: Duration, max_delay: Duration, max_retries: usize) -> Self {
        Self {
            min_delay,
            max_delay,
            max_retries,
            with_jitter: true,
        }
    }

    /// Exactly one retry after `delay`.
    #[must_use]
    pub fn once(delay: Duration) -> Self {
        Self::new(delay, delay, 1).with_jitter(false)
    }

    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.with_jitter = jitter;
        self
    }

    fn builder(&self) -> ExponentialBuilder {
        let builder = ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_retries);
        if self.with_jitter {
            builder.with_jitter()
        } else {
            builder
        }
    }

    /// The successive delays, one per allowed retry.
    #[must_use]
    pub fn delays(&self) -> ExponentialBackoff {
        self.builder().build()
    }
}

/// Run `operation`, retrying every failure as `config` allows.
pub async fn retry<T, E, F, Fut>(label: &str, config: &RetryConfig, operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    operation
        .retry(config.builder())
        .notify(|err: &E, delay: Duration| {
            tracing::debug!(label, retry_in = ?delay, error = %err, "retrying");
        })
        .await
}

/// Delay schedule for a connection that is re-established after it drops.
///
/// The schedule restarts whenever a connection proved useful, so only
/// consecutive failures count against the retry limit.
pub struct Reconnect {
    config: RetryConfig,
    delays: ExponentialBackoff,
}

impl Reconnect {
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        let delays = config.delays();
        Self { config, delays }
    }

    /// Forget earlier failures.
    pub fn reset(&mut self) {
        self.delays = self.config.delays();
    }

    /// Delay before the next attempt, or `None` once retries are used up.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.delays.next()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn test_delays_double_up_to_the_ceiling() {
        let config = RetryConfig::new(ms(10), ms(25), 3).with_jitter(false);
        let delays: Vec<Duration> = config.delays().collect();
        assert_eq!(delays, vec![ms(10), ms(20), ms(25)]);
    }

    #[test]
    fn test_once_allows_a_single_fixed_delay() {
        let delays: Vec<Duration> = RetryConfig::once(ms(2_000)).delays().collect();
        assert_eq!(delays, vec![ms(2_000)]);
    }

    #[test]
    fn test_reconnect_reset_restarts_the_schedule() {
        let mut reconnect = Reconnect::new(RetryConfig::new(ms(5), ms(50), 2).with_jitter(false));
        assert_eq!(reconnect.next_delay(), Some(ms(5)));
        assert_eq!(reconnect.next_delay(), Some(ms(10)));
        assert_eq!(reconnect.next_delay(), None);

        reconnect.reset();
        assert_eq!(reconnect.next_delay(), Some(ms(5)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_once_then_gives_up() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result: Result<(), String> = retry("connect", &RetryConfig::once(ms(10)), || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err("connect failed".to_string())
            }
        })
        .await;

        assert_eq!(result, Err("connect failed".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_stops_at_first_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result: Result<u32, String> = retry("connect", &RetryConfig::default(), || {
            let counter = Arc::clone(&counter);
            async move {
                match counter.fetch_add(1, Ordering::SeqCst) {
                    0 => Err("not yet".to_string()),
                    n => Ok(n),
                }
            }
        })
        .await;

        assert_eq!(result, Ok(1));
    }
}
