use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

const DEFAULT_FIRST_RETRY: Duration = Duration::from_secs(30);
const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;

/// Decides whether a failed handler invocation is retried, sleeping out the
/// backoff before answering.
///
/// A policy instance is private to one dispatch and tracks its own attempt
/// count; it is never shared across invocations.
#[async_trait]
pub trait Policy: Send {
    async fn try_again(&mut self) -> bool;
}

/// Produces a fresh policy per dispatch so attempt counters never leak
/// across unrelated events.
pub type PolicyFactory = Arc<dyn Fn() -> Box<dyn Policy> + Send + Sync>;

/// Policy that gives up immediately: errors surface once and stop.
pub struct NeverRetry;

impl NeverRetry {
    pub fn factory() -> PolicyFactory {
        Arc::new(|| Box::new(NeverRetry))
    }
}

#[async_trait]
impl Policy for NeverRetry {
    async fn try_again(&mut self) -> bool {
        false
    }
}

/// Unbounded exponential backoff: attempt `n` (1-indexed) waits
/// `first_retry * backoff_factor^(n - 1)` and then retries.
pub struct IndefiniteRetry {
    first_retry: Duration,
    backoff_factor: f64,
    attempt: i32,
}

impl IndefiniteRetry {
    pub fn new(first_retry: Duration, backoff_factor: f64) -> Self {
        Self {
            first_retry,
            backoff_factor,
            attempt: 0,
        }
    }

    pub fn factory(first_retry: Duration, backoff_factor: f64) -> PolicyFactory {
        Arc::new(move || Box::new(Self::new(first_retry, backoff_factor)))
    }

    pub fn default_factory() -> PolicyFactory {
        Arc::new(|| Box::new(Self::default()))
    }

    fn next_delay(&mut self) -> Duration {
        self.attempt += 1;

        self.first_retry
            .mul_f64(self.backoff_factor.powi(self.attempt - 1))
    }
}

impl Default for IndefiniteRetry {
    fn default() -> Self {
        Self::new(DEFAULT_FIRST_RETRY, DEFAULT_BACKOFF_FACTOR)
    }
}

#[async_trait]
impl Policy for IndefiniteRetry {
    async fn try_again(&mut self) -> bool {
        tokio::time::sleep(self.next_delay()).await;

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_never_retry_refuses_immediately() {
        let mut policy = NeverRetry;
        assert!(!policy.try_again().await);
        assert!(!policy.try_again().await);
    }

    #[test]
    fn test_backoff_schedule_is_exponential() {
        let mut policy = IndefiniteRetry::new(Duration::from_secs(30), 2.0);

        assert_eq!(policy.next_delay(), Duration::from_secs(30));
        assert_eq!(policy.next_delay(), Duration::from_secs(60));
        assert_eq!(policy.next_delay(), Duration::from_secs(120));
        assert_eq!(policy.next_delay(), Duration::from_secs(240));
    }

    #[tokio::test(start_paused = true)]
    async fn test_factory_issues_independent_counters() {
        let factory = IndefiniteRetry::factory(Duration::from_secs(1), 3.0);
        let mut first = factory();
        let mut second = factory();

        let start = tokio::time::Instant::now();
        assert!(first.try_again().await);
        assert!(first.try_again().await);
        assert_eq!(start.elapsed(), Duration::from_secs(1) + Duration::from_secs(3));

        // A sibling policy from the same factory starts back at attempt 1
        let start = tokio::time::Instant::now();
        assert!(second.try_again().await);
        assert_eq!(start.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_indefinite_retry_always_agrees_after_the_wait() {
        let mut policy = IndefiniteRetry::new(Duration::from_secs(30), 2.0);

        for _ in 0..5 {
            assert!(policy.try_again().await);
        }
    }
}
