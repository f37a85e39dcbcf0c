// Backoff & retry decisions
//
// Shared by the broker reconnect loop and the email retry path.
use rand::Rng;
use std::time::Duration;
use tracing::{info, warn};

/// Retry decision result
#[derive(Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry with this counter value after the delay
    Retry { next_count: u32, delay: Duration },
    /// Do not retry, the job has failed permanently
    Exhausted,
}

/// Exponential backoff with additive jitter, capped:
///
/// ```text
/// delay = min(initial * 2^attempt + jitter, max)     jitter in [0, jitter_max]
/// ```
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    initial: Duration,
    max: Duration,
    jitter_max: Duration,
}

impl BackoffPolicy {
    pub fn new(initial: Duration, max: Duration, jitter_max: Duration) -> Self {
        Self {
            initial,
            max,
            jitter_max,
        }
    }

    /// Delay for `attempt` with an explicit jitter value
    pub fn delay_with_jitter(&self, attempt: u32, jitter: Duration) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        let base = self.initial.saturating_mul(factor);
        base.saturating_add(jitter).min(self.max)
    }

    /// Delay for `attempt` with random jitter
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let jitter_ms = self.jitter_max.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        };
        self.delay_with_jitter(attempt, jitter)
    }

    /// Decide whether a job that has been retried `retry_count` times gets another go
    pub fn decide(&self, retry_count: u32, max_retries: u32) -> RetryDecision {
        if retry_count >= max_retries {
            warn!(
                retry_count = %retry_count,
                max_retries = %max_retries,
                "Max retry attempts reached"
            );
            return RetryDecision::Exhausted;
        }

        let delay = self.delay_for(retry_count);
        info!(
            retry_count = %retry_count,
            max_retries = %max_retries,
            delay_ms = %delay.as_millis(),
            "Scheduling retry"
        );

        RetryDecision::Retry {
            next_count: retry_count + 1,
            delay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_millis(1000),
            Duration::from_millis(30_000),
            Duration::from_millis(1000),
        )
    }

    #[test]
    fn test_exponential_growth() {
        let p = policy();
        assert_eq!(p.delay_with_jitter(0, Duration::ZERO), Duration::from_millis(1000));
        assert_eq!(p.delay_with_jitter(1, Duration::ZERO), Duration::from_millis(2000));
        assert_eq!(p.delay_with_jitter(3, Duration::ZERO), Duration::from_millis(8000));
    }

    #[test]
    fn test_capped_at_max() {
        let p = policy();
        assert_eq!(p.delay_with_jitter(5, Duration::ZERO), Duration::from_millis(30_000));
        assert_eq!(p.delay_with_jitter(40, Duration::ZERO), Duration::from_millis(30_000));
        // jitter never pushes past the cap
        assert_eq!(
            p.delay_with_jitter(4, Duration::from_millis(999)),
            Duration::from_millis(16_999)
        );
        assert_eq!(
            p.delay_with_jitter(10, Duration::from_millis(999)),
            Duration::from_millis(30_000)
        );
    }

    #[test]
    fn test_random_jitter_in_range() {
        let p = policy();
        for _ in 0..100 {
            let d = p.delay_for(1);
            assert!(d >= Duration::from_millis(2000));
            assert!(d <= Duration::from_millis(3000));
        }
    }

    #[test]
    fn test_decide() {
        let p = policy();
        match p.decide(2, 5) {
            RetryDecision::Retry { next_count, delay } => {
                assert_eq!(next_count, 3);
                assert!(delay >= Duration::from_millis(4000));
            }
            RetryDecision::Exhausted => panic!("expected retry"),
        }
        assert_eq!(p.decide(5, 5), RetryDecision::Exhausted);
        assert_eq!(p.decide(9, 5), RetryDecision::Exhausted);
    }
}
