use std::time::Duration;

use rand::Rng;

/// High-level classification of a fetch error for retry purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Operation timed out (connect/read, or HTTP 408).
    Timeout,
    /// Server asked us to slow down (HTTP 429).
    Throttled,
    /// Network-level failure (connection reset, DNS, etc.).
    Connection,
    /// Retryable HTTP 5xx status.
    Http5xx(u16),
    /// Not eligible for retry: 4xx (other than 408/429), TLS failure,
    /// staging inconsistency, or cancellation.
    Permanent,
}

/// Decision returned by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    NoRetry,
    RetryAfter(Duration),
}

/// Exponential backoff with jitter: `delay = min(cap, base * 2^attempt) *
/// uniform(0.5, 1.5)`. The attempt counter resets only when a segment
/// completes successfully; `decide` itself is stateless per call.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// `attempt` is 1-based (1 = first attempt, already failed once).
    pub fn decide(&self, attempt: u32, kind: ErrorKind) -> RetryDecision {
        if attempt >= self.max_attempts {
            return RetryDecision::NoRetry;
        }

        match kind {
            ErrorKind::Permanent => RetryDecision::NoRetry,
            ErrorKind::Timeout | ErrorKind::Connection | ErrorKind::Throttled | ErrorKind::Http5xx(_) => {
                RetryDecision::RetryAfter(self.backoff_for(attempt))
            }
        }
    }

    fn backoff_for(&self, attempt: u32) -> Duration {
        let exp = 1u32 << attempt.min(16);
        let raw = self.base_delay.saturating_mul(exp);
        let capped = raw.min(self.max_delay);
        let jitter = rand::thread_rng().gen_range(0.5..1.5);
        capped.mul_f64(jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_retry_for_permanent() {
        let p = RetryPolicy::default();
        assert_eq!(p.decide(1, ErrorKind::Permanent), RetryDecision::NoRetry);
    }

    #[test]
    fn backoff_grows_and_is_capped() {
        let p = RetryPolicy { max_attempts: 20, ..RetryPolicy::default() };
        let d1 = match p.decide(1, ErrorKind::Timeout) {
            RetryDecision::RetryAfter(d) => d,
            _ => panic!("expected retry"),
        };
        let d_last = match p.decide(12, ErrorKind::Timeout) {
            RetryDecision::RetryAfter(d) => d,
            _ => panic!("expected retry"),
        };
        assert!(d1 <= p.max_delay.mul_f64(1.5));
        assert!(d_last <= p.max_delay.mul_f64(1.5));
    }

    #[test]
    fn respects_max_attempts() {
        let p = RetryPolicy { max_attempts: 3, ..RetryPolicy::default() };
        assert!(matches!(p.decide(1, ErrorKind::Throttled), RetryDecision::RetryAfter(_)));
        assert!(matches!(p.decide(2, ErrorKind::Throttled), RetryDecision::RetryAfter(_)));
        assert_eq!(p.decide(3, ErrorKind::Throttled), RetryDecision::NoRetry);
    }

    #[test]
    fn jitter_keeps_delay_within_expected_band() {
        let p = RetryPolicy::default();
        for _ in 0..50 {
            if let RetryDecision::RetryAfter(d) = p.decide(1, ErrorKind::Connection) {
                let base = p.base_delay.saturating_mul(2);
                assert!(d >= base.mul_f64(0.5) && d <= base.mul_f64(1.5));
            }
        }
    }
}
