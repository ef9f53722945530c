//! Per-event retry/backoff policy used by the queue reader.

use std::collections::HashSet;
use std::time::Duration;

/// Classifies a dispatch-time failure so the retry policy can decide whether
/// it is worth retrying at all (a malformed-payload error, for instance,
/// will never succeed on retry).
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub enum ErrorKind {
    Transient,
    Timeout,
    ResourceExhausted,
    Permanent,
}

/// Pure value type: `shouldRetry`/`backoff` have no side effects beyond the
/// sleep `backoff` performs.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub retryable_error_kinds: HashSet<ErrorKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
            multiplier: 2.0,
            retryable_error_kinds: [ErrorKind::Transient, ErrorKind::Timeout]
                .into_iter()
                .collect(),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
            retryable_error_kinds: HashSet::new(),
        }
    }

    /// `attempts` is the number of attempts already made (1-based).
    pub fn should_retry(&self, kind: ErrorKind, attempts: u32) -> bool {
        attempts < self.max_attempts && self.retryable_error_kinds.contains(&kind)
    }

    /// Delay to wait before attempt `n` (1-based, `n >= 1`). A zero delay
    /// means no sleep is performed.
    pub fn backoff_duration(&self, n: u32) -> Duration {
        if self.base_delay.is_zero() {
            return Duration::ZERO;
        }
        let exp = self.multiplier.powi((n.saturating_sub(1)) as i32);
        let scaled = self.base_delay.as_secs_f64() * exp;
        let capped = scaled.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }

    /// Sleeps for `backoff_duration(n)`. Split out from the pure duration
    /// calculation so tests can assert on the duration without sleeping.
    pub fn backoff(&self, n: u32) {
        let d = self.backoff_duration(n);
        if !d.is_zero() {
            std::thread::sleep(d);
        }
    }
}
