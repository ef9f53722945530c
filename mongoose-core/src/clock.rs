//! Wall-clock access for processors, including the replay-timestamp override
//! an invocation strategy installs around a single dispatch.
//!
//! The Java original keeps this override in a thread-local on the
//! processor's clock. Since every processor on a given agent runs on that
//! agent's single OS thread, the override is just a field owned by the
//! agent and shared (via `Arc`) with the readers it hosts — no thread-local
//! storage needed.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

const NO_OVERRIDE: i64 = i64::MIN;

pub fn now_micros() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0)
}

/// Per-agent clock: reads the replay override installed by an invocation
/// strategy while it dispatches a timestamped event, otherwise falls back
/// to the system clock.
#[derive(Debug, Default)]
pub struct AgentClock {
    override_micros: AtomicI64,
}

impl AgentClock {
    pub fn new() -> Self {
        Self {
            override_micros: AtomicI64::new(NO_OVERRIDE),
        }
    }

    /// Current time as seen by whichever processor is presently executing
    /// on this agent's thread.
    pub fn now_micros(&self) -> i64 {
        let ov = self.override_micros.load(Ordering::Acquire);
        if ov == NO_OVERRIDE {
            now_micros()
        } else {
            ov
        }
    }

    /// Installs a replay override for the duration of `f`, then restores the
    /// previous value (which is always "no override" in practice, since a
    /// reader's dispatch never nests another timestamped dispatch on the
    /// same agent).
    pub fn with_override<R>(&self, micros: i64, f: impl FnOnce() -> R) -> R {
        self.override_micros.store(micros, Ordering::Release);
        let result = f();
        self.override_micros.store(NO_OVERRIDE, Ordering::Release);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_is_visible_during_and_cleared_after() {
        let clock = AgentClock::new();
        let before = clock.now_micros();
        assert!(before != 42);
        let seen = clock.with_override(42, || clock.now_micros());
        assert_eq!(seen, 42);
        assert_ne!(clock.now_micros(), 42);
    }
}
