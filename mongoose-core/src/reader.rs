//! Readers: the consumer-side half of a subscription, draining one target
//! queue in bounded batches and invoking its invocation strategy per item.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::clock::AgentClock;
use crate::error::Result;
use crate::event::{Envelope, Event};
use crate::ids::SubscriptionKey;
use crate::invocation::{EventHandler, InvocationStrategy};
use crate::observability::{ErrorEvent, ErrorSink, Severity};
use crate::queue::TargetQueue;
use crate::retry::RetryPolicy;

/// Object-safe facade a [`crate::agent::CompositeAgent`] schedules without
/// needing to know the reader's payload type.
pub trait ReaderHandle: Send + Sync {
    fn key(&self) -> &SubscriptionKey;

    /// Drains up to `limit` items, dispatching each through its invocation
    /// strategy (with retry) before moving to the next. Returns the number
    /// of items actually drained.
    fn drain_batch(&self, limit: usize) -> Result<usize>;

    fn drain_once(&self) -> Result<usize> {
        self.drain_batch(1)
    }

    fn queue_len(&self) -> usize;

    /// Replaces the clock this reader's dispatches read from. Called once,
    /// by whichever agent is about to take ownership of this reader's
    /// duty-cycle ticks, so every reader on that agent shares one clock.
    fn set_clock(&self, clock: Arc<AgentClock>);

    fn as_any(&self) -> &dyn std::any::Any;
}

pub struct Reader<T> {
    key: SubscriptionKey,
    queue: Arc<TargetQueue<T>>,
    strategy: Box<dyn InvocationStrategy<T>>,
    clock: Mutex<Arc<AgentClock>>,
    retry_policy: RetryPolicy,
    error_sink: ErrorSink,
    on_unsubscribe: Option<Box<dyn Fn() + Send + Sync>>,
}

impl<T: Event> Reader<T> {
    pub fn new(
        key: SubscriptionKey,
        queue: Arc<TargetQueue<T>>,
        strategy: Box<dyn InvocationStrategy<T>>,
    ) -> Self {
        Self {
            key,
            queue,
            strategy,
            clock: Mutex::new(Arc::new(AgentClock::new())),
            retry_policy: RetryPolicy::default(),
            error_sink: ErrorSink::default(),
            on_unsubscribe: None,
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_clock(self, clock: Arc<AgentClock>) -> Self {
        *self.clock.lock() = clock;
        self
    }

    pub fn with_error_sink(mut self, error_sink: ErrorSink) -> Self {
        self.error_sink = error_sink;
        self
    }

    /// Runs once, the instant this reader's last registered processor is
    /// deregistered, matching the listener-count contract every invocation
    /// strategy exposes via `count()`.
    pub fn with_on_unsubscribe(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_unsubscribe = Some(Box::new(callback));
        self
    }

    pub fn register_processor(&self, handler: Arc<dyn EventHandler<T>>) -> bool {
        self.strategy.register_processor(handler)
    }

    /// Removes `handler`. If this was the last registered processor, fires
    /// `on_unsubscribe` exactly once.
    pub fn deregister_processor(&self, handler: &Arc<dyn EventHandler<T>>) -> bool {
        let removed = self.strategy.deregister_processor(handler);
        if removed && self.strategy.count() == 0 {
            if let Some(callback) = &self.on_unsubscribe {
                callback();
            }
        }
        removed
    }

    pub fn processor_count(&self) -> usize {
        self.strategy.count()
    }

    fn dispatch_with_retry(&self, envelope: &Envelope<T>) -> Result<()> {
        let clock = self.clock.lock().clone();
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match self.strategy.invoke(&clock, envelope) {
                Ok(()) => return Ok(()),
                Err(err) => {
                    if self.retry_policy.should_retry(err.retry_kind(), attempts) {
                        self.error_sink.record(ErrorEvent {
                            severity: Severity::Warning,
                            source: Arc::from(format!("{:?}", self.key).as_str()),
                            message: format!("attempt {attempts} failed, retrying: {err}"),
                            occurred_at_micros: clock.now_micros(),
                            correlation_id: None,
                        });
                        self.retry_policy.backoff(attempts);
                        continue;
                    }
                    self.error_sink.record(ErrorEvent {
                        severity: Severity::Error,
                        source: Arc::from(format!("{:?}", self.key).as_str()),
                        message: format!("dropping item after {attempts} attempt(s): {err}"),
                        occurred_at_micros: clock.now_micros(),
                        correlation_id: None,
                    });
                    return Err(err);
                }
            }
        }
    }
}

impl<T: Event> ReaderHandle for Reader<T> {
    fn key(&self) -> &SubscriptionKey {
        &self.key
    }

    fn drain_batch(&self, limit: usize) -> Result<usize> {
        let mut drained = 0;
        for _ in 0..limit {
            let Some(envelope) = self.queue.try_recv() else {
                break;
            };
            // The pool reference for this item is released here, at
            // dequeue time, regardless of how dispatch turns out below —
            // a slow or retried dispatch must not keep the slot checked
            // out past the moment every queue has handed its copy off.
            envelope.payload().release_pool_reference()?;
            // A single item exhausting its retries must not take the rest
            // of the batch down with it: it's counted as processed (there
            // is nothing left to retry it with) and the loop moves on.
            let _ = self.dispatch_with_retry(&envelope);
            drained += 1;
        }
        Ok(drained)
    }

    fn queue_len(&self) -> usize {
        self.queue.len()
    }

    fn set_clock(&self, clock: Arc<AgentClock>) {
        *self.clock.lock() = clock;
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
