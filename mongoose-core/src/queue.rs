//! Target queue: the bounded channel sitting between a publisher and the
//! reader that drains it on behalf of one subscriber.
//!
//! Every source has exactly one producer thread (its own), so a bounded
//! `crossbeam_channel` is used here as an SPSC handoff even though the
//! channel itself is MPMC-capable — there is only ever one sender alive per
//! queue in this fabric.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use std::time::Duration;

use crate::error::{MongooseError, Result};
use crate::event::{Envelope, SlowConsumerStrategy};

/// A named, bounded handoff point for one `(source, subscriber)` pairing.
pub struct TargetQueue<U> {
    name: String,
    sender: Sender<Envelope<U>>,
    receiver: Receiver<Envelope<U>>,
    slow_consumer_strategy: SlowConsumerStrategy,
}

impl<U> TargetQueue<U> {
    pub fn new(name: impl Into<String>, capacity: usize, strategy: SlowConsumerStrategy) -> Self {
        let (sender, receiver) = crossbeam_channel::bounded(capacity.max(1));
        Self {
            name: name.into(),
            sender,
            receiver,
            slow_consumer_strategy: strategy,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn slow_consumer_strategy(&self) -> SlowConsumerStrategy {
        self.slow_consumer_strategy
    }

    /// Publishes an item, applying the configured slow-consumer strategy if
    /// the queue is currently full.
    pub fn publish(&self, envelope: Envelope<U>) -> Result<()> {
        match self.sender.try_send(envelope) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(envelope)) => self.handle_full(envelope),
            Err(TrySendError::Disconnected(_)) => Err(MongooseError::QueueFull(format!(
                "target queue '{}' has no live reader",
                self.name
            ))),
        }
    }

    fn handle_full(&self, envelope: Envelope<U>) -> Result<()> {
        match self.slow_consumer_strategy {
            SlowConsumerStrategy::Backoff => self
                .sender
                .send_timeout(envelope, Duration::from_millis(50))
                .map_err(|_| {
                    MongooseError::QueueFull(format!(
                        "target queue '{}' stayed full past the backoff window",
                        self.name
                    ))
                }),
            SlowConsumerStrategy::Disconnect => Err(MongooseError::QueueFull(format!(
                "target queue '{}' full, consumer disconnected per policy",
                self.name
            ))),
            SlowConsumerStrategy::ExitProcess => {
                tracing::error!(queue = %self.name, "target queue full under exit-process policy");
                std::process::exit(1);
            }
        }
    }

    pub fn try_recv(&self) -> Option<Envelope<U>> {
        self.receiver.try_recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<Envelope<U>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(envelope) => Some(envelope),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    pub fn capacity(&self) -> Option<usize> {
        self.sender.capacity()
    }
}
