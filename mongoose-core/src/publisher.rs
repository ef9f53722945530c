//! Publishers: the producer-side half of a source, fanning one payload out
//! to every target queue subscribed under it.
//!
//! `U` must be `Clone` so a single payload can be handed to more than one
//! target queue without moving it. For payloads too expensive to clone,
//! wrap them in [`crate::pool::Pooled`] — an `Arc`-backed handle that is
//! itself cheap to clone and tracks its own fan-out reference count.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{MongooseError, Result};
use crate::event::{Envelope, Event, SlowConsumerStrategy, WrapStrategy};
use crate::ids::SourceName;
use crate::queue::TargetQueue;

struct PublisherTarget<U> {
    queue: Arc<TargetQueue<U>>,
    wrap_strategy: WrapStrategy,
}

/// One registered event source. Before `start()` is called, every publish
/// is appended to an in-memory cache instead of reaching any target queue,
/// then replayed in order once the source starts — so events published
/// during application wiring are not lost while subscribers are still being
/// registered.
pub struct Publisher<U> {
    name: SourceName,
    source_name_arc: Arc<str>,
    targets: Mutex<Vec<PublisherTarget<U>>>,
    cache: Mutex<Vec<U>>,
    started: AtomicBool,
    /// Assigns each publish (cached or direct) a single sequence number,
    /// shared across every target it fans out to, so `NamedFeedEvent`
    /// consumers see a strictly increasing, gap-free series per source.
    next_sequence: AtomicU64,
}

impl<U: Event + Clone> Publisher<U> {
    pub fn new(name: SourceName) -> Self {
        let source_name_arc: Arc<str> = Arc::from(name.as_str());
        Self {
            name,
            source_name_arc,
            targets: Mutex::new(Vec::new()),
            cache: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            next_sequence: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &SourceName {
        &self.name
    }

    pub fn add_target(&self, queue: Arc<TargetQueue<U>>, wrap_strategy: WrapStrategy) {
        self.targets.lock().push(PublisherTarget {
            queue,
            wrap_strategy,
        });
    }

    /// Publishes one payload to every current target. Before `start()`,
    /// instead appends to the replay cache.
    pub fn publish(&self, payload: U) -> Result<()> {
        if !self.started.load(Ordering::Acquire) {
            self.cache.lock().push(payload);
            return Ok(());
        }
        self.fan_out(payload)
    }

    /// Fans `payload` out to every live target, acquiring one pool reference
    /// per target immediately before offering it a copy and releasing the
    /// owner's own reference once every target has been tried. A single
    /// target being full or gone must not abort delivery to the rest: a
    /// `Disconnect`-policy target that errors is dropped from the list and
    /// the loop continues; any other failure is recorded and surfaces to the
    /// caller only after every target has had its turn.
    fn fan_out(&self, payload: U) -> Result<()> {
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);

        let mut last_err: Option<MongooseError> = None;
        let mut index = 0;
        loop {
            let (queue, wrap_strategy, slow_consumer_strategy) = {
                let targets = self.targets.lock();
                let Some(target) = targets.get(index) else {
                    break;
                };
                (
                    target.queue.clone(),
                    target.wrap_strategy,
                    target.queue.slow_consumer_strategy(),
                )
            };

            payload.acquire_pool_reference()?;
            let envelope = Envelope::wrap(payload.clone(), wrap_strategy, &self.source_name_arc, sequence);

            match queue.publish(envelope) {
                Ok(()) => index += 1,
                Err(err) => {
                    if slow_consumer_strategy == SlowConsumerStrategy::Disconnect {
                        self.targets.lock().retain(|t| !Arc::ptr_eq(&t.queue, &queue));
                    } else {
                        index += 1;
                    }
                    last_err = Some(err);
                }
            }
        }

        payload.release_pool_reference()?;
        match last_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Flushes the pre-start cache to the now-registered targets, in
    /// publish order, then switches to direct dispatch for every publish
    /// after this point.
    pub fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let cached: Vec<U> = std::mem::take(&mut *self.cache.lock());
        for payload in cached {
            self.fan_out(payload)?;
        }
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn cached_len(&self) -> usize {
        self.cache.lock().len()
    }
}

/// Wraps a `Publisher<U>` with a `T -> U` mapping function, letting a source
/// of `T`s feed subscribers that only care about a derived `U`. Kept as a
/// distinct wrapper (rather than a second generic parameter on `Publisher`
/// itself) so the common unmapped case never has to name an identity
/// mapper's output type twice.
pub struct MappedPublisher<T, U> {
    inner: Arc<Publisher<U>>,
    mapper: Box<dyn Fn(&T) -> U + Send + Sync>,
}

impl<T, U: Event + Clone> MappedPublisher<T, U> {
    pub fn new(inner: Arc<Publisher<U>>, mapper: impl Fn(&T) -> U + Send + Sync + 'static) -> Self {
        Self {
            inner,
            mapper: Box::new(mapper),
        }
    }

    pub fn publish(&self, payload: &T) -> Result<()> {
        self.inner.publish((self.mapper)(payload))
    }

    pub fn inner(&self) -> &Arc<Publisher<U>> {
        &self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::SlowConsumerStrategy;

    fn publisher(name: &str) -> Publisher<u32> {
        Publisher::new(SourceName::new(name).unwrap())
    }

    #[test]
    fn publishes_before_start_are_cached_not_delivered() {
        let publisher = publisher("ticks");
        let queue = Arc::new(TargetQueue::new("q", 8, SlowConsumerStrategy::Disconnect));
        publisher.add_target(queue.clone(), WrapStrategy::SubscriptionNoWrap);

        publisher.publish(1).unwrap();
        publisher.publish(2).unwrap();
        assert!(queue.try_recv().is_none());
        assert_eq!(publisher.cached_len(), 2);
    }

    #[test]
    fn start_replays_cache_in_order_then_dispatches_directly() {
        let publisher = publisher("ticks");
        let queue = Arc::new(TargetQueue::new("q", 8, SlowConsumerStrategy::Disconnect));
        publisher.add_target(queue.clone(), WrapStrategy::SubscriptionNoWrap);

        publisher.publish(1).unwrap();
        publisher.publish(2).unwrap();
        publisher.start().unwrap();
        publisher.publish(3).unwrap();

        assert_eq!(*queue.try_recv().unwrap().payload(), 1);
        assert_eq!(*queue.try_recv().unwrap().payload(), 2);
        assert_eq!(*queue.try_recv().unwrap().payload(), 3);
    }

    #[test]
    fn fan_out_reaches_every_target() {
        let publisher = publisher("ticks");
        let a = Arc::new(TargetQueue::new("a", 8, SlowConsumerStrategy::Disconnect));
        let b = Arc::new(TargetQueue::new("b", 8, SlowConsumerStrategy::Disconnect));
        publisher.add_target(a.clone(), WrapStrategy::BroadcastNoWrap);
        publisher.add_target(b.clone(), WrapStrategy::BroadcastNoWrap);
        publisher.start().unwrap();
        publisher.publish(7).unwrap();
        assert_eq!(*a.try_recv().unwrap().payload(), 7);
        assert_eq!(*b.try_recv().unwrap().payload(), 7);
    }

    #[test]
    fn named_wrap_assigns_gap_free_increasing_sequence() {
        let publisher = publisher("ticks");
        let queue = Arc::new(TargetQueue::new("q", 8, SlowConsumerStrategy::Disconnect));
        publisher.add_target(queue.clone(), WrapStrategy::SubscriptionNamedEvent);
        publisher.start().unwrap();
        publisher.publish(10).unwrap();
        publisher.publish(20).unwrap();
        publisher.publish(30).unwrap();

        let sequences: Vec<u64> = (0..3)
            .map(|_| match queue.try_recv().unwrap() {
                Envelope::Named(named) => named.sequence,
                _ => panic!("expected Named"),
            })
            .collect();
        assert_eq!(sequences, vec![0, 1, 2]);
    }

    #[test]
    fn disconnected_target_is_dropped_but_does_not_abort_the_rest() {
        let publisher = publisher("ticks");
        let full = Arc::new(TargetQueue::new("full", 1, SlowConsumerStrategy::Disconnect));
        let ok = Arc::new(TargetQueue::new("ok", 8, SlowConsumerStrategy::Disconnect));
        publisher.add_target(full.clone(), WrapStrategy::BroadcastNoWrap);
        publisher.add_target(ok.clone(), WrapStrategy::BroadcastNoWrap);
        publisher.start().unwrap();

        full.publish(Envelope::Broadcast(0)).unwrap();
        assert!(publisher.publish(1).is_err());
        assert_eq!(*ok.try_recv().unwrap().payload(), 1);

        // The disconnected target was pruned, so a second publish reaches
        // only the surviving one and no longer errors.
        publisher.publish(2).unwrap();
        assert_eq!(*ok.try_recv().unwrap().payload(), 2);
    }

    #[test]
    fn fan_out_acquires_one_pool_reference_per_target_and_releases_the_owners() {
        let pool: crate::pool::Pool<u32> = crate::pool::Pool::new(4, || 0u32, |v| *v = 0);
        let publisher: Publisher<crate::pool::Pooled<u32>> = Publisher::new(SourceName::new("pooled").unwrap());
        let a = Arc::new(TargetQueue::new("a", 8, SlowConsumerStrategy::Disconnect));
        let b = Arc::new(TargetQueue::new("b", 8, SlowConsumerStrategy::Disconnect));
        publisher.add_target(a.clone(), WrapStrategy::BroadcastNoWrap);
        publisher.add_target(b.clone(), WrapStrategy::BroadcastNoWrap);
        publisher.start().unwrap();

        let pooled = pool.acquire(1);
        publisher.publish(pooled.clone()).unwrap();
        drop(pooled);

        // fan_out already released the owner's reference internally. Each
        // target still owes a release, the way a reader's drain_batch would
        // give one back the instant it dequeues the item.
        assert_eq!(pool.stats().returned, 0);
        a.try_recv().unwrap().payload().release_pool_reference().unwrap();
        assert_eq!(pool.stats().returned, 0);
        b.try_recv().unwrap().payload().release_pool_reference().unwrap();
        assert_eq!(pool.stats().returned, 1);
        assert_eq!(pool.stats().free, 1);
    }

    #[test]
    fn mapped_publisher_applies_mapper_before_fan_out() {
        let inner = Arc::new(publisher("derived"));
        let queue = Arc::new(TargetQueue::new("q", 8, SlowConsumerStrategy::Disconnect));
        inner.add_target(queue.clone(), WrapStrategy::SubscriptionNoWrap);
        inner.start().unwrap();

        let mapped = MappedPublisher::new(inner, |s: &String| s.len() as u32);
        mapped.publish(&"hello".to_string()).unwrap();
        assert_eq!(*queue.try_recv().unwrap().payload(), 5);
    }
}
