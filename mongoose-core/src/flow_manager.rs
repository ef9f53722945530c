//! The event flow manager: the single registry tying named sources to the
//! publishers, target queues, and readers that move payloads between them.
//!
//! Concrete components (`Publisher<T>`, `TargetQueue<T>`, `Reader<T>`) stay
//! fully generic; only this registry's maps erase `T` behind `Any`, because
//! callers register and look things up by name/key at points where the
//! concrete type is locally known but can't be threaded through a single
//! shared map type. This mirrors the Java original's `Object`-keyed
//! registries without needing reflection to get back to a concrete type: a
//! lookup always happens at a call site that names `T` itself, so the
//! `downcast` never fails in practice.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{MongooseError, Result};
use crate::event::{Event, SlowConsumerStrategy, WrapStrategy};
use crate::ids::{CallbackType, SourceName, SubscriptionKey};
use crate::invocation::{Capability, EventHandler, GenericOnEventStrategy, InvocationStrategy, TypedInterfaceStrategy};
use crate::pool::PoolRegistry;
use crate::publisher::Publisher;
use crate::queue::TargetQueue;
use crate::reader::{Reader, ReaderHandle};

#[derive(Default)]
pub struct EventFlowManager {
    sources: Mutex<HashMap<SourceName, Arc<dyn Any + Send + Sync>>>,
    readers: Mutex<HashMap<SubscriptionKey, Arc<dyn ReaderHandle>>>,
    pools: PoolRegistry,
    started: parking_lot::RwLock<bool>,
}

impl EventFlowManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pools(&self) -> &PoolRegistry {
        &self.pools
    }

    /// Registers a new named source of payload type `T`. Errors if the name
    /// is already taken — source names are unique per flow manager instance.
    pub fn register_event_source<T: Event + Clone>(
        &self,
        name: impl Into<Arc<str>>,
    ) -> Result<Arc<Publisher<T>>> {
        let name = SourceName::new(name)?;
        let mut sources = self.sources.lock();
        if sources.contains_key(&name) {
            return Err(MongooseError::DuplicateName(name.as_str().to_string()));
        }
        let publisher = Arc::new(Publisher::<T>::new(name.clone()));
        sources.insert(name, publisher.clone());
        Ok(publisher)
    }

    pub fn get_source<T: Event + Clone>(&self, name: &SourceName) -> Result<Arc<Publisher<T>>> {
        let sources = self.sources.lock();
        let entry = sources
            .get(name)
            .ok_or_else(|| MongooseError::NoSource(name.as_str().to_string()))?;
        entry
            .clone()
            .downcast::<Publisher<T>>()
            .map_err(|_| MongooseError::InvalidState("source registered under a different payload type"))
    }

    /// Subscribes `handler` to `source_name` under the generic `onEvent`
    /// contract. The first subscription for a `(source, callback type)` pair
    /// creates the target queue, wires it into the source's fan-out list,
    /// and builds the reader that will drain it; every subsequent call adds
    /// `handler` as one more processor on that same existing reader, rather
    /// than erroring — matching the listener-count contract every
    /// invocation strategy exposes via `count()`. Returns the subscription's
    /// key, to be passed to `unsubscribe` later.
    pub fn subscribe<T: Event + Clone>(
        &self,
        source_name: &SourceName,
        handler: Arc<dyn EventHandler<T>>,
        queue_capacity: usize,
        wrap_strategy: WrapStrategy,
        slow_consumer_strategy: SlowConsumerStrategy,
    ) -> Result<SubscriptionKey> {
        let publisher = self.get_source::<T>(source_name)?;
        let callback_type = CallbackType::on_event::<T>();
        let key = SubscriptionKey::new(source_name.clone(), callback_type);

        let mut readers = self.readers.lock();
        if let Some(existing) = readers.get(&key) {
            let reader = existing
                .as_any()
                .downcast_ref::<Reader<T>>()
                .ok_or(MongooseError::InvalidState(
                    "reader registered under a different payload type",
                ))?;
            reader.register_processor(handler);
            return Ok(key);
        }

        let queue_name = format!("{source_name}::{callback_type:?}");
        let queue = Arc::new(TargetQueue::<T>::new(
            queue_name,
            queue_capacity,
            slow_consumer_strategy,
        ));
        publisher.add_target(queue.clone(), wrap_strategy);

        let strategy: Box<dyn InvocationStrategy<T>> =
            Box::new(GenericOnEventStrategy::new(vec![handler]));
        let reader = Reader::new(key.clone(), queue, strategy);
        readers.insert(key.clone(), Arc::new(reader));
        Ok(key)
    }

    /// Subscribes `handler` under a typed-interface capability `C`: only a
    /// concrete handler type proven (at this call site) to implement
    /// `Capability<C>` can ever be dispatched through the resulting reader.
    /// Idempotent the same way `subscribe` is: repeat calls with the same
    /// `(source_name, C)` pair add to the same reader rather than erroring.
    pub fn subscribe_typed<C, T, H>(
        &self,
        source_name: &SourceName,
        handler: Arc<H>,
        queue_capacity: usize,
        wrap_strategy: WrapStrategy,
        slow_consumer_strategy: SlowConsumerStrategy,
    ) -> Result<SubscriptionKey>
    where
        C: Send + Sync + 'static,
        T: Event + Clone,
        H: EventHandler<T> + Capability<C> + 'static,
    {
        let publisher = self.get_source::<T>(source_name)?;
        let callback_type = CallbackType::typed::<C, T>();
        let key = SubscriptionKey::new(source_name.clone(), callback_type);

        let mut readers = self.readers.lock();
        if let Some(existing) = readers.get(&key) {
            let reader = existing
                .as_any()
                .downcast_ref::<Reader<T>>()
                .ok_or(MongooseError::InvalidState(
                    "reader registered under a different payload type",
                ))?;
            reader.register_processor(handler as Arc<dyn EventHandler<T>>);
            return Ok(key);
        }

        let queue_name = format!("{source_name}::{callback_type:?}");
        let queue = Arc::new(TargetQueue::<T>::new(
            queue_name,
            queue_capacity,
            slow_consumer_strategy,
        ));
        publisher.add_target(queue.clone(), wrap_strategy);

        let typed_strategy: TypedInterfaceStrategy<C, T> = TypedInterfaceStrategy::new();
        typed_strategy.register_typed(handler);
        let strategy: Box<dyn InvocationStrategy<T>> = Box::new(typed_strategy);
        let reader = Reader::new(key.clone(), queue, strategy);
        readers.insert(key.clone(), Arc::new(reader));
        Ok(key)
    }

    /// Deregisters `handler` from the reader subscribed under `key`. Once
    /// the reader's last processor is gone, the reader itself is dropped
    /// (firing its `onUnsubscribe` callback, if one was set) — the target
    /// queue stops accepting new items, but the publisher keeps its
    /// (now-dead) target entry until the next registration cycle, same as
    /// before.
    pub fn unsubscribe<T: Event + Clone>(
        &self,
        key: &SubscriptionKey,
        handler: &Arc<dyn EventHandler<T>>,
    ) -> Result<()> {
        let reader_handle = {
            let readers = self.readers.lock();
            readers.get(key).cloned()
        }
        .ok_or_else(|| MongooseError::NoSource(format!("{key:?}")))?;

        let reader = reader_handle
            .as_any()
            .downcast_ref::<Reader<T>>()
            .ok_or(MongooseError::InvalidState(
                "reader registered under a different payload type",
            ))?;

        reader.deregister_processor(handler);
        if reader.processor_count() == 0 {
            self.readers.lock().remove(key);
        }
        Ok(())
    }

    pub fn reader_handle(&self, key: &SubscriptionKey) -> Option<Arc<dyn ReaderHandle>> {
        self.readers.lock().get(key).cloned()
    }

    pub fn reader_handles(&self) -> Vec<Arc<dyn ReaderHandle>> {
        self.readers.lock().values().cloned().collect()
    }

    /// Starts every registered source, flushing its pre-start cache. Can
    /// only run once; a second call is a no-op.
    pub fn start(&self) -> Result<()> {
        let mut started = self.started.write();
        if *started {
            return Ok(());
        }
        // Sources are started by the caller that holds the concrete
        // `Arc<Publisher<T>>` handle returned from `register_event_source`,
        // since `start` needs no type erasure to call directly. This flag
        // just records that the manager itself considers itself running,
        // for readers that ask before dispatching.
        *started = true;
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        *self.started.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Sum(Arc<AtomicU32>);
    impl EventHandler<u32> for Sum {
        fn handle(&self, event: &u32) -> Result<()> {
            self.0.fetch_add(*event, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn register_twice_under_same_name_fails() {
        let manager = EventFlowManager::new();
        manager.register_event_source::<u32>("clicks").unwrap();
        assert!(manager.register_event_source::<u32>("clicks").is_err());
    }

    #[test]
    fn subscribe_wires_publisher_to_reader() {
        let manager = EventFlowManager::new();
        let publisher = manager.register_event_source::<u32>("clicks").unwrap();
        let sum = Arc::new(AtomicU32::new(0));
        let source_name = SourceName::new("clicks").unwrap();
        manager
            .subscribe::<u32>(
                &source_name,
                Arc::new(Sum(sum.clone())),
                8,
                WrapStrategy::SubscriptionNoWrap,
                SlowConsumerStrategy::Disconnect,
            )
            .unwrap();

        publisher.start().unwrap();
        publisher.publish(5).unwrap();

        let handle = manager.reader_handles().into_iter().next().unwrap();
        handle.drain_once().unwrap();
        assert_eq!(sum.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn a_second_subscribe_under_the_same_key_adds_a_processor_instead_of_erroring() {
        let manager = EventFlowManager::new();
        let publisher = manager.register_event_source::<u32>("clicks").unwrap();
        let source_name = SourceName::new("clicks").unwrap();
        let first = Arc::new(AtomicU32::new(0));
        let second = Arc::new(AtomicU32::new(0));

        let key_a = manager
            .subscribe::<u32>(
                &source_name,
                Arc::new(Sum(first.clone())),
                8,
                WrapStrategy::SubscriptionNoWrap,
                SlowConsumerStrategy::Disconnect,
            )
            .unwrap();
        let key_b = manager
            .subscribe::<u32>(
                &source_name,
                Arc::new(Sum(second.clone())),
                8,
                WrapStrategy::SubscriptionNoWrap,
                SlowConsumerStrategy::Disconnect,
            )
            .unwrap();

        assert_eq!(key_a, key_b);
        assert_eq!(manager.reader_handles().len(), 1);

        publisher.start().unwrap();
        publisher.publish(5).unwrap();
        let handle = manager.reader_handle(&key_a).unwrap();
        handle.drain_once().unwrap();
        assert_eq!(first.load(Ordering::SeqCst), 5);
        assert_eq!(second.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn unsubscribe_removes_the_reader_only_once_every_processor_is_gone() {
        let manager = EventFlowManager::new();
        manager.register_event_source::<u32>("clicks").unwrap();
        let source_name = SourceName::new("clicks").unwrap();
        let a: Arc<dyn EventHandler<u32>> = Arc::new(Sum(Arc::new(AtomicU32::new(0))));
        let b: Arc<dyn EventHandler<u32>> = Arc::new(Sum(Arc::new(AtomicU32::new(0))));

        let key = manager
            .subscribe::<u32>(
                &source_name,
                a.clone(),
                8,
                WrapStrategy::SubscriptionNoWrap,
                SlowConsumerStrategy::Disconnect,
            )
            .unwrap();
        manager
            .subscribe::<u32>(
                &source_name,
                b.clone(),
                8,
                WrapStrategy::SubscriptionNoWrap,
                SlowConsumerStrategy::Disconnect,
            )
            .unwrap();

        manager.unsubscribe::<u32>(&key, &a).unwrap();
        assert!(manager.reader_handle(&key).is_some());

        manager.unsubscribe::<u32>(&key, &b).unwrap();
        assert!(manager.reader_handle(&key).is_none());
    }
}
