//! Targeted checks for the quantified invariants in the spec that aren't
//! already exercised as a side effect of the end-to-end scenarios in
//! `scenarios.rs`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mongoose_core::agent::{spawn_composite_agent, IdleStrategy};
use mongoose_core::event::{SlowConsumerStrategy, WrapStrategy};
use mongoose_core::ids::SourceName;
use mongoose_core::invocation::EventHandler;
use mongoose_core::observability::ErrorSink;
use mongoose_core::reader::ReaderHandle;
use mongoose_core::EventFlowManager;

struct ThreadIdRecorder(parking_lot::Mutex<Vec<std::thread::ThreadId>>);

impl EventHandler<u32> for ThreadIdRecorder {
    fn handle(&self, _event: &u32) -> mongoose_core::Result<()> {
        self.0.lock().push(std::thread::current().id());
        Ok(())
    }
}

#[test]
fn reader_presence_tracks_subscription_count() {
    let manager = EventFlowManager::new();
    manager.register_event_source::<u32>("src").unwrap();
    let source_name = SourceName::new("src").unwrap();

    struct Noop;
    impl EventHandler<u32> for Noop {
        fn handle(&self, _event: &u32) -> mongoose_core::Result<()> {
            Ok(())
        }
    }

    let handler: Arc<dyn EventHandler<u32>> = Arc::new(Noop);
    let key = manager
        .subscribe::<u32>(
            &source_name,
            handler.clone(),
            4,
            WrapStrategy::SubscriptionNoWrap,
            SlowConsumerStrategy::Disconnect,
        )
        .unwrap();

    assert!(manager.reader_handle(&key).is_some());
    manager.unsubscribe::<u32>(&key, &handler).unwrap();
    assert!(manager.reader_handle(&key).is_none());
    assert!(manager.reader_handles().is_empty());
}

#[test]
fn round_trip_unsubscribe_then_publish_delivers_to_nobody() {
    let manager = EventFlowManager::new();
    let publisher = manager.register_event_source::<u32>("src").unwrap();
    let source_name = SourceName::new("src").unwrap();

    struct Noop;
    impl EventHandler<u32> for Noop {
        fn handle(&self, _event: &u32) -> mongoose_core::Result<()> {
            Ok(())
        }
    }

    let handler: Arc<dyn EventHandler<u32>> = Arc::new(Noop);
    let key = manager
        .subscribe::<u32>(
            &source_name,
            handler.clone(),
            4,
            WrapStrategy::SubscriptionNoWrap,
            SlowConsumerStrategy::Disconnect,
        )
        .unwrap();
    manager.unsubscribe::<u32>(&key, &handler).unwrap();

    publisher.start().unwrap();
    // No live reader left; publishing must still succeed (nobody to fail
    // a slow-consumer check against) even though nothing consumes it.
    publisher.publish(1).unwrap();
    assert!(manager.reader_handles().is_empty());
}

#[test]
fn all_invocations_for_a_processor_land_on_one_os_thread() {
    let manager = Arc::new(EventFlowManager::new());
    let publisher = manager.register_event_source::<u32>("src").unwrap();
    let source_name = SourceName::new("src").unwrap();

    let recorder = Arc::new(ThreadIdRecorder(parking_lot::Mutex::new(Vec::new())));
    manager
        .subscribe::<u32>(
            &source_name,
            recorder.clone(),
            32,
            WrapStrategy::SubscriptionNoWrap,
            SlowConsumerStrategy::Disconnect,
        )
        .unwrap();

    publisher.start().unwrap();
    for i in 0..20u32 {
        publisher.publish(i).unwrap();
    }

    let readers: Vec<Arc<dyn ReaderHandle>> = manager.reader_handles();
    let handle = spawn_composite_agent(
        "single-thread-agent",
        readers,
        IdleStrategy::Yielding,
        ErrorSink::default(),
        manager.clone(),
        Arc::new(mongoose_core::ServiceRegistry::new()),
    );

    let deadline = Instant::now() + Duration::from_secs(2);
    while recorder.0.lock().len() < 20 && Instant::now() < deadline {
        std::thread::yield_now();
    }
    handle.stop().unwrap();

    let seen = recorder.0.lock();
    assert_eq!(seen.len(), 20);
    let first = seen[0];
    assert!(seen.iter().all(|id| *id == first));
}

#[test]
fn dispatch_cached_event_log_is_idempotent_once_drained() {
    let manager = EventFlowManager::new();
    let publisher = manager.register_event_source::<u32>("src").unwrap();
    publisher.publish(1).unwrap();
    publisher.publish(2).unwrap();

    let source_name = SourceName::new("src").unwrap();
    let count = Arc::new(AtomicUsize::new(0));
    struct Counter(Arc<AtomicUsize>);
    impl EventHandler<u32> for Counter {
        fn handle(&self, _event: &u32) -> mongoose_core::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }
    manager
        .subscribe::<u32>(
            &source_name,
            Arc::new(Counter(count.clone())),
            8,
            WrapStrategy::SubscriptionNoWrap,
            SlowConsumerStrategy::Disconnect,
        )
        .unwrap();

    publisher.start().unwrap();
    publisher.start().unwrap();
    assert_eq!(publisher.cached_len(), 0);

    let handle = manager.reader_handles().into_iter().next().unwrap();
    handle.drain_batch(8).unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 2);
}
