//! Invocation strategies: the thin layer between a dequeued envelope and the
//! processor callback that consumes it.

use std::any::{Any, TypeId};
use std::collections::HashSet;
use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::clock::AgentClock;
use crate::error::Result;
use crate::event::Envelope;

/// A processor's callback for a single payload type. Takes the payload by
/// reference rather than by value so a retry can redispatch the exact same
/// item without requiring `T: Clone`. `Any` lets a strategy that only knows
/// `T` generically (not the handler's concrete type) still check a
/// previously-proven `TypeId` against it.
pub trait EventHandler<T>: Send + Sync + Any {
    fn handle(&self, event: &T) -> Result<()>;
}

/// Bridges a dequeued [`Envelope`] to zero or more registered handlers.
/// Implementations differ in how they resolve *which* handlers run for a
/// given callback type; both install the replay-time override on the
/// hosting agent's clock when the envelope carries one.
///
/// `register_processor`/`deregister_processor` are idempotent: registering
/// the same `Arc` twice (by pointer identity) leaves the handler set
/// unchanged, and deregistering a handler that isn't present is a no-op.
/// Both return whether they actually changed anything.
pub trait InvocationStrategy<T>: Send + Sync {
    fn invoke(&self, clock: &AgentClock, envelope: &Envelope<T>) -> Result<()>;

    fn register_processor(&self, handler: Arc<dyn EventHandler<T>>) -> bool;

    fn deregister_processor(&self, handler: &Arc<dyn EventHandler<T>>) -> bool;

    fn count(&self) -> usize;
}

/// Dispatches to every handler subscribed under the generic `onEvent`
/// contract, in registration order.
pub struct GenericOnEventStrategy<T> {
    handlers: RwLock<Vec<Arc<dyn EventHandler<T>>>>,
}

impl<T> GenericOnEventStrategy<T> {
    pub fn new(handlers: Vec<Arc<dyn EventHandler<T>>>) -> Self {
        Self {
            handlers: RwLock::new(handlers),
        }
    }
}

impl<T: Send + Sync + 'static> InvocationStrategy<T> for GenericOnEventStrategy<T> {
    fn invoke(&self, clock: &AgentClock, envelope: &Envelope<T>) -> Result<()> {
        run_with_replay_clock(clock, envelope, || {
            for handler in self.handlers.read().iter() {
                handler.handle(envelope.payload())?;
            }
            Ok(())
        })
    }

    fn register_processor(&self, handler: Arc<dyn EventHandler<T>>) -> bool {
        let mut handlers = self.handlers.write();
        if handlers.iter().any(|h| Arc::ptr_eq(h, &handler)) {
            return false;
        }
        handlers.push(handler);
        true
    }

    fn deregister_processor(&self, handler: &Arc<dyn EventHandler<T>>) -> bool {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|h| !Arc::ptr_eq(h, handler));
        handlers.len() != before
    }

    fn count(&self) -> usize {
        self.handlers.read().len()
    }
}

/// Proof that a concrete handler type is eligible for the typed-interface
/// dispatch tagged `C`. Rust has no runtime `instanceof`, so this is checked
/// at compile time, at the one call site — [`TypedInterfaceStrategy::register_typed`]
/// — that still knows the handler's concrete type; a type that never
/// implements `Capability<C>` simply cannot be passed there.
pub trait Capability<C>: Send + Sync {}

/// Dispatches only to handlers that were registered under a specific
/// typed-interface capability. Registration has two paths: `register_typed`
/// is the real, compile-time-enforced entry point (only a type that
/// implements `Capability<C>` for this `T` can be passed to it), which also
/// remembers the concrete type's `TypeId`; the uniform, type-erased
/// `register_processor` required by [`InvocationStrategy`] then re-checks a
/// handler's `TypeId` against that remembered set, so code that only knows
/// `T` generically (the flow manager, an agent) still gets a real runtime
/// eligibility check rather than silently accepting anything.
pub struct TypedInterfaceStrategy<C, T> {
    handlers: RwLock<Vec<Arc<dyn EventHandler<T>>>>,
    allowed_types: RwLock<HashSet<TypeId>>,
    _capability: PhantomData<fn() -> C>,
}

impl<C, T> Default for TypedInterfaceStrategy<C, T> {
    fn default() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
            allowed_types: RwLock::new(HashSet::new()),
            _capability: PhantomData,
        }
    }
}

impl<C, T> TypedInterfaceStrategy<C, T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// The only entry point the type system actually gates: `H` must
    /// implement both `EventHandler<T>` and `Capability<C>` to compile.
    pub fn register_typed<H>(&self, handler: Arc<H>) -> bool
    where
        H: EventHandler<T> + Capability<C> + 'static,
    {
        self.allowed_types.write().insert(TypeId::of::<H>());
        let handler: Arc<dyn EventHandler<T>> = handler;
        let mut handlers = self.handlers.write();
        if handlers.iter().any(|h| Arc::ptr_eq(h, &handler)) {
            return false;
        }
        handlers.push(handler);
        true
    }
}

impl<C: Send + Sync + 'static, T: Send + Sync + 'static> InvocationStrategy<T>
    for TypedInterfaceStrategy<C, T>
{
    fn invoke(&self, clock: &AgentClock, envelope: &Envelope<T>) -> Result<()> {
        run_with_replay_clock(clock, envelope, || {
            for handler in self.handlers.read().iter() {
                handler.handle(envelope.payload())?;
            }
            Ok(())
        })
    }

    /// Only accepts a type-erased handler whose concrete type was already
    /// proven eligible via `register_typed`; anything else is rejected.
    fn register_processor(&self, handler: Arc<dyn EventHandler<T>>) -> bool {
        if !self.allowed_types.read().contains(&(*handler).type_id()) {
            return false;
        }
        let mut handlers = self.handlers.write();
        if handlers.iter().any(|h| Arc::ptr_eq(h, &handler)) {
            return false;
        }
        handlers.push(handler);
        true
    }

    fn deregister_processor(&self, handler: &Arc<dyn EventHandler<T>>) -> bool {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|h| !Arc::ptr_eq(h, handler));
        handlers.len() != before
    }

    fn count(&self) -> usize {
        self.handlers.read().len()
    }
}

fn run_with_replay_clock<T>(
    clock: &AgentClock,
    envelope: &Envelope<T>,
    f: impl FnOnce() -> Result<()>,
) -> Result<()> {
    match envelope.wall_clock_time_micros() {
        Some(micros) => clock.with_override(micros, f),
        None => f(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler(Arc<AtomicUsize>);
    impl EventHandler<u32> for CountingHandler {
        fn handle(&self, event: &u32) -> Result<()> {
            self.0.fetch_add(*event as usize, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn generic_strategy_invokes_every_handler() {
        let count = Arc::new(AtomicUsize::new(0));
        let strategy = GenericOnEventStrategy::new(vec![
            Arc::new(CountingHandler(count.clone())),
            Arc::new(CountingHandler(count.clone())),
        ]);
        let clock = AgentClock::new();
        strategy.invoke(&clock, &Envelope::Raw(5)).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn replay_envelope_installs_clock_override_during_dispatch() {
        struct AssertingHandler(Arc<AtomicUsize>);
        impl EventHandler<u32> for AssertingHandler {
            fn handle(&self, _event: &u32) -> Result<()> {
                Ok(())
            }
        }
        let clock = AgentClock::new();
        let strategy = GenericOnEventStrategy::new(vec![Arc::new(AssertingHandler(Arc::new(
            AtomicUsize::new(0),
        )))]);
        let envelope = Envelope::Replay {
            payload: 1u32,
            wall_clock_time_micros: 999,
        };
        let seen = std::cell::Cell::new(0i64);
        let _ = strategy.invoke(&clock, &envelope);
        // After invoke returns, the override must be cleared again.
        seen.set(clock.now_micros());
        assert_ne!(seen.get(), 999);
    }

    #[test]
    fn generic_strategy_register_and_deregister_are_idempotent() {
        let strategy: GenericOnEventStrategy<u32> = GenericOnEventStrategy::new(Vec::new());
        let handler: Arc<dyn EventHandler<u32>> = Arc::new(CountingHandler(Arc::new(AtomicUsize::new(0))));

        assert!(strategy.register_processor(handler.clone()));
        assert_eq!(strategy.count(), 1);
        assert!(!strategy.register_processor(handler.clone()));
        assert_eq!(strategy.count(), 1);

        assert!(strategy.deregister_processor(&handler));
        assert_eq!(strategy.count(), 0);
        assert!(!strategy.deregister_processor(&handler));
    }

    struct Billing;

    struct BillingHandler(Arc<AtomicUsize>);
    impl EventHandler<u32> for BillingHandler {
        fn handle(&self, event: &u32) -> Result<()> {
            self.0.fetch_add(*event as usize, Ordering::SeqCst);
            Ok(())
        }
    }
    impl Capability<Billing> for BillingHandler {}

    struct OtherHandler(Arc<AtomicUsize>);
    impl EventHandler<u32> for OtherHandler {
        fn handle(&self, event: &u32) -> Result<()> {
            self.0.fetch_add(*event as usize, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn typed_interface_strategy_only_dispatches_to_proven_capability_handlers() {
        let strategy: TypedInterfaceStrategy<Billing, u32> = TypedInterfaceStrategy::new();
        let count = Arc::new(AtomicUsize::new(0));
        let billing = Arc::new(BillingHandler(count.clone()));
        assert!(strategy.register_typed(billing.clone()));

        let clock = AgentClock::new();
        strategy.invoke(&clock, &Envelope::Raw(3)).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(strategy.count(), 1);
    }

    #[test]
    fn typed_interface_strategy_rejects_an_unproven_type_via_register_processor() {
        let strategy: TypedInterfaceStrategy<Billing, u32> = TypedInterfaceStrategy::new();
        let billing = Arc::new(BillingHandler(Arc::new(AtomicUsize::new(0))));
        assert!(strategy.register_typed(billing));

        // OtherHandler never went through register_typed, so even though
        // register_processor takes any type-erased EventHandler<u32>, its
        // TypeId was never recorded as eligible and it is rejected.
        let other: Arc<dyn EventHandler<u32>> = Arc::new(OtherHandler(Arc::new(AtomicUsize::new(0))));
        assert!(!strategy.register_processor(other));
        assert_eq!(strategy.count(), 1);
    }
}
