//! Event payload marker trait and the wrapper/envelope types the flow
//! manager uses to carry a payload from publisher to reader.

use std::sync::Arc;

use crate::error::Result;

/// Marker trait for anything that can travel through a target queue.
///
/// `release_pool_reference` defaults to a no-op; only
/// [`crate::pool::Pooled`] overrides it, to drop its fan-out reference (and
/// return the slot to its pool once the last one is gone) the instant a
/// reader dequeues it — before dispatch runs, not after. This is a manual
/// per-type opt-in rather than a blanket impl, because Rust has no
/// specialization to let `Pooled<T>` override a blanket default.
pub trait Event: Send + Sync + 'static {
    /// Called by a publisher's fan-out loop immediately before each target
    /// queue receives its copy, once per live target. Defaults to a no-op;
    /// [`crate::pool::Pooled`] overrides it to add one outstanding
    /// reference per target so the pool only returns the slot once every
    /// target (and the owner) has released.
    fn acquire_pool_reference(&self) -> Result<()> {
        Ok(())
    }

    fn release_pool_reference(&self) -> Result<()> {
        Ok(())
    }
}

macro_rules! impl_event_for_plain_type {
    ($($ty:ty),* $(,)?) => {
        $(impl Event for $ty {})*
    };
}

impl_event_for_plain_type!(
    bool, char, String, u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, f32, f64
);

/// How a publisher wraps a raw payload before it reaches a target queue.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum WrapStrategy {
    SubscriptionNoWrap,
    SubscriptionNamedEvent,
    BroadcastNoWrap,
    BroadcastNamedEvent,
}

/// What happens when a target queue is full and a publish would block.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum SlowConsumerStrategy {
    Backoff,
    Disconnect,
    ExitProcess,
}

/// A payload tagged with the source it arrived on, used by the
/// `SUBSCRIPTION_NAMED_EVENT` / `BROADCAST_NAMED_EVENT` wrap strategies so a
/// fan-in processor can tell which source produced a given item. `sequence`
/// is assigned by the publisher and strictly increases with no gaps per
/// source, independent of how many targets the value fans out to.
#[derive(Debug)]
pub struct NamedFeedEvent<U> {
    pub source_name: Arc<str>,
    pub sequence: u64,
    pub payload: U,
}

impl<U> NamedFeedEvent<U> {
    pub fn new(source_name: Arc<str>, sequence: u64, payload: U) -> Self {
        Self {
            source_name,
            sequence,
            payload,
        }
    }
}

/// The four shapes an item can take on a target queue. Carrying the shape in
/// the enum (rather than always wrapping in `NamedFeedEvent`) keeps the
/// unwrapped, by-far-most-common case free of an extra allocation and field
/// lookup.
pub enum Envelope<U> {
    Raw(U),
    Named(Arc<NamedFeedEvent<U>>),
    Broadcast(U),
    /// A replayed item carrying the wall-clock time (microseconds since the
    /// epoch) it originally occurred at, so the receiving processor's clock
    /// can be overridden to that instant for the duration of the dispatch.
    Replay {
        payload: U,
        wall_clock_time_micros: i64,
    },
}

impl<U> Envelope<U> {
    /// `sequence` is only consulted for the `*_NAMED_EVENT` strategies; the
    /// publisher is responsible for handing out a strictly increasing value
    /// per source so `NamedFeedEvent::sequence` never has a gap.
    pub fn wrap(payload: U, strategy: WrapStrategy, source_name: &Arc<str>, sequence: u64) -> Self {
        match strategy {
            WrapStrategy::SubscriptionNoWrap | WrapStrategy::BroadcastNoWrap => {
                if matches!(strategy, WrapStrategy::BroadcastNoWrap) {
                    Envelope::Broadcast(payload)
                } else {
                    Envelope::Raw(payload)
                }
            }
            WrapStrategy::SubscriptionNamedEvent | WrapStrategy::BroadcastNamedEvent => Envelope::Named(
                Arc::new(NamedFeedEvent::new(source_name.clone(), sequence, payload)),
            ),
        }
    }

    /// Borrows the inner payload regardless of the wrapping shape.
    pub fn payload(&self) -> &U {
        match self {
            Envelope::Raw(p) | Envelope::Broadcast(p) => p,
            Envelope::Named(named) => &named.payload,
            Envelope::Replay { payload, .. } => payload,
        }
    }

    pub fn wall_clock_time_micros(&self) -> Option<i64> {
        match self {
            Envelope::Replay {
                wall_clock_time_micros,
                ..
            } => Some(*wall_clock_time_micros),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_wrap_roundtrips_payload() {
        let src: Arc<str> = Arc::from("orders");
        let env = Envelope::wrap(42u32, WrapStrategy::SubscriptionNoWrap, &src, 0);
        assert_eq!(*env.payload(), 42);
        assert!(matches!(env, Envelope::Raw(_)));
    }

    #[test]
    fn named_wrap_carries_source_and_sequence() {
        let src: Arc<str> = Arc::from("orders");
        let env = Envelope::wrap(7u32, WrapStrategy::SubscriptionNamedEvent, &src, 3);
        match env {
            Envelope::Named(named) => {
                assert_eq!(&*named.source_name, "orders");
                assert_eq!(named.sequence, 3);
                assert_eq!(named.payload, 7);
            }
            _ => panic!("expected Named"),
        }
    }

    #[test]
    fn replay_exposes_wall_clock_time() {
        let env = Envelope::Replay {
            payload: 1u32,
            wall_clock_time_micros: 1234,
        };
        assert_eq!(env.wall_clock_time_micros(), Some(1234));
    }
}
