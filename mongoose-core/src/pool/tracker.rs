//! Explicit reference counting for pooled values.
//!
//! A pooled value is shared with every target queue its publisher fans out
//! to. It must return to the free list exactly once, only after every
//! queue's consumer has finished with it *and* the publish that enqueued the
//! last reference has completed. `Arc`'s own strong count cannot drive this:
//! the spec requires a reader to drop its "queued" reference the instant it
//! dequeues an item, before dispatch runs, so a slow processor never keeps a
//! pool entry checked out past the moment its last queue handed it off. A
//! plain `Arc::strong_count` decrement would instead fire at the end of the
//! dispatch (when the local `Arc` is dropped), which is too late. So the
//! tracker keeps its own atomic count, independent of how many `Arc` handles
//! happen to exist at any instant.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use crate::error::{MongooseError, Result};

/// Reference count plus a one-shot "returned to pool" guard for a single
/// pooled slot.
#[derive(Debug)]
pub struct PoolTracker {
    ref_count: AtomicI64,
    returned: AtomicBool,
}

impl Default for PoolTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolTracker {
    pub fn new() -> Self {
        Self {
            ref_count: AtomicI64::new(0),
            returned: AtomicBool::new(false),
        }
    }

    /// Called once per target queue a publish fans the value out to, before
    /// any queue is given its reference.
    pub fn set_initial_references(&self, count: i64) {
        self.ref_count.store(count, Ordering::Release);
        self.returned.store(false, Ordering::Release);
    }

    /// Adds one more outstanding reference on top of whatever is already
    /// live, for a target acquired after the initial count was set (a
    /// fan-out loop calls this once per live target immediately before
    /// handing it a copy).
    pub fn acquire_additional_reference(&self) {
        self.ref_count.fetch_add(1, Ordering::AcqRel);
    }

    /// A reader releases its reference the moment it dequeues the item, not
    /// when it finishes dispatching it. Returns `true` if this release
    /// dropped the count to zero, i.e. this caller is responsible for
    /// returning the slot to the pool.
    pub fn release(&self) -> Result<bool> {
        let previous = self.ref_count.fetch_sub(1, Ordering::AcqRel);
        if previous <= 0 {
            self.ref_count.fetch_add(1, Ordering::AcqRel);
            return Err(MongooseError::InvalidState(
                "pool tracker released more times than it was referenced",
            ));
        }
        Ok(previous == 1)
    }

    /// Marks the slot as returned to the free list. Returns an error if it
    /// was already returned, catching a double-free at the source.
    pub fn mark_returned(&self) -> Result<()> {
        if self.returned.swap(true, Ordering::AcqRel) {
            return Err(MongooseError::InvalidState(
                "pool tracker returned to the free list twice",
            ));
        }
        Ok(())
    }

    pub fn current_references(&self) -> i64 {
        self.ref_count.load(Ordering::Acquire)
    }
}
