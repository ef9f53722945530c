//! Lock-free-ish partitioned object pool for reusable event payloads.
//!
//! Partitioning avoids a single contended free list: each calling thread
//! hashes to a home partition and only falls back to stealing from another
//! partition when its own is empty, the same trade Agrona-style pools make
//! for MPMC acquire/release under contention.

mod tracker;

pub use tracker::PoolTracker;

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_queue::ArrayQueue;
use parking_lot::Mutex;

use crate::event::Event;

/// A pooled value shared across every target queue a publish fanned out to.
/// Implements [`Event`] by exposing its tracker, overriding the blanket
/// `None` default so the reader knows to release/return it.
pub struct Pooled<T> {
    inner: Arc<PooledInner<T>>,
}

impl<T> Clone for Pooled<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

pub(crate) struct PooledInner<T> {
    value: Mutex<T>,
    tracker: PoolTracker,
    partition: usize,
    pool: Arc<PoolShared<T>>,
}

impl<T> Pooled<T> {
    /// Runs `f` against the current value under the pool's internal lock.
    /// A lock (rather than raw unsafe mutation) keeps `reset` memory-safe
    /// across the window between a reader releasing its reference and the
    /// value actually landing back on the free list.
    pub fn with_value<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.inner.value.lock())
    }

    pub fn tracker(&self) -> &PoolTracker {
        &self.inner.tracker
    }
}

impl<T: Send + Sync + 'static> Event for Pooled<T> {
    fn acquire_pool_reference(&self) -> crate::error::Result<()> {
        self.inner.tracker.acquire_additional_reference();
        Ok(())
    }

    fn release_pool_reference(&self) -> crate::error::Result<()> {
        self.release()
    }
}

struct PoolShared<T> {
    partitions: Vec<ArrayQueue<Arc<PooledInner<T>>>>,
    factory: Box<dyn Fn() -> T + Send + Sync>,
    reset: Box<dyn Fn(&mut T) + Send + Sync>,
    created: AtomicU64,
    acquired: AtomicU64,
    returned: AtomicU64,
}

/// A fixed-size, typed pool of reusable values.
pub struct Pool<T> {
    shared: Arc<PoolShared<T>>,
}

impl<T> Clone for Pool<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

fn home_partition(partitions: usize) -> usize {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    std::thread::current().id().hash(&mut hasher);
    (hasher.finish() as usize) % partitions.max(1)
}

impl<T: Send + Sync + 'static> Pool<T> {
    /// `capacity` is the total number of reusable slots, spread across
    /// `num_cpus::get()` partitions (minimum one).
    pub fn new(
        capacity: usize,
        factory: impl Fn() -> T + Send + Sync + 'static,
        reset: impl Fn(&mut T) + Send + Sync + 'static,
    ) -> Self {
        let partition_count = num_cpus::get().max(1);
        let per_partition = (capacity / partition_count).max(1);
        let partitions = (0..partition_count)
            .map(|_| ArrayQueue::new(per_partition))
            .collect();
        Self {
            shared: Arc::new(PoolShared {
                partitions,
                factory: Box::new(factory),
                reset: Box::new(reset),
                created: AtomicU64::new(0),
                acquired: AtomicU64::new(0),
                returned: AtomicU64::new(0),
            }),
        }
    }

    /// Takes a slot off the free list (creating a fresh one if every
    /// partition is empty) and primes it with `reference_count` outstanding
    /// references — one per target queue the caller is about to publish to.
    pub fn acquire(&self, reference_count: i64) -> Pooled<T> {
        self.shared.acquired.fetch_add(1, Ordering::Relaxed);
        let partitions = self.shared.partitions.len();
        let home = home_partition(partitions);

        let inner = self.shared.partitions[home].pop().or_else(|| {
            (0..partitions)
                .filter(|p| *p != home)
                .find_map(|p| self.shared.partitions[p].pop())
        });

        let inner = inner.unwrap_or_else(|| {
            self.shared.created.fetch_add(1, Ordering::Relaxed);
            Arc::new(PooledInner {
                value: Mutex::new((self.shared.factory)()),
                tracker: PoolTracker::new(),
                partition: home,
                pool: self.shared.clone(),
            })
        });

        inner.tracker.set_initial_references(reference_count);
        Pooled { inner }
    }

    /// Resets and returns a slot to its home partition's free list. Called
    /// by whichever release drops the tracker's count to zero.
    pub(crate) fn give_back(&self, inner: Arc<PooledInner<T>>) {
        inner.tracker.mark_returned().ok();
        (self.shared.reset)(&mut inner.value.lock());
        self.shared.returned.fetch_add(1, Ordering::Relaxed);
        let partition = inner.partition;
        // Free-list full (capacity overcommitted by prior burst): drop it,
        // a fresh slot is cheaper than blocking a release on a full queue.
        let _ = self.shared.partitions[partition].push(inner);
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            created: self.shared.created.load(Ordering::Relaxed),
            acquired: self.shared.acquired.load(Ordering::Relaxed),
            returned: self.shared.returned.load(Ordering::Relaxed),
            free: self.shared.partitions.iter().map(|p| p.len() as u64).sum(),
        }
    }
}

impl<T: Send + Sync + 'static> Pooled<T> {
    /// Releases this handle's reference; if it was the last one outstanding,
    /// resets the value and returns it to its home pool.
    pub fn release(&self) -> crate::error::Result<()> {
        if self.inner.tracker.release()? {
            let pool = Pool {
                shared: self.inner.pool.clone(),
            };
            pool.give_back(self.inner.clone());
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct PoolStats {
    pub created: u64,
    pub acquired: u64,
    pub returned: u64,
    pub free: u64,
}

/// Type-erased registry of pools, keyed by payload type, so the flow manager
/// can look one up without every caller threading a generic parameter
/// through registration.
#[derive(Default)]
pub struct PoolRegistry {
    pools: Mutex<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl PoolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: Send + Sync + 'static>(&self, pool: Pool<T>) {
        self.pools
            .lock()
            .insert(TypeId::of::<T>(), Arc::new(pool));
    }

    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Pool<T>> {
        self.pools
            .lock()
            .get(&TypeId::of::<T>())
            .and_then(|p| p.clone().downcast::<Pool<T>>().ok())
            .map(|p| (*p).clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_reuses_released_slot() {
        let pool: Pool<String> = Pool::new(4, String::new, |s| s.clear());
        let a = pool.acquire(1);
        a.with_value(|s| s.push_str("hello"));
        a.release().unwrap();
        assert_eq!(pool.stats().returned, 1);

        let b = pool.acquire(1);
        b.with_value(|s| assert_eq!(s.as_str(), ""));
        b.release().unwrap();
    }

    #[test]
    fn release_only_returns_on_last_reference() {
        let pool: Pool<Vec<u8>> = Pool::new(4, Vec::new, |v| v.clear());
        let a = pool.acquire(2);
        a.release().unwrap();
        assert_eq!(pool.stats().returned, 0);
        a.release().unwrap();
        assert_eq!(pool.stats().returned, 1);
    }

    #[test]
    fn registry_roundtrips_typed_pool() {
        let registry = PoolRegistry::new();
        registry.register(Pool::<u32>::new(2, || 0u32, |v| *v = 0));
        let pool = registry.get::<u32>().expect("pool registered");
        let handle = pool.acquire(1);
        handle.with_value(|v| *v = 5);
        handle.release().unwrap();
    }
}
