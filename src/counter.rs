//! Sharded counters for hot-path metrics.
//!
//! Every worker increments its own shard, so counters touched on every
//! accepted connection or reaped completion never bounce a cache line
//! between cores. Reads sum across shards and are only as fresh as the
//! relaxed loads they are built from, which is all exposition needs.

use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};

const SLOTS: usize = 8;
const NUM_SHARDS: usize = 32;

thread_local! {
    /// Shard of the current thread; assigned by `set_thread_shard`, with a
    /// TLS-address hash fallback for non-worker threads.
    static SHARD: Cell<Option<usize>> = const { Cell::new(None) };
}

/// Pin the calling thread to a shard. Workers call this once at startup so
/// each worker owns a distinct shard.
pub fn set_thread_shard(id: usize) {
    SHARD.set(Some(id % NUM_SHARDS));
}

#[inline]
fn shard_index() -> usize {
    SHARD.get().unwrap_or_else(|| {
        thread_local! {
            static ANCHOR: u8 = const { 0 };
        }
        ANCHOR.with(|a| a as *const u8 as usize) % NUM_SHARDS
    })
}

#[repr(C, align(64))]
struct Shard {
    slots: [AtomicU64; SLOTS],
}

/// Storage for up to eight related counters, one shard per thread.
pub struct CounterGroup {
    shards: [Shard; NUM_SHARDS],
}

impl CounterGroup {
    #[allow(clippy::declare_interior_mutable_const)]
    pub const fn new() -> Self {
        const ZERO: AtomicU64 = AtomicU64::new(0);
        const EMPTY: Shard = Shard { slots: [ZERO; SLOTS] };
        CounterGroup {
            shards: [EMPTY; NUM_SHARDS],
        }
    }
}

impl Default for CounterGroup {
    fn default() -> Self {
        Self::new()
    }
}

/// One counter slot in a [`CounterGroup`], registrable with metriken.
pub struct Counter {
    group: &'static CounterGroup,
    slot: usize,
}

impl Counter {
    pub const fn new(group: &'static CounterGroup, slot: usize) -> Self {
        Counter { group, slot }
    }

    #[inline]
    pub fn increment(&self) {
        self.add(1);
    }

    #[inline]
    pub fn add(&self, value: u64) {
        debug_assert!(self.slot < SLOTS);
        self.group.shards[shard_index()].slots[self.slot].fetch_add(value, Ordering::Relaxed);
    }

    /// Sum across all shards.
    pub fn value(&self) -> u64 {
        self.group
            .shards
            .iter()
            .map(|shard| shard.slots[self.slot].load(Ordering::Relaxed))
            .sum()
    }
}

impl metriken::Metric for Counter {
    fn as_any(&self) -> Option<&dyn std::any::Any> {
        Some(self)
    }

    fn value(&self) -> Option<metriken::Value<'_>> {
        Some(metriken::Value::Counter(Counter::value(self)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn increment_and_add() {
        static GROUP: CounterGroup = CounterGroup::new();
        let counter = Counter::new(&GROUP, 0);
        counter.increment();
        counter.add(4);
        assert_eq!(counter.value(), 5);
    }

    #[test]
    fn slots_are_independent() {
        static GROUP: CounterGroup = CounterGroup::new();
        let a = Counter::new(&GROUP, 1);
        let b = Counter::new(&GROUP, 2);
        a.increment();
        b.add(3);
        assert_eq!(a.value(), 1);
        assert_eq!(b.value(), 3);
    }

    #[test]
    fn sums_across_threads() {
        static GROUP: CounterGroup = CounterGroup::new();
        let counter = Arc::new(Counter::new(&GROUP, 3));
        let handles: Vec<_> = (0..4)
            .map(|shard| {
                let counter = Arc::clone(&counter);
                thread::spawn(move || {
                    set_thread_shard(shard);
                    for _ in 0..500 {
                        counter.increment();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(counter.value(), 2000);
    }
}
