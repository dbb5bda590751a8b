//! Fixed set of reactors, one per worker.

use crate::reactor::Reactor;

/// Ordered reactors indexed by worker id.
///
/// Reactor 0 is initialized standalone; the rest attach to its kernel
/// worker pool so all rings share one set of kernel workers. The mapping
/// `worker_id -> reactor` is fixed once the pool is built.
pub struct ReactorPool {
    reactors: Box<[Reactor]>,
}

impl ReactorPool {
    /// Build `size` reactors of the given submission queue depth.
    ///
    /// # Panics
    ///
    /// Panics if `size` is zero. Aborts the process if ring setup fails.
    pub fn new(size: usize, depth: u32) -> ReactorPool {
        assert!(size > 0, "reactor pool needs at least one reactor");
        let mut reactors = Vec::with_capacity(size);
        reactors.push(Reactor::new(depth));
        for _ in 1..size {
            let reactor = Reactor::attached(depth, &reactors[0]);
            reactors.push(reactor);
        }
        ReactorPool {
            reactors: reactors.into_boxed_slice(),
        }
    }

    /// The reactor owned by `worker_id`.
    pub fn get(&self, worker_id: usize) -> &Reactor {
        &self.reactors[worker_id]
    }

    pub fn len(&self) -> usize {
        self.reactors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reactors.is_empty()
    }
}
