//! Worker pool: fixed threads, one reactor each, fed by a shared MPMC ring.
//!
//! The listener enqueues a [`Session`] per accepted connection. Whichever
//! worker dequeues it binds its own reactor to the connection, resumes the
//! task, and keeps the frame in a thread-local live slab until it finishes.
//! Completion wakeups land on a thread-local ready queue (the reactor fires
//! each operation's waker in kernel completion order); after every reactor
//! batch the worker polls exactly the tasks that were woken. A frame never
//! migrates: the worker that dequeued it resumes it until it is done.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::task::{Context, RawWaker, RawWakerVTable, Waker};
use std::thread;

use slab::Slab;

use crate::error::Error;
use crate::metrics;
use crate::net::Connection;
use crate::pool::ReactorPool;
use crate::queue::BoundedQueue;
use crate::reactor::Reactor;
use crate::task::{PanicPayload, RawTask};

/// Default capacity of the session handoff ring.
pub const DEFAULT_SESSION_QUEUE_CAPACITY: u64 = 1024;

/// Handoff record for one accepted connection: the detached handler frame
/// plus a pointer to the connection it owns, so the dequeuing worker can
/// bind its reactor before the first resumption.
pub(crate) struct Session {
    pub(crate) task: RawTask,
    pub(crate) conn: *mut Connection,
}

// Safety: a session is built on the listener thread and consumed by exactly
// one worker. The frame has not been polled when it crosses the boundary,
// and `conn` points into storage owned by that same frame, so the receiving
// worker is the only side that ever touches either.
unsafe impl Send for Session {}

thread_local! {
    /// Worker id of the current thread; `None` off the worker threads.
    static WORKER_ID: Cell<Option<usize>> = const { Cell::new(None) };

    /// Live-slab keys of tasks woken since the last drain.
    static READY: RefCell<VecDeque<usize>> = const { RefCell::new(VecDeque::new()) };
}

/// Worker id of the calling thread, if it is a pool worker.
pub fn current_worker_id() -> Option<usize> {
    WORKER_ID.get()
}

struct Shared {
    /// Guarded together: workers wait on `available` for work or stop.
    stop: Mutex<bool>,
    available: Condvar,
}

/// Fixed-size set of worker threads servicing the session ring.
pub struct WorkerPool {
    sessions: Arc<BoundedQueue<Session>>,
    reactors: Arc<ReactorPool>,
    shared: Arc<Shared>,
    threads: Vec<thread::JoinHandle<Result<(), Error>>>,
}

impl WorkerPool {
    /// One worker per reactor in `reactors`; threads start on
    /// [`start`](Self::start).
    pub(crate) fn new(reactors: Arc<ReactorPool>, queue_capacity: u64) -> WorkerPool {
        WorkerPool {
            sessions: Arc::new(BoundedQueue::new(queue_capacity)),
            reactors,
            shared: Arc::new(Shared {
                stop: Mutex::new(false),
                available: Condvar::new(),
            }),
            threads: Vec::new(),
        }
    }

    /// Spawn the worker threads.
    pub(crate) fn start(&mut self) {
        for id in 0..self.reactors.len() {
            let sessions = Arc::clone(&self.sessions);
            let reactors = Arc::clone(&self.reactors);
            let shared = Arc::clone(&self.shared);
            let handle = thread::Builder::new()
                .name(format!("ringherd-worker-{id}"))
                .spawn(move || {
                    WORKER_ID.set(Some(id));
                    crate::counter::set_thread_shard(id);
                    worker_loop(id, &sessions, &reactors, &shared)
                })
                .expect("failed to spawn worker thread");
            self.threads.push(handle);
        }
    }

    /// Hand a session to whichever worker frees up first. Blocks only on
    /// the ring's own back-pressure step when it is full.
    pub(crate) fn submit(&self, session: Session) {
        self.sessions.push(session);
        metrics::SESSIONS_SUBMITTED.increment();
        self.shared.available.notify_one();
    }

    /// Request stop and join every worker. Queued sessions are still
    /// picked up, and live tasks run to their natural completion first.
    pub(crate) fn stop(&mut self) {
        *self.shared.stop.lock().unwrap() = true;
        self.shared.available.notify_all();
        for handle in self.threads.drain(..) {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log::error!("worker exited with error: {e}"),
                Err(_) => log::error!("worker thread panicked"),
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(
    id: usize,
    sessions: &BoundedQueue<Session>,
    reactors: &ReactorPool,
    shared: &Shared,
) -> Result<(), Error> {
    let reactor = reactors.get(id);
    let mut live: Slab<RawTask> = Slab::new();
    let mut ready = VecDeque::new();

    loop {
        {
            let mut stop = shared.stop.lock().unwrap();
            while !*stop && sessions.is_empty() {
                stop = shared.available.wait(stop).unwrap();
            }
            if *stop && sessions.is_empty() && live.is_empty() {
                return Ok(());
            }
        }

        drain_sessions(sessions, reactor, &mut live);

        // Drive live tasks until every frame on this worker finishes.
        // Reached regardless of whether the wakeup was a handoff or stop.
        while !live.is_empty() {
            if let Err(e) = reactor.wait_and_dispatch() {
                // The kernel may still hold token addresses inside these
                // frames; leak them rather than free live storage.
                std::mem::forget(live);
                return Err(e);
            }
            poll_ready(&mut live, &mut ready);
            // New handoffs may have arrived while parked in the kernel.
            drain_sessions(sessions, reactor, &mut live);
        }
    }
}

/// Pop every queued session, bind this worker's reactor, and give each
/// task its first resumption.
fn drain_sessions(sessions: &BoundedQueue<Session>, reactor: &Reactor, live: &mut Slab<RawTask>) {
    while let Some(session) = sessions.try_pop() {
        let Session { task, conn } = session;
        // Safety: `conn` points into the frame owned by `task`; the frame
        // has not run yet, so this worker holds the only reference.
        unsafe { (*conn).bind_reactor(reactor) };
        let key = live.insert(task);
        resume(live, key);
    }
}

/// Poll every task woken since the last reactor batch.
fn poll_ready(live: &mut Slab<RawTask>, scratch: &mut VecDeque<usize>) {
    READY.with(|queue| scratch.append(&mut queue.borrow_mut()));
    while let Some(key) = scratch.pop_front() {
        resume(live, key);
    }
}

/// Resume one live task; retire the frame when it finishes.
fn resume(live: &mut Slab<RawTask>, key: usize) {
    let waker = live_waker(key);
    let mut cx = Context::from_waker(&waker);
    let done = match live.get_mut(key) {
        Some(task) => task.resume(&mut cx),
        None => return,
    };
    if done {
        let mut task = live.remove(key);
        metrics::TASKS_COMPLETED.increment();
        if let Some(payload) = task.take_panic() {
            metrics::HANDLER_PANICS.increment();
            log::error!("connection handler panicked: {}", panic_message(&payload));
        }
    }
}

fn panic_message(payload: &PanicPayload) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}

/// Waker for the live task at `key`: waking pushes the key onto the
/// thread-local ready queue. No allocation; the key is the waker data.
///
/// Only meaningful on the worker thread that owns the slab, which is the
/// only place the reactor ever fires it.
fn live_waker(key: usize) -> Waker {
    // Safety: the vtable functions below uphold the RawWaker contract; the
    // data pointer is a plain usize, never dereferenced.
    unsafe { Waker::from_raw(RawWaker::new(key as *const (), &VTABLE)) }
}

const VTABLE: RawWakerVTable = RawWakerVTable::new(clone_fn, wake_fn, wake_by_ref_fn, drop_fn);

unsafe fn clone_fn(data: *const ()) -> RawWaker {
    RawWaker::new(data, &VTABLE)
}

unsafe fn wake_fn(data: *const ()) {
    unsafe { wake_by_ref_fn(data) };
}

unsafe fn wake_by_ref_fn(data: *const ()) {
    let key = data as usize;
    READY.with(|queue| queue.borrow_mut().push_back(key));
}

unsafe fn drop_fn(_data: *const ()) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn waker_enqueues_key() {
        READY.with(|q| q.borrow_mut().clear());

        let waker = live_waker(9);
        waker.wake_by_ref();
        waker.clone().wake();

        let mut drained = VecDeque::new();
        READY.with(|q| drained.append(&mut q.borrow_mut()));
        assert_eq!(drained, VecDeque::from([9, 9]));
    }

    #[test]
    fn worker_id_unset_off_workers() {
        assert_eq!(current_worker_id(), None);
    }
}
