//! Block the calling thread on an asynchronous value.

use std::future::Future;
use std::sync::{Arc, Condvar, Mutex};
use std::task::{Context, Poll, Wake, Waker};

/// One-shot event pairing a mutex-guarded flag with a condvar.
struct WaitEvent {
    done: Mutex<bool>,
    cv: Condvar,
}

impl WaitEvent {
    fn new() -> WaitEvent {
        WaitEvent {
            done: Mutex::new(false),
            cv: Condvar::new(),
        }
    }

    fn set(&self) {
        *self.done.lock().unwrap() = true;
        self.cv.notify_all();
    }

    fn wait_and_reset(&self) {
        let mut done = self.done.lock().unwrap();
        while !*done {
            done = self.cv.wait(done).unwrap();
        }
        *done = false;
    }
}

impl Wake for WaitEvent {
    fn wake(self: Arc<Self>) {
        self.set();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.set();
    }
}

/// Run `future` to completion, blocking the calling thread between polls.
///
/// The future is polled with a waker that signals an internal event; any
/// thread may fire it. Returns the value by move; a panic captured by a
/// [`Task`](crate::Task) body resurfaces here.
pub fn sync_wait<F: Future>(future: F) -> F::Output {
    let mut future = std::pin::pin!(future);
    let event = Arc::new(WaitEvent::new());
    let waker = Waker::from(Arc::clone(&event));
    let mut cx = Context::from_waker(&waker);

    loop {
        match future.as_mut().poll(&mut cx) {
            Poll::Ready(value) => return value,
            Poll::Pending => event.wait_and_reset(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Task;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::{Duration, Instant};

    #[test]
    fn returns_task_value() {
        assert_eq!(sync_wait(Task::new(async { 42 })), 42);
    }

    #[test]
    fn returns_plain_future_value() {
        assert_eq!(sync_wait(async { "done" }), "done");
    }

    /// Pending until another thread stores the value and fires the waker.
    struct CrossThread {
        state: Arc<(Mutex<(Option<u32>, Option<Waker>)>, AtomicBool)>,
    }

    impl Future for CrossThread {
        type Output = u32;

        fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<u32> {
            let mut guard = self.state.0.lock().unwrap();
            if let Some(value) = guard.0.take() {
                Poll::Ready(value)
            } else {
                guard.1 = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }

    #[test]
    fn blocks_until_completion() {
        let state = Arc::new((Mutex::new((None, None)), AtomicBool::new(false)));
        let producer_state = Arc::clone(&state);

        let producer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            let mut guard = producer_state.0.lock().unwrap();
            guard.0 = Some(7);
            let waker: Option<Waker> = guard.1.take();
            drop(guard);
            producer_state.1.store(true, Ordering::Release);
            if let Some(waker) = waker {
                waker.wake();
            }
        });

        let started = Instant::now();
        let value = sync_wait(CrossThread {
            state: Arc::clone(&state),
        });
        producer.join().unwrap();

        assert_eq!(value, 7);
        assert!(state.1.load(Ordering::Acquire));
        assert!(started.elapsed() >= Duration::from_millis(50));
    }
}
