//! Lazy one-shot coroutine values.
//!
//! A [`Task`] owns a pinned, heap-allocated coroutine frame and runs nothing
//! until first polled. Awaiting a task drives the frame in place (the child
//! is polled inside the parent's poll, so nesting never grows the stack) and
//! yields the result exactly once. A panic inside the body is captured at
//! the frame boundary and rethrown at the point the result is observed; it
//! never unwinds through the executor.
//!
//! [`Task::detach`] surrenders the frame as a type-erased [`RawTask`] so the
//! worker pool can own, resume, and finally drop it without knowing the
//! output type.

use std::any::Any;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::task::{Context, Poll};

/// Payload of a panic that escaped a task body.
pub type PanicPayload = Box<dyn Any + Send + 'static>;

enum FrameState<T> {
    /// Body created but not yet run to completion. Lazy: nothing executes
    /// until the first poll.
    Pending(Pin<Box<dyn Future<Output = T> + 'static>>),
    /// Body finished; result (or captured panic) waiting to be taken.
    Done(Result<T, PanicPayload>),
    /// Result handed out. Polling again is a caller bug.
    Taken,
}

struct Core<T> {
    state: FrameState<T>,
}

impl<T> Core<T> {
    /// Drive the frame one step. Returns true once the body has finished.
    fn step(&mut self, cx: &mut Context<'_>) -> bool {
        let FrameState::Pending(fut) = &mut self.state else {
            return true;
        };
        let polled = panic::catch_unwind(AssertUnwindSafe(|| fut.as_mut().poll(cx)));
        match polled {
            Ok(Poll::Pending) => false,
            Ok(Poll::Ready(value)) => {
                self.state = FrameState::Done(Ok(value));
                true
            }
            Err(payload) => {
                self.state = FrameState::Done(Err(payload));
                true
            }
        }
    }

    fn is_done(&self) -> bool {
        !matches!(self.state, FrameState::Pending(_))
    }

    fn take_result(&mut self) -> Result<T, PanicPayload> {
        match std::mem::replace(&mut self.state, FrameState::Taken) {
            FrameState::Done(result) => result,
            FrameState::Taken => panic!("task result taken twice"),
            FrameState::Pending(_) => panic!("task result taken before completion"),
        }
    }
}

/// A lazy, one-shot asynchronous computation producing a `T`.
///
/// Construct with [`Task::new`]; obtain the value by awaiting the task or
/// by driving it with [`Reactor::run_until_done`](crate::Reactor::run_until_done)
/// or [`sync_wait`](crate::sync_wait). A task must be awaited at most once.
#[must_use = "a task does nothing until polled"]
pub struct Task<T = ()> {
    core: Core<T>,
}

impl<T> Task<T> {
    /// Wrap a coroutine body. The body does not run until the task is
    /// first polled.
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = T> + 'static,
    {
        Task {
            core: Core {
                state: FrameState::Pending(Box::pin(future)),
            },
        }
    }

    /// Whether the body has run to completion.
    pub fn is_done(&self) -> bool {
        self.core.is_done()
    }

    /// Surrender frame ownership to the caller as a type-erased handle.
    ///
    /// The returned [`RawTask`] is responsible for dropping the frame; the
    /// task's result is discarded when the handle is dropped.
    pub fn detach(self) -> RawTask
    where
        T: 'static,
    {
        RawTask {
            core: Box::new(self.core),
        }
    }
}

// The frame itself is heap-pinned; the handle moves freely.
impl<T> Unpin for Task<T> {}

impl<T> Future for Task<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        let this = self.get_mut();
        if this.core.step(cx) {
            match this.core.take_result() {
                Ok(value) => Poll::Ready(value),
                Err(payload) => panic::resume_unwind(payload),
            }
        } else {
            Poll::Pending
        }
    }
}

/// Object-safe view of a task frame, independent of its output type.
trait DynFrame {
    fn resume(&mut self, cx: &mut Context<'_>) -> bool;
    fn is_done(&self) -> bool;
    fn take_panic(&mut self) -> Option<PanicPayload>;
}

impl<T> DynFrame for Core<T> {
    fn resume(&mut self, cx: &mut Context<'_>) -> bool {
        self.step(cx)
    }

    fn is_done(&self) -> bool {
        self.is_done()
    }

    fn take_panic(&mut self) -> Option<PanicPayload> {
        match std::mem::replace(&mut self.state, FrameState::Taken) {
            FrameState::Done(Err(payload)) => Some(payload),
            FrameState::Done(Ok(_)) | FrameState::Taken => None,
            // Still pending: put the frame back untouched.
            state @ FrameState::Pending(_) => {
                self.state = state;
                None
            }
        }
    }
}

/// A detached task frame. Owns the frame; dropping it releases the frame
/// even if the body never ran.
pub struct RawTask {
    core: Box<dyn DynFrame>,
}

impl RawTask {
    /// Resume the frame once. Returns true when the body has finished.
    pub(crate) fn resume(&mut self, cx: &mut Context<'_>) -> bool {
        self.core.resume(cx)
    }

    pub(crate) fn is_done(&self) -> bool {
        self.core.is_done()
    }

    /// Take the captured panic of a finished body, if any.
    pub(crate) fn take_panic(&mut self) -> Option<PanicPayload> {
        self.core.take_panic()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;
    use std::task::Waker;

    fn poll_once<T>(task: &mut Task<T>) -> Poll<T> {
        let waker = Waker::noop();
        let mut cx = Context::from_waker(waker);
        Pin::new(task).poll(&mut cx)
    }

    #[test]
    fn body_is_lazy() {
        let ran = Rc::new(Cell::new(false));
        let flag = ran.clone();
        let mut task = Task::new(async move {
            flag.set(true);
            5
        });
        assert!(!ran.get());
        assert!(!task.is_done());
        assert_eq!(poll_once(&mut task), Poll::Ready(5));
        assert!(ran.get());
    }

    #[test]
    fn awaiting_yields_value_exactly_once() {
        let mut task = Task::new(async { 42 });
        assert_eq!(poll_once(&mut task), Poll::Ready(42));
        assert!(task.is_done());
    }

    #[test]
    #[should_panic(expected = "taken twice")]
    fn second_await_is_rejected() {
        let mut task = Task::new(async { 1 });
        let _ = poll_once(&mut task);
        let _ = poll_once(&mut task);
    }

    #[test]
    fn nested_await_transfers_through_child() {
        let mut outer = Task::new(async {
            let inner = Task::new(async { 7 });
            inner.await * 2
        });
        assert_eq!(poll_once(&mut outer), Poll::Ready(14));
    }

    #[test]
    fn panic_is_captured_and_rethrown_at_await() {
        let mut task = Task::new(async {
            panic!("boom in body");
        });
        let caught = panic::catch_unwind(AssertUnwindSafe(|| poll_once(&mut task)));
        let payload = caught.unwrap_err();
        let msg = payload.downcast_ref::<&str>().copied().unwrap_or("");
        assert_eq!(msg, "boom in body");
    }

    #[test]
    fn detached_frame_is_driven_and_reports_panics() {
        let mut raw = Task::new(async { 3usize }).detach();
        let waker = Waker::noop();
        let mut cx = Context::from_waker(waker);
        assert!(raw.resume(&mut cx));
        assert!(raw.is_done());
        assert!(raw.take_panic().is_none());

        let mut raw = Task::new(async {
            panic!("handler failed");
        })
        .detach();
        assert!(raw.resume(&mut cx));
        assert!(raw.take_panic().is_some());
    }

    #[test]
    fn dropping_detached_frame_before_start_releases_it() {
        struct SetOnDrop(Rc<Cell<bool>>);
        impl Drop for SetOnDrop {
            fn drop(&mut self) {
                self.0.set(true);
            }
        }

        let dropped = Rc::new(Cell::new(false));
        let guard = SetOnDrop(dropped.clone());
        let raw = Task::new(async move {
            let _guard = guard;
        })
        .detach();
        assert!(!dropped.get());
        drop(raw);
        assert!(dropped.get());
    }
}
