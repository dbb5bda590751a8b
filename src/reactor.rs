//! Single-owner io_uring reactor.
//!
//! A [`Reactor`] owns one submission/completion queue pair and exposes each
//! supported kernel operation as a suspendable future resolving to the raw
//! signed result (bytes transferred, fd, or `-errno`). All submissions and
//! reaps happen on the owning thread; the only cross-thread call is
//! [`Reactor::ring_fd`], used while the pool is being assembled.
//!
//! Every operation carries an [`OpToken`] inside its future. On first poll
//! the token's address is registered as the SQE's user_data; when the CQE
//! arrives, [`Reactor::wait_and_dispatch`] writes the result through that
//! address and fires the stored waker. The token must therefore stay put
//! between submission and completion, which holds because the future is
//! pinned inside its task frame from the first poll onward.

use std::cell::RefCell;
use std::ffi::CStr;
use std::future::Future;
use std::marker::PhantomPinned;
use std::os::fd::{AsRawFd, RawFd};
use std::pin::Pin;
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use io_uring::types::{Fd, FsyncFlags, Timespec};
use io_uring::{IoUring, opcode, squeue};

use crate::error::Error;
use crate::metrics;

/// Default submission queue depth.
pub const DEFAULT_RING_DEPTH: u32 = 64;

/// Completion record for one in-flight operation.
///
/// Lives inside the suspended future's frame; the kernel carries its
/// address back on the CQE as opaque user_data.
struct OpToken {
    result: i32,
    complete: bool,
    waker: Option<Waker>,
}

/// Suspendable kernel operation. Resolves to the raw completion result.
///
/// Must be driven to completion before being dropped: once submitted, the
/// kernel holds the token address until the CQE is reaped.
#[must_use = "an io operation does nothing until awaited"]
pub struct OpFuture<'r> {
    reactor: &'r Reactor,
    /// Pending SQE; taken at first poll, once the token address is final.
    entry: Option<squeue::Entry>,
    /// Owned path storage referenced by openat/statx entries.
    _path: Option<Box<CStr>>,
    /// Owned timespec referenced by timeout entries.
    _ts: Option<Box<Timespec>>,
    token: OpToken,
    _pin: PhantomPinned,
}

impl<'r> OpFuture<'r> {
    fn new(reactor: &'r Reactor, entry: squeue::Entry) -> Self {
        OpFuture {
            reactor,
            entry: Some(entry),
            _path: None,
            _ts: None,
            token: OpToken {
                result: 0,
                complete: false,
                waker: None,
            },
            _pin: PhantomPinned,
        }
    }

    fn keep_path(mut self, path: Box<CStr>) -> Self {
        self._path = Some(path);
        self
    }

    fn keep_timespec(mut self, ts: Box<Timespec>) -> Self {
        self._ts = Some(ts);
        self
    }
}

impl Future for OpFuture<'_> {
    type Output = i32;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<i32> {
        // Safety: nothing is moved out of the pinned future.
        let this = unsafe { self.get_unchecked_mut() };
        if this.token.complete {
            return Poll::Ready(this.token.result);
        }
        this.token.waker = Some(cx.waker().clone());
        if let Some(entry) = this.entry.take() {
            // The frame is pinned from here on, so the token address is
            // stable for the life of the operation.
            let entry = entry.user_data(&raw mut this.token as u64);
            if let Err(err) = this.reactor.push_entry(entry) {
                // The operation never reached the kernel; surface the
                // failure as this operation's result code.
                log::error!("io submission failed: {err}");
                let code = match &err {
                    Error::QueueFull(e) | Error::Io(e) => {
                        e.raw_os_error().unwrap_or(libc::EIO)
                    }
                    _ => libc::EIO,
                };
                this.token.result = -code;
                this.token.complete = true;
                return Poll::Ready(this.token.result);
            }
        }
        Poll::Pending
    }
}

impl Drop for OpFuture<'_> {
    fn drop(&mut self) {
        // Dropping an in-flight operation would leave the kernel holding a
        // dangling token address. The runtime never does this; if user code
        // manages to, dying loudly beats memory corruption.
        if self.entry.is_none() && !self.token.complete {
            log::error!("io operation dropped while in flight");
            std::process::abort();
        }
    }
}

/// One io_uring instance plus the drive loops that reap its completions.
pub struct Reactor {
    ring: RefCell<IoUring>,
}

// Safety: a reactor is used by exactly one thread at a time. The pool hands
// each worker its own reactor; the sole cross-thread access is `ring_fd()`
// during pool construction, before any worker thread exists.
unsafe impl Sync for Reactor {}

impl Reactor {
    /// Create a standalone reactor with its own kernel worker pool.
    ///
    /// Aborts the process if io_uring setup fails.
    pub fn new(depth: u32) -> Reactor {
        Self::build(depth, None)
    }

    /// Create a reactor sharing `peer`'s kernel worker pool
    /// (`IORING_SETUP_ATTACH_WQ`).
    pub fn attached(depth: u32, peer: &Reactor) -> Reactor {
        Self::build(depth, Some(peer.ring_fd()))
    }

    fn build(depth: u32, attach_to: Option<RawFd>) -> Reactor {
        let mut builder = IoUring::builder();
        if let Some(fd) = attach_to {
            builder.setup_attach_wq(fd);
        }
        match builder.build(depth) {
            Ok(ring) => Reactor {
                ring: RefCell::new(ring),
            },
            Err(e) => {
                log::error!("io_uring setup failed (depth {depth}): {e}");
                std::process::abort();
            }
        }
    }

    /// File descriptor of the underlying ring, for `ATTACH_WQ`.
    pub fn ring_fd(&self) -> RawFd {
        self.ring.borrow().as_raw_fd()
    }

    /// Queue an SQE, flushing once if the submission ring is full.
    ///
    /// A failed flush is returned as [`Error::QueueFull`]; a ring that is
    /// still full after a successful flush aborts, since SQ depth bounds
    /// in-flight operations and a flushed ring that cannot take one entry
    /// means the accounting is broken.
    fn push_entry(&self, entry: squeue::Entry) -> Result<(), Error> {
        let mut ring = self.ring.borrow_mut();
        // Safety: every entry references memory that stays valid until its
        // CQE is reaped (pinned frames, boxed paths and timespecs).
        unsafe {
            if ring.submission().push(&entry).is_ok() {
                return Ok(());
            }
        }
        if let Err(e) = ring.submit() {
            return Err(Error::QueueFull(e));
        }
        unsafe {
            if ring.submission().push(&entry).is_err() {
                metrics::SQE_SUBMIT_FAILURES.increment();
                log::error!("submission queue still full after flush");
                std::process::abort();
            }
        }
        Ok(())
    }

    /// One drive step: submit pending SQEs, wait for at least one
    /// completion, then deliver every ready completion to its token.
    ///
    /// Tokens are woken in kernel completion order. Used by workers between
    /// resumptions and by [`run_until_done`](Self::run_until_done).
    pub fn wait_and_dispatch(&self) -> Result<(), Error> {
        let mut ring = self.ring.borrow_mut();
        loop {
            match ring.submitter().submit_and_wait(1) {
                Ok(_) => break,
                Err(e) if e.raw_os_error() == Some(libc::EINTR) => continue,
                Err(e) => {
                    return Err(Error::RingSetup(format!("submit_and_wait: {e}")));
                }
            }
        }

        let mut reaped = 0u64;
        let mut cq = ring.completion();
        for cqe in &mut cq {
            reaped += 1;
            let token = cqe.user_data() as *mut OpToken;
            if token.is_null() {
                continue;
            }
            // Safety: user_data is the address of an OpToken pinned inside
            // a frame owned by this thread; the frame outlives the op.
            unsafe {
                (*token).result = cqe.result();
                (*token).complete = true;
                if let Some(waker) = (*token).waker.take() {
                    waker.wake();
                }
            }
        }
        // Dropping the iterator advances the CQ head past what we consumed.
        drop(cq);
        metrics::CQE_PROCESSED.add(reaped);
        Ok(())
    }

    /// Drive `future` to completion on this reactor, parking in the kernel
    /// between completion batches. The future is re-polled after every
    /// batch; within one task chain the freshly completed operation is the
    /// only pending leaf, so the poll lands on it.
    pub fn run_until_done<F: Future>(&self, future: F) -> Result<F::Output, Error> {
        let mut future = std::pin::pin!(future);
        let waker = Waker::noop();
        let mut cx = Context::from_waker(waker);
        loop {
            if let Poll::Ready(value) = future.as_mut().poll(&mut cx) {
                return Ok(value);
            }
            self.wait_and_dispatch()?;
        }
    }

    // ── Suspendable operations ──────────────────────────────────────────

    /// No-op completion, useful for draining and tests.
    pub fn nop(&self) -> OpFuture<'_> {
        OpFuture::new(self, opcode::Nop::new().build())
    }

    /// Read up to `len` bytes into `buf` at absolute `offset`.
    /// Resolves to bytes read or `-errno`.
    ///
    /// # Safety
    ///
    /// `buf..buf+len` must stay valid and unmoved until the returned future
    /// resolves.
    pub unsafe fn read(&self, fd: RawFd, buf: *mut u8, len: u32, offset: u64) -> OpFuture<'_> {
        let entry = opcode::Read::new(Fd(fd), buf, len).offset(offset).build();
        OpFuture::new(self, entry)
    }

    /// Write `len` bytes from `buf` at absolute `offset`.
    /// Resolves to bytes written or `-errno`.
    ///
    /// # Safety
    ///
    /// `buf..buf+len` must stay valid and unmoved until the returned future
    /// resolves.
    pub unsafe fn write(&self, fd: RawFd, buf: *const u8, len: u32, offset: u64) -> OpFuture<'_> {
        let entry = opcode::Write::new(Fd(fd), buf, len).offset(offset).build();
        OpFuture::new(self, entry)
    }

    /// Receive up to `len` bytes from a socket. Resolves to bytes received,
    /// `0` on orderly peer shutdown, or `-errno`.
    ///
    /// # Safety
    ///
    /// `buf..buf+len` must stay valid and unmoved until the returned future
    /// resolves.
    pub unsafe fn recv(&self, fd: RawFd, buf: *mut u8, len: u32, flags: i32) -> OpFuture<'_> {
        let entry = opcode::Recv::new(Fd(fd), buf, len).flags(flags).build();
        OpFuture::new(self, entry)
    }

    /// Send `len` bytes to a socket. Resolves to bytes sent or `-errno`.
    ///
    /// # Safety
    ///
    /// `buf..buf+len` must stay valid and unmoved until the returned future
    /// resolves.
    pub unsafe fn send(&self, fd: RawFd, buf: *const u8, len: u32, flags: i32) -> OpFuture<'_> {
        let entry = opcode::Send::new(Fd(fd), buf, len).flags(flags).build();
        OpFuture::new(self, entry)
    }

    /// Accept one connection from a listening socket. Resolves to the new
    /// fd or `-errno`; `addr`/`addrlen` are filled with the peer address.
    pub fn accept<'r>(
        &'r self,
        fd: RawFd,
        addr: &'r mut libc::sockaddr_storage,
        addrlen: &'r mut libc::socklen_t,
    ) -> OpFuture<'r> {
        *addrlen = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
        let entry = opcode::Accept::new(
            Fd(fd),
            addr as *mut libc::sockaddr_storage as *mut libc::sockaddr,
            addrlen as *mut libc::socklen_t,
        )
        .build();
        OpFuture::new(self, entry)
    }

    /// Connect a socket to the address in `addr`. Resolves to `0` or
    /// `-errno`.
    pub fn connect<'r>(
        &'r self,
        fd: RawFd,
        addr: &'r libc::sockaddr_storage,
        addrlen: libc::socklen_t,
    ) -> OpFuture<'r> {
        let entry = opcode::Connect::new(
            Fd(fd),
            addr as *const libc::sockaddr_storage as *const libc::sockaddr,
            addrlen,
        )
        .build();
        OpFuture::new(self, entry)
    }

    /// Open a file relative to directory fd `dfd`. Resolves to the new fd
    /// or `-errno`.
    pub fn openat(
        &self,
        dfd: RawFd,
        path: &CStr,
        flags: i32,
        mode: libc::mode_t,
    ) -> OpFuture<'_> {
        let path: Box<CStr> = path.into();
        let entry = opcode::OpenAt::new(Fd(dfd), path.as_ptr())
            .flags(flags)
            .mode(mode)
            .build();
        OpFuture::new(self, entry).keep_path(path)
    }

    /// Query file metadata into `buf`. Resolves to `0` or `-errno`.
    pub fn statx<'r>(
        &'r self,
        dfd: RawFd,
        path: &CStr,
        flags: i32,
        mask: u32,
        buf: &'r mut libc::statx,
    ) -> OpFuture<'r> {
        let path: Box<CStr> = path.into();
        let entry = opcode::Statx::new(Fd(dfd), path.as_ptr(), buf as *mut libc::statx as *mut _)
            .flags(flags)
            .mask(mask)
            .build();
        OpFuture::new(self, entry).keep_path(path)
    }

    /// Move up to `len` bytes between two fds without copying through user
    /// space. An offset of `-1` means "use the fd's file offset".
    /// Resolves to bytes moved or `-errno`.
    pub fn splice(
        &self,
        fd_in: RawFd,
        off_in: i64,
        fd_out: RawFd,
        off_out: i64,
        len: u32,
        flags: u32,
    ) -> OpFuture<'_> {
        let entry = opcode::Splice::new(Fd(fd_in), off_in, Fd(fd_out), off_out, len)
            .flags(flags)
            .build();
        OpFuture::new(self, entry)
    }

    /// Flush a file's data (and metadata unless `datasync`) to storage.
    /// Resolves to `0` or `-errno`.
    pub fn fsync(&self, fd: RawFd, datasync: bool) -> OpFuture<'_> {
        let flags = if datasync {
            FsyncFlags::DATASYNC
        } else {
            FsyncFlags::empty()
        };
        let entry = opcode::Fsync::new(Fd(fd)).flags(flags).build();
        OpFuture::new(self, entry)
    }

    /// Resolve with `-ETIME` once `duration` has elapsed on this reactor.
    pub fn timeout(&self, duration: Duration) -> OpFuture<'_> {
        let ts = Box::new(
            Timespec::new()
                .sec(duration.as_secs())
                .nsec(duration.subsec_nanos()),
        );
        let entry = opcode::Timeout::new(&*ts).build();
        OpFuture::new(self, entry).keep_timespec(ts)
    }

    /// Close a file descriptor. Resolves to `0` or `-errno`.
    pub fn close(&self, fd: RawFd) -> OpFuture<'_> {
        OpFuture::new(self, opcode::Close::new(Fd(fd)).build())
    }
}
