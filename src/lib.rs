//! ringherd — per-worker io_uring reactors and coroutine sessions for Linux.
//!
//! ringherd multiplexes one handler task per TCP connection over a fixed
//! pool of worker threads. Each worker owns its own io_uring instance;
//! a connection is handed off once through a lock-free MPMC ring and then
//! lives, suspends, and resumes entirely on that worker. There is no
//! work stealing and no cross-worker synchronization on the I/O path.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use ringherd::{Connection, Server, Task, sync_wait};
//!
//! fn session(mut conn: Box<Connection>) -> Task<()> {
//!     Task::new(async move {
//!         let n = conn.recv().await;
//!         if n < 1 {
//!             return;
//!         }
//!         conn.swap_buffers();
//!         conn.send().await;
//!     })
//! }
//!
//! fn main() {
//!     ringherd::logger::init().expect("install logger");
//!     let mut server = Server::new("127.0.0.1:9090".parse().unwrap());
//!     server.set_handler(session);
//!     sync_wait(server.serve());
//! }
//! ```
//!
//! # Platform
//!
//! Linux only; requires a kernel with io_uring (5.6+ for the full
//! operation set).

pub(crate) mod counter;
pub(crate) mod metrics;
pub(crate) mod worker;

pub mod buffer;
pub mod config;
pub mod error;
pub mod file;
pub mod logger;
pub mod net;
pub mod pool;
pub mod queue;
pub mod reactor;
pub mod server;
pub mod sync_wait;
pub mod task;

// ── Re-exports: session API ─────────────────────────────────────────────

/// Owning byte buffer used for connection I/O.
pub use buffer::Buffer;
/// Per-connection facade passed to the handler.
pub use net::Connection;
/// Socket facade used by the listener and by outbound connections.
pub use net::Socket;
/// Per-connection task factory signature.
pub use server::Handler;
/// The listening server.
pub use server::Server;
/// Lazy one-shot coroutine value.
pub use task::Task;

// ── Re-exports: runtime ─────────────────────────────────────────────────

/// Runtime configuration.
pub use config::Config;
/// Errors from fallible setup paths.
pub use error::Error;
/// Asynchronous file handle.
pub use file::{AsyncFile, FileOption};
/// Ordered set of reactors, one per worker.
pub use pool::ReactorPool;
/// Bounded lock-free MPMC queue.
pub use queue::BoundedQueue;
/// Single-owner io_uring reactor.
pub use reactor::Reactor;
/// Suspendable kernel operation future.
pub use reactor::OpFuture;
/// Block the calling thread on a future.
pub use sync_wait::sync_wait;
/// Worker id of the current thread, if it is a pool worker.
pub use worker::current_worker_id;
