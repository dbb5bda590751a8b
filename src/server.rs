//! Listening server: bind, accept, hand sessions to the worker pool.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::error::Error;
use crate::metrics;
use crate::net::{Connection, Socket};
use crate::pool::ReactorPool;
use crate::task::Task;
use crate::worker::{Session, WorkerPool};

/// Per-connection task factory. Invoked exactly once per accepted
/// connection, taking ownership of the facade.
pub type Handler = fn(Box<Connection>) -> Task<()>;

/// TCP server multiplexing per-connection handler tasks over a fixed pool
/// of io_uring workers.
///
/// Binds and listens immediately on construction; [`serve`](Self::serve)
/// returns the task that runs the accept loop until program termination.
/// Bind, listen, or reactor setup failures log a diagnostic and abort.
pub struct Server {
    listen_addr: SocketAddr,
    listen_sock: Socket,
    config: Config,
    reactors: Arc<ReactorPool>,
    workers: WorkerPool,
    handler: Option<Handler>,
}

impl Server {
    /// Bind `listen_addr` with one worker per available hardware thread.
    pub fn new(listen_addr: SocketAddr) -> Server {
        Server::with_config(listen_addr, Config::default())
    }

    /// Bind `listen_addr` with a fixed worker count.
    pub fn with_concurrency(listen_addr: SocketAddr, concurrency: usize) -> Server {
        let config = Config {
            workers: concurrency,
            ..Config::default()
        };
        Server::with_config(listen_addr, config)
    }

    pub fn with_config(listen_addr: SocketAddr, config: Config) -> Server {
        if let Err(e) = config.validate() {
            log::error!("{e}");
            std::process::abort();
        }

        let listen_sock = Socket::for_addr(listen_addr)
            .and_then(|sock| {
                sock.bind(listen_addr, true)?;
                sock.listen(config.backlog)?;
                Ok(sock)
            })
            .unwrap_or_else(|e| {
                log::error!("failed to listen on {listen_addr}: {e}");
                std::process::abort();
            });

        let workers = if config.workers == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            config.workers
        };

        let reactors = Arc::new(ReactorPool::new(workers, config.ring_depth));
        let worker_pool = WorkerPool::new(Arc::clone(&reactors), config.session_queue_capacity);

        Server {
            listen_addr,
            listen_sock,
            config,
            reactors,
            workers: worker_pool,
            handler: None,
        }
    }

    /// Install the per-connection task factory.
    pub fn set_handler(&mut self, handler: Handler) {
        self.handler = Some(handler);
    }

    /// Address the listener is bound to. With port 0 this is the port the
    /// kernel picked.
    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        self.listen_sock.local_addr()
    }

    /// The reactor pool backing the workers.
    pub fn reactors(&self) -> &Arc<ReactorPool> {
        &self.reactors
    }

    /// The accept loop as a task. Starts the workers, then accepts on the
    /// calling thread forever; it never completes.
    ///
    /// # Panics
    ///
    /// Panics if no handler was installed.
    pub fn serve(mut self) -> Task<()> {
        let handler = self.handler.expect("no connection handler installed");
        Task::new(async move {
            self.workers.start();
            log::info!("server listening on {}", self.listen_addr);

            loop {
                let (fd, peer) = match self.listen_sock.accept() {
                    Ok(accepted) => accepted,
                    Err(Error::Io(ref e))
                        if matches!(
                            e.raw_os_error(),
                            Some(libc::EMFILE) | Some(libc::ENFILE)
                        ) =>
                    {
                        // Out of descriptors; give close() a chance to run.
                        log::warn!("accept failed: {e}, backing off");
                        std::thread::sleep(Duration::from_millis(10));
                        continue;
                    }
                    Err(e) => {
                        log::warn!("accept failed: {e}");
                        continue;
                    }
                };

                metrics::CONNECTIONS_ACCEPTED.increment();
                log::debug!("accepted connection from {peer}");

                let socket = Socket::from_raw(fd);
                let mut conn =
                    Box::new(Connection::new(socket, peer, self.config.buffer_capacity));
                let conn_ptr: *mut Connection = &mut *conn;
                let session = handler(conn);
                self.workers.submit(Session {
                    task: session.detach(),
                    conn: conn_ptr,
                });
            }
        })
    }
}
