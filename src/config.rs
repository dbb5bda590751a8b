use crate::buffer::DEFAULT_BUFFER_CAPACITY;
use crate::error::Error;
use crate::net::DEFAULT_BACKLOG;
use crate::reactor::DEFAULT_RING_DEPTH;
use crate::worker::DEFAULT_SESSION_QUEUE_CAPACITY;

/// Server configuration.
#[derive(Clone)]
pub struct Config {
    /// io_uring submission queue depth per reactor.
    pub ring_depth: u32,
    /// Worker thread count. 0 = one per available hardware thread.
    pub workers: usize,
    /// Capacity of the session handoff ring. Must be a power of two.
    pub session_queue_capacity: u64,
    /// Capacity of each connection's read and write buffers.
    pub buffer_capacity: usize,
    /// TCP listen backlog.
    pub backlog: i32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            ring_depth: DEFAULT_RING_DEPTH,
            workers: 0,
            session_queue_capacity: DEFAULT_SESSION_QUEUE_CAPACITY,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            backlog: DEFAULT_BACKLOG,
        }
    }
}

impl Config {
    /// Check every value is in range.
    pub fn validate(&self) -> Result<(), Error> {
        if self.ring_depth == 0 {
            return Err(Error::Config("ring_depth must be non-zero".into()));
        }
        if !self.session_queue_capacity.is_power_of_two() {
            return Err(Error::Config(
                "session_queue_capacity must be a power of two".into(),
            ));
        }
        if self.buffer_capacity == 0 {
            return Err(Error::Config("buffer_capacity must be non-zero".into()));
        }
        if self.backlog <= 0 {
            return Err(Error::Config("backlog must be positive".into()));
        }
        Ok(())
    }
}
