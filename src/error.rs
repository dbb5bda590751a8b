use std::io;

use thiserror::Error;

/// Errors surfaced by ringherd's fallible paths.
///
/// Fatal setup failures (ring initialization, bind, listen) do not appear
/// here: those paths log a diagnostic and abort the process.
#[derive(Debug, Error)]
pub enum Error {
    /// Underlying system call failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// Driving the ring failed (submit or wait).
    #[error("ring setup: {0}")]
    RingSetup(String),
    /// Submission queue full and the flush to make room failed.
    #[error("submission queue full: {0}")]
    QueueFull(io::Error),
    /// Configuration value out of range.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// Address could not be represented or decoded.
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    /// Logger installation or sink setup failed.
    #[error("log setup: {0}")]
    LogSetup(String),
}
