//! Sockets, addresses, and the per-connection facade.

mod connection;
mod socket;

pub use connection::Connection;
pub use socket::{DEFAULT_BACKLOG, Socket};
