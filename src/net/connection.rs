//! Per-connection facade handed to the user's handler.

use std::cell::Cell;
use std::net::SocketAddr;
use std::os::fd::RawFd;

use crate::buffer::Buffer;
use crate::net::Socket;
use crate::reactor::Reactor;

/// One accepted connection: its socket (closed on drop), a read buffer, a
/// write buffer, and a pointer to the reactor of the worker that dequeued
/// it.
///
/// The reactor pointer is null until the worker pool binds it at handoff,
/// which always happens before the handler's first resumption; `recv` and
/// `send` therefore run on the binding worker.
pub struct Connection {
    socket: Socket,
    peer: SocketAddr,
    read_buf: Buffer,
    write_buf: Buffer,
    reactor: Cell<*const Reactor>,
}

impl Connection {
    pub fn new(socket: Socket, peer: SocketAddr, buffer_capacity: usize) -> Connection {
        Connection {
            socket,
            peer,
            read_buf: Buffer::with_capacity(buffer_capacity),
            write_buf: Buffer::with_capacity(buffer_capacity),
            reactor: Cell::new(std::ptr::null()),
        }
    }

    /// Address of the remote peer.
    pub fn client_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn socket(&self) -> &Socket {
        &self.socket
    }

    pub fn fd(&self) -> RawFd {
        self.socket.fd()
    }

    pub fn read_buf(&self) -> &Buffer {
        &self.read_buf
    }

    pub fn read_buf_mut(&mut self) -> &mut Buffer {
        &mut self.read_buf
    }

    pub fn write_buf(&self) -> &Buffer {
        &self.write_buf
    }

    pub fn write_buf_mut(&mut self) -> &mut Buffer {
        &mut self.write_buf
    }

    /// Exchange the read and write buffers without copying.
    pub fn swap_buffers(&mut self) {
        let Connection {
            read_buf,
            write_buf,
            ..
        } = self;
        read_buf.swap(write_buf);
    }

    /// Bind the reactor of the worker that owns this connection.
    pub(crate) fn bind_reactor(&self, reactor: &Reactor) {
        self.reactor.set(reactor);
    }

    /// The reactor this connection is bound to.
    ///
    /// # Panics
    ///
    /// Panics if called before the worker pool bound one.
    pub fn reactor(&self) -> &Reactor {
        let ptr = self.reactor.get();
        assert!(!ptr.is_null(), "connection used before reactor binding");
        // Safety: set by the owning worker to its pool reactor, which
        // outlives every session it services.
        unsafe { &*ptr }
    }

    /// Receive into the read buffer, replacing its previous contents.
    /// Resolves to bytes received, `0` on orderly peer shutdown, or
    /// `-errno`; the buffer size is set to the byte count on success.
    pub async fn recv(&mut self) -> i32 {
        let fd = self.socket.fd();
        self.read_buf.clear();
        let capacity = self.read_buf.capacity() as u32;
        let ptr = self.read_buf.fill_ptr();
        // Safety: the buffer storage is owned by this connection, which
        // lives inside the suspended frame for the whole operation.
        let n = unsafe { self.reactor().recv(fd, ptr, capacity, 0) }.await;
        if n > 0 {
            // Safety: the kernel wrote exactly `n <= capacity` bytes.
            unsafe { self.read_buf.set_len(n as usize) };
        }
        n
    }

    /// Send the write buffer's current contents. Resolves to bytes sent or
    /// `-errno`.
    pub async fn send(&mut self) -> i32 {
        let fd = self.socket.fd();
        let ptr = self.write_buf.as_bytes().as_ptr();
        let len = self.write_buf.len() as u32;
        // Safety: the buffer storage is owned by this connection, which
        // lives inside the suspended frame for the whole operation.
        unsafe { self.reactor().send(fd, ptr, len, 0) }.await
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("fd", &self.socket.fd())
            .field("peer", &self.peer)
            .finish()
    }
}
