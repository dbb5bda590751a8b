//! Owning byte buffer for connection I/O.

use bytes::BytesMut;

/// Default capacity of connection read/write buffers.
pub const DEFAULT_BUFFER_CAPACITY: usize = 1024;

/// Owning byte storage with a fixed nominal capacity and a current size.
///
/// Not thread-safe; two buffers swap contents by O(1) pointer exchange.
/// `recv` fills at most [`capacity`](Self::capacity) bytes regardless of
/// how much backing storage the allocator handed out.
pub struct Buffer {
    inner: BytesMut,
    capacity: usize,
}

impl Buffer {
    pub fn new() -> Buffer {
        Buffer::with_capacity(DEFAULT_BUFFER_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Buffer {
        Buffer {
            inner: BytesMut::with_capacity(capacity),
            capacity,
        }
    }

    /// Current number of valid bytes.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Nominal capacity fixed at construction.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Discard the current contents.
    pub fn clear(&mut self) {
        self.inner.clear();
    }

    /// Replace the contents with a copy of `data`.
    pub fn write(&mut self, data: &[u8]) {
        self.inner.clear();
        self.inner.extend_from_slice(data);
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.inner
    }

    /// Pointer to the start of the backing storage, for kernel fills.
    /// Valid for [`capacity`](Self::capacity) bytes while the buffer is
    /// empty (call [`clear`](Self::clear) first).
    pub(crate) fn fill_ptr(&mut self) -> *mut u8 {
        debug_assert!(self.inner.is_empty());
        self.inner.spare_capacity_mut().as_mut_ptr() as *mut u8
    }

    /// Declare `len` bytes valid after the kernel filled the storage.
    ///
    /// # Safety
    ///
    /// The first `len` bytes of the backing storage must be initialized and
    /// `len` must not exceed [`capacity`](Self::capacity).
    pub(crate) unsafe fn set_len(&mut self, len: usize) {
        debug_assert!(len <= self.capacity);
        unsafe { self.inner.set_len(len) };
    }

    /// Exchange contents with `other` without copying.
    pub fn swap(&mut self, other: &mut Buffer) {
        std::mem::swap(self, other);
    }
}

impl Default for Buffer {
    fn default() -> Self {
        Buffer::new()
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_replaces_contents() {
        let mut buf = Buffer::with_capacity(16);
        buf.write(b"hello");
        assert_eq!(buf.as_bytes(), b"hello");
        buf.write(b"bye");
        assert_eq!(buf.as_bytes(), b"bye");
        assert_eq!(buf.capacity(), 16);
    }

    #[test]
    fn clear_empties_without_touching_capacity() {
        let mut buf = Buffer::with_capacity(8);
        buf.write(b"abcd");
        buf.clear();
        assert!(buf.is_empty());
        assert_eq!(buf.capacity(), 8);
    }

    #[test]
    fn swap_exchanges_contents() {
        let mut a = Buffer::with_capacity(8);
        let mut b = Buffer::with_capacity(32);
        a.write(b"read side");
        b.write(b"write side");
        a.swap(&mut b);
        assert_eq!(a.as_bytes(), b"write side");
        assert_eq!(b.as_bytes(), b"read side");
        assert_eq!(a.capacity(), 32);
        assert_eq!(b.capacity(), 8);
    }

    #[test]
    fn kernel_fill_protocol() {
        let mut buf = Buffer::with_capacity(8);
        buf.clear();
        let ptr = buf.fill_ptr();
        unsafe {
            std::ptr::copy_nonoverlapping(b"ok".as_ptr(), ptr, 2);
            buf.set_len(2);
        }
        assert_eq!(buf.as_bytes(), b"ok");
    }
}
