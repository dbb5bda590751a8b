//! Asynchronous file I/O over a reactor.

use std::ffi::CString;
use std::io;
use std::os::fd::RawFd;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use crate::reactor::Reactor;

/// How to open the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOption {
    ReadOnly,
    Truncate,
    Append,
    ReadWrite,
    ReadWriteTruncate,
    ReadWriteAppend,
}

const fn open_flags(option: FileOption) -> i32 {
    match option {
        FileOption::ReadOnly => libc::O_RDONLY,
        FileOption::Truncate => libc::O_WRONLY | libc::O_CREAT | libc::O_TRUNC,
        FileOption::Append => libc::O_WRONLY | libc::O_CREAT | libc::O_APPEND,
        FileOption::ReadWrite => libc::O_RDWR,
        FileOption::ReadWriteTruncate => libc::O_RDWR | libc::O_CREAT | libc::O_TRUNC,
        FileOption::ReadWriteAppend => libc::O_RDWR | libc::O_CREAT | libc::O_APPEND,
    }
}

/// Permission bits applied when the open creates the file.
pub const DEFAULT_FILE_MODE: libc::mode_t = libc::S_IRUSR | libc::S_IWUSR;

fn check(result: i32) -> io::Result<i32> {
    if result < 0 {
        Err(io::Error::from_raw_os_error(-result))
    } else {
        Ok(result)
    }
}

/// A file driven through a reactor's `openat`/`statx`/`read`/`write`/`close`
/// operations. Closes any still-open descriptor synchronously on drop.
pub struct AsyncFile<'r> {
    reactor: &'r Reactor,
    path: CString,
    option: FileOption,
    mode: libc::mode_t,
    fd: Option<RawFd>,
    meta: Option<Box<libc::statx>>,
}

impl<'r> AsyncFile<'r> {
    pub fn new(
        reactor: &'r Reactor,
        path: impl AsRef<Path>,
        option: FileOption,
    ) -> io::Result<AsyncFile<'r>> {
        Self::with_mode(reactor, path, option, DEFAULT_FILE_MODE)
    }

    pub fn with_mode(
        reactor: &'r Reactor,
        path: impl AsRef<Path>,
        option: FileOption,
        mode: libc::mode_t,
    ) -> io::Result<AsyncFile<'r>> {
        let path = CString::new(path.as_ref().as_os_str().as_bytes())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains NUL"))?;
        Ok(AsyncFile {
            reactor,
            path,
            option,
            mode,
            fd: None,
            meta: None,
        })
    }

    /// Open the file; returns the descriptor.
    pub async fn open(&mut self) -> io::Result<RawFd> {
        let result = self
            .reactor
            .openat(libc::AT_FDCWD, &self.path, open_flags(self.option), self.mode)
            .await;
        let fd = check(result)?;
        self.fd = Some(fd);
        Ok(fd)
    }

    /// File size in bytes, from a cached `statx`.
    pub async fn size(&mut self) -> io::Result<u64> {
        if self.meta.is_none() {
            let mut meta: Box<libc::statx> = Box::new(unsafe { std::mem::zeroed() });
            let result = self
                .reactor
                .statx(libc::AT_FDCWD, &self.path, 0, libc::STATX_ALL, &mut meta)
                .await;
            check(result)?;
            self.meta = Some(meta);
        }
        Ok(self.meta.as_ref().map(|m| m.stx_size).unwrap_or(0))
    }

    /// Read up to `buf.len()` bytes at `offset`; returns bytes read.
    pub async fn read(&mut self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let fd = self.require_open()?;
        // Safety: `buf` is borrowed for the life of the returned future and
        // lives in the caller's pinned frame.
        let result =
            unsafe { self.reactor.read(fd, buf.as_mut_ptr(), buf.len() as u32, offset) }.await;
        Ok(check(result)? as usize)
    }

    /// Write `buf` at `offset`; returns bytes written.
    pub async fn write(&mut self, buf: &[u8], offset: u64) -> io::Result<usize> {
        let fd = self.require_open()?;
        // Safety: as in `read`.
        let result =
            unsafe { self.reactor.write(fd, buf.as_ptr(), buf.len() as u32, offset) }.await;
        Ok(check(result)? as usize)
    }

    /// Flush file data (and metadata unless `datasync`) to storage.
    pub async fn sync(&mut self, datasync: bool) -> io::Result<()> {
        let fd = self.require_open()?;
        check(self.reactor.fsync(fd, datasync).await)?;
        Ok(())
    }

    /// Close the descriptor through the reactor.
    pub async fn close(&mut self) -> io::Result<()> {
        let fd = self.require_open()?;
        self.fd = None;
        check(self.reactor.close(fd).await)?;
        Ok(())
    }

    fn require_open(&self) -> io::Result<RawFd> {
        self.fd
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "file not open"))
    }
}

impl Drop for AsyncFile<'_> {
    fn drop(&mut self) {
        if let Some(fd) = self.fd.take() {
            unsafe {
                libc::close(fd);
            }
        }
    }
}
