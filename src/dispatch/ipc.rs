//! Pipe primitives for worker communication.
//!
//! Provides fd wrappers with EINTR handling over the raw pipe ends, plus
//! the NUL-terminated framing used to send task identifiers.

use std::io::{self, Read, Write};
use std::os::unix::io::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};

use crate::dispatch::protocol::TASK_TERMINATOR;

/// A file descriptor wrapper that implements Read/Write with EINTR handling.
#[derive(Debug)]
pub struct PipeFd {
    fd: OwnedFd,
}

impl PipeFd {
    /// Create from an owned file descriptor.
    pub fn new(fd: OwnedFd) -> Self {
        Self { fd }
    }

    /// Create from a raw file descriptor (takes ownership).
    ///
    /// # Safety
    /// The caller must ensure `fd` is a valid file descriptor that can be owned.
    pub unsafe fn from_raw(fd: RawFd) -> Self {
        Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        }
    }
}

impl AsFd for PipeFd {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl AsRawFd for PipeFd {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl Read for PipeFd {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match nix::unistd::read(self.fd.as_raw_fd(), buf) {
                Ok(n) => return Ok(n),
                Err(nix::errno::Errno::EINTR) => continue, // Retry on interrupt
                Err(e) => return Err(io::Error::from_raw_os_error(e as i32)),
            }
        }
    }
}

impl Write for PipeFd {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        loop {
            match nix::unistd::write(&self.fd, buf) {
                Ok(n) => return Ok(n),
                Err(nix::errno::Errno::EINTR) => continue, // Retry on interrupt
                Err(e) => return Err(io::Error::from_raw_os_error(e as i32)),
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(()) // Pipes don't need flushing at the fd level
    }
}

/// Writer for the dispatcher → worker channel: frames each task identifier
/// with the NUL terminator.
#[derive(Debug)]
pub struct TaskWriter {
    pipe: PipeFd,
}

impl TaskWriter {
    pub fn new(pipe: PipeFd) -> Self {
        Self { pipe }
    }

    /// Send one task identifier as a single framed write.
    pub fn send(&mut self, task: &str) -> io::Result<()> {
        let mut frame = Vec::with_capacity(task.len() + 1);
        frame.extend_from_slice(task.as_bytes());
        frame.push(TASK_TERMINATOR);
        self.pipe.write_all(&frame)
    }
}
