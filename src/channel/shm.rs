//! Named shared-memory segment for published results.
//!
//! The segment is sized up front as `total_tasks * max_record_size` and
//! written append-only at a monotonically increasing cursor, so it can
//! never wrap or overflow within one run. The dispatcher is the only
//! writer; the external consumer maps the same name read-only.

#![allow(dead_code)] // Some accessors are for monitoring and tests

use std::ffi::c_void;
use std::io;
use std::num::NonZeroUsize;
use std::os::fd::{AsRawFd, OwnedFd};
use std::ptr::NonNull;

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::mman::{MapFlags, ProtFlags, mmap, munmap, shm_open, shm_unlink};
use nix::sys::stat::Mode;

use crate::error::{ForemanError, Result, errno_io};

/// Owned mapping of a named shared-memory segment with an append cursor.
pub struct SharedBuffer {
    name: String,
    fd: Option<OwnedFd>,
    base: NonNull<c_void>,
    capacity: usize,
    cursor: usize,
    released: bool,
}

impl SharedBuffer {
    /// Create (or reuse a stale same-named segment from a crashed run),
    /// size, and map the segment.
    pub fn create(name: &str, capacity: usize) -> Result<Self> {
        let len = NonZeroUsize::new(capacity).ok_or_else(|| {
            ForemanError::setup(
                "shm_open",
                io::Error::new(io::ErrorKind::InvalidInput, "shared buffer capacity is zero"),
            )
        })?;

        let fd = shm_open(
            name,
            OFlag::O_CREAT | OFlag::O_RDWR,
            Mode::from_bits_truncate(0o666),
        )
        .map_err(|e| ForemanError::setup("shm_open", errno_io(e)))?;

        nix::unistd::ftruncate(&fd, capacity as libc::off_t)
            .map_err(|e| ForemanError::setup("ftruncate", errno_io(e)))?;

        // Safety: fd is a freshly sized shared-memory object of `len` bytes.
        let base = unsafe {
            mmap(
                None,
                len,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                &fd,
                0,
            )
        }
        .map_err(|e| ForemanError::setup("mmap", errno_io(e)))?;

        Ok(Self {
            name: name.to_string(),
            fd: Some(fd),
            base,
            capacity,
            cursor: 0,
            released: false,
        })
    }

    /// Append raw bytes at the cursor and advance it.
    pub fn append(&mut self, bytes: &[u8]) -> Result<()> {
        if self.cursor + bytes.len() > self.capacity {
            return Err(ForemanError::protocol(
                "shared buffer append",
                format!(
                    "batch of {} bytes exceeds remaining capacity {}",
                    bytes.len(),
                    self.capacity - self.cursor
                ),
            ));
        }
        // Safety: cursor + len <= capacity, and the mapping is private to
        // this writer for the duration of the run.
        unsafe {
            std::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                self.base.as_ptr().cast::<u8>().add(self.cursor),
                bytes.len(),
            );
        }
        self.cursor += bytes.len();
        Ok(())
    }

    /// Bytes written so far.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[cfg(test)]
    pub fn contents(&self) -> &[u8] {
        // Safety: the first `cursor` bytes have been written through append.
        unsafe { std::slice::from_raw_parts(self.base.as_ptr().cast::<u8>(), self.cursor) }
    }

    /// Close the segment, remove it from the namespace (absence is benign),
    /// and unmap it. Any other failure is fatal.
    pub fn release(mut self) -> Result<()> {
        self.released = true;

        if let Some(fd) = self.fd.take() {
            // Safety: fd is live and owned; into_raw transfers ownership to
            // this close call.
            let raw = std::os::fd::IntoRawFd::into_raw_fd(fd);
            if unsafe { libc::close(raw) } == -1 {
                return Err(ForemanError::cleanup(
                    "close shared segment",
                    io::Error::last_os_error(),
                ));
            }
        }

        match shm_unlink(self.name.as_str()) {
            Ok(()) | Err(Errno::ENOENT) => {}
            Err(e) => return Err(ForemanError::cleanup("shm_unlink", errno_io(e))),
        }

        // Safety: base/capacity come from the successful mmap in create.
        unsafe { munmap(self.base, self.capacity) }
            .map_err(|e| ForemanError::cleanup("munmap", errno_io(e)))?;

        Ok(())
    }

    fn fd_for_debug(&self) -> i32 {
        self.fd.as_ref().map_or(-1, |fd| fd.as_raw_fd())
    }
}

impl std::fmt::Debug for SharedBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedBuffer")
            .field("name", &self.name)
            .field("fd", &self.fd_for_debug())
            .field("capacity", &self.capacity)
            .field("cursor", &self.cursor)
            .finish()
    }
}

impl Drop for SharedBuffer {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        // Backstop for error paths: best-effort unlink and unmap so an
        // aborted run does not strand the named segment. The fd closes
        // when the OwnedFd drops.
        let _ = shm_unlink(self.name.as_str());
        // Safety: base/capacity come from the successful mmap in create.
        unsafe {
            let _ = munmap(self.base, self.capacity);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_name(tag: &str) -> String {
        format!("/foreman-shm-test-{}-{}", std::process::id(), tag)
    }

    #[test]
    fn test_append_advances_cursor() {
        let name = test_name("append");
        let mut shm = SharedBuffer::create(&name, 64).unwrap();
        assert_eq!(shm.cursor(), 0);
        assert_eq!(shm.capacity(), 64);

        shm.append(b"a.txt\t").unwrap();
        assert_eq!(shm.cursor(), 6);
        shm.append(b"b.txt\t").unwrap();
        assert_eq!(shm.cursor(), 12);
        assert_eq!(shm.contents(), b"a.txt\tb.txt\t");

        shm.release().unwrap();
    }

    #[test]
    fn test_append_rejects_overflow() {
        let name = test_name("overflow");
        let mut shm = SharedBuffer::create(&name, 8).unwrap();
        let err = shm.append(b"123456789").unwrap_err();
        assert_eq!(err.operation(), "shared buffer append");
        shm.release().unwrap();
    }

    #[test]
    fn test_release_tolerates_missing_name() {
        let name = test_name("stale");
        let shm = SharedBuffer::create(&name, 16).unwrap();
        // Simulate another process having removed the segment already.
        shm_unlink(name.as_str()).unwrap();
        shm.release().unwrap();
    }

    #[test]
    fn test_zero_capacity_is_a_setup_error() {
        let name = test_name("zero");
        let err = SharedBuffer::create(&name, 0).unwrap_err();
        assert_eq!(err.operation(), "shm_open");
    }
}
