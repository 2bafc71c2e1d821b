//! Named counting semaphore signalling published results.
//!
//! The dispatcher only ever posts; the external consumer only ever waits.
//! `nix` has no wrapper for POSIX named semaphores, so the handful of
//! `sem_*` calls go through `libc` directly.

use std::ffi::CString;
use std::io;

use crate::error::{ForemanError, Result};

/// Owned handle to a named counting semaphore, created with an initial
/// count of zero.
pub struct NamedSemaphore {
    name: CString,
    sem: *mut libc::sem_t,
    released: bool,
}

impl NamedSemaphore {
    /// Open (creating if needed) the named semaphore with count 0. A stale
    /// same-named semaphore left by a crashed run is reused as-is.
    pub fn create(name: &str) -> Result<Self> {
        let c_name = CString::new(name).map_err(|_| {
            ForemanError::setup(
                "sem_open",
                io::Error::new(io::ErrorKind::InvalidInput, "semaphore name contains NUL"),
            )
        })?;

        // Safety: c_name is a valid NUL-terminated string; with O_CREAT the
        // variadic mode and initial-value arguments are read.
        let sem = unsafe {
            libc::sem_open(
                c_name.as_ptr(),
                libc::O_CREAT,
                0o666 as libc::c_uint,
                0 as libc::c_uint,
            )
        };
        if std::ptr::eq(sem, libc::SEM_FAILED) {
            return Err(ForemanError::setup("sem_open", io::Error::last_os_error()));
        }

        Ok(Self {
            name: c_name,
            sem,
            released: false,
        })
    }

    /// Increment the count by one, waking a waiting consumer.
    pub fn post(&self) -> Result<()> {
        // Safety: sem is a live handle from sem_open.
        if unsafe { libc::sem_post(self.sem) } == -1 {
            return Err(ForemanError::io("sem_post", io::Error::last_os_error()));
        }
        Ok(())
    }

    /// Current count, for tests.
    #[cfg(test)]
    pub fn value(&self) -> i32 {
        let mut value: libc::c_int = 0;
        // Safety: sem is live and value is a valid out-pointer.
        let rc = unsafe { libc::sem_getvalue(self.sem, &mut value) };
        assert_eq!(rc, 0, "sem_getvalue failed");
        value
    }

    /// Close the handle and remove the name from the system namespace;
    /// an already-absent name is benign.
    pub fn release(mut self) -> Result<()> {
        self.released = true;

        // Safety: sem is live and not used again after this close.
        if unsafe { libc::sem_close(self.sem) } == -1 {
            return Err(ForemanError::cleanup(
                "sem_close",
                io::Error::last_os_error(),
            ));
        }

        // Safety: name is a valid NUL-terminated string.
        if unsafe { libc::sem_unlink(self.name.as_ptr()) } == -1 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ENOENT) {
                return Err(ForemanError::cleanup("sem_unlink", err));
            }
        }

        Ok(())
    }
}

impl std::fmt::Debug for NamedSemaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamedSemaphore")
            .field("name", &self.name)
            .finish()
    }
}

impl Drop for NamedSemaphore {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        // Backstop for error paths: best-effort close and unlink.
        // Safety: sem is still live, name is valid.
        unsafe {
            let _ = libc::sem_close(self.sem);
            let _ = libc::sem_unlink(self.name.as_ptr());
        }
    }
}
