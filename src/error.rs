//! Error types for foreman.
//!
//! Every failure carries the logical operation that was being attempted and
//! the underlying OS error, grouped into the four classes the dispatcher
//! distinguishes. All of them terminate the run; the grouping exists for
//! diagnostics and tests, not for recovery.

#![allow(dead_code)] // Category accessors are for diagnostics and tests

use std::io;

use thiserror::Error;

/// Main error type for foreman.
#[derive(Error, Debug)]
pub enum ForemanError {
    /// Creating a shared resource (channel, semaphore, audit log, pipes).
    #[error("setup failed in {op}: {source}")]
    Setup {
        op: &'static str,
        source: io::Error,
    },

    /// Reading or writing a worker channel, the shared buffer, or the
    /// audit log while the dispatch loop is running.
    #[error("I/O failed in {op}: {source}")]
    Io {
        op: &'static str,
        source: io::Error,
    },

    /// Spawning, executing, or reaping a worker process.
    #[error("process control failed in {op}: {source}")]
    Process {
        op: &'static str,
        source: io::Error,
    },

    /// Releasing a shared resource at shutdown. "Already absent" is not an
    /// error and is filtered out before this variant is constructed.
    #[error("cleanup failed in {op}: {source}")]
    Cleanup {
        op: &'static str,
        source: io::Error,
    },
}

/// Failure class, used for logging and assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Setup,
    Io,
    Process,
    Cleanup,
}

impl ForemanError {
    pub fn setup(op: &'static str, source: io::Error) -> Self {
        Self::Setup { op, source }
    }

    pub fn io(op: &'static str, source: io::Error) -> Self {
        Self::Io { op, source }
    }

    pub fn process(op: &'static str, source: io::Error) -> Self {
        Self::Process { op, source }
    }

    pub fn cleanup(op: &'static str, source: io::Error) -> Self {
        Self::Cleanup { op, source }
    }

    /// A worker violated the wire protocol; reported as an I/O failure.
    pub fn protocol(op: &'static str, detail: impl Into<String>) -> Self {
        Self::Io {
            op,
            source: io::Error::new(io::ErrorKind::InvalidData, detail.into()),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Setup { .. } => ErrorCategory::Setup,
            Self::Io { .. } => ErrorCategory::Io,
            Self::Process { .. } => ErrorCategory::Process,
            Self::Cleanup { .. } => ErrorCategory::Cleanup,
        }
    }

    /// Name of the operation that failed.
    pub fn operation(&self) -> &'static str {
        match self {
            Self::Setup { op, .. }
            | Self::Io { op, .. }
            | Self::Process { op, .. }
            | Self::Cleanup { op, .. } => op,
        }
    }
}

/// Convert a nix errno into a std I/O error, preserving the OS error text.
pub(crate) fn errno_io(errno: nix::errno::Errno) -> io::Error {
    io::Error::from_raw_os_error(errno as i32)
}

/// Result type alias for foreman operations.
pub type Result<T> = std::result::Result<T, ForemanError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_error_message() {
        let err = ForemanError::setup(
            "shm_open",
            io::Error::new(io::ErrorKind::PermissionDenied, "permission denied"),
        );
        let msg = err.to_string();
        assert!(msg.contains("setup failed"));
        assert!(msg.contains("shm_open"));
        assert!(msg.contains("permission denied"));
    }

    #[test]
    fn test_categories_are_distinguishable() {
        let io_err = || io::Error::other("boom");
        assert_eq!(
            ForemanError::setup("a", io_err()).category(),
            ErrorCategory::Setup
        );
        assert_eq!(ForemanError::io("b", io_err()).category(), ErrorCategory::Io);
        assert_eq!(
            ForemanError::process("c", io_err()).category(),
            ErrorCategory::Process
        );
        assert_eq!(
            ForemanError::cleanup("d", io_err()).category(),
            ErrorCategory::Cleanup
        );
    }

    #[test]
    fn test_operation_name() {
        let err = ForemanError::process("waitpid", io::Error::other("gone"));
        assert_eq!(err.operation(), "waitpid");
    }

    #[test]
    fn test_protocol_violation_is_io() {
        let err = ForemanError::protocol("read worker output", "record exceeds maximum size");
        assert_eq!(err.category(), ErrorCategory::Io);
        assert!(err.to_string().contains("record exceeds maximum size"));
    }

    #[test]
    fn test_errno_io_preserves_os_text() {
        let err = errno_io(nix::errno::Errno::ENOENT);
        assert_eq!(err.raw_os_error(), Some(libc::ENOENT));
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_ok() -> Result<i32> {
            Ok(7)
        }
        assert_eq!(returns_ok().unwrap(), 7);
    }
}
