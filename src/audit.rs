//! Sequential audit log of completed tasks.
//!
//! Every record received from a worker is mirrored here with its
//! terminating tab translated to a newline, so the file reads as one line
//! per completed task, in receipt order.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::dispatch::protocol::RECORD_DELIMITER;
use crate::error::{ForemanError, Result};

/// Append-only audit log, freshly created (or truncated) at startup.
#[derive(Debug)]
pub struct AuditLog {
    file: File,
}

impl AuditLog {
    pub fn create(path: &Path) -> Result<Self> {
        let file =
            File::create(path).map_err(|e| ForemanError::setup("create audit log", e))?;
        Ok(Self { file })
    }

    /// Append a batch of delimiter-terminated records, translating each
    /// record delimiter to a newline. A short write is fatal.
    pub fn append_batch(&mut self, records: &[u8]) -> Result<()> {
        let mut lines = records.to_vec();
        for byte in &mut lines {
            if *byte == RECORD_DELIMITER {
                *byte = b'\n';
            }
        }
        self.file
            .write_all(&lines)
            .map_err(|e| ForemanError::io("write audit log", e))
    }

    /// Flush and close the log.
    pub fn release(self) -> Result<()> {
        self.file
            .sync_all()
            .map_err(|e| ForemanError::cleanup("close audit log", e))
    }
}
