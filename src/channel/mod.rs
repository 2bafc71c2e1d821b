//! Shared result channel: how completed-task records reach the outside.
//!
//! Three sinks are fed from every batch of records the dispatch loop
//! collects, in a fixed order:
//!
//! ```text
//!            ┌──────────────────┐
//!   batch ──▶│    Publisher     │
//!            └───────┬──────────┘
//!                    │ 1. raw bytes, append-only   ┌────────────────┐
//!                    ├────────────────────────────▶│ shm segment    │
//!                    │ 2. tab → newline            ├────────────────┤
//!                    ├────────────────────────────▶│ audit log      │
//!                    │ 3. one post per record      ├────────────────┤
//!                    └────────────────────────────▶│ semaphore      │
//!                                                  └────────────────┘
//! ```
//!
//! The semaphore is the only notification an external consumer gets; the
//! segment holds the payload, verbatim and tab-delimited, so the consumer
//! applies the same parsing rule the dispatcher does.

mod sem;
mod shm;

pub use sem::NamedSemaphore;
pub use shm::SharedBuffer;

use std::path::Path;

use tracing::{debug, trace};

use crate::audit::AuditLog;
use crate::error::Result;

/// The full publication side of the run: shared segment, semaphore, and
/// audit log, created together at startup and released together at
/// shutdown.
pub struct Publisher {
    shm: SharedBuffer,
    sem: NamedSemaphore,
    audit: AuditLog,
}

impl Publisher {
    /// `channel_name` names both the segment and the semaphore (POSIX
    /// keeps them in distinct namespaces).
    pub fn create(channel_name: &str, capacity: usize, audit_path: &Path) -> Result<Self> {
        let shm = SharedBuffer::create(channel_name, capacity)?;
        let sem = NamedSemaphore::create(channel_name)?;
        let audit = AuditLog::create(audit_path)?;
        debug!(channel = channel_name, capacity, "result channel ready");
        Ok(Self { shm, sem, audit })
    }

    /// Publish one batch of delimiter-terminated records: append the raw
    /// bytes to the shared buffer, mirror them into the audit log, then
    /// signal the semaphore once per record, in receipt order.
    pub fn publish(&mut self, records: &[u8], count: usize) -> Result<()> {
        self.shm.append(records)?;
        self.audit.append_batch(records)?;
        for _ in 0..count {
            self.sem.post()?;
        }
        trace!(bytes = records.len(), records = count, "published batch");
        Ok(())
    }

    /// Total bytes appended to the shared buffer so far.
    pub fn bytes_published(&self) -> usize {
        self.shm.cursor()
    }

    /// Release everything: the semaphore first, then the segment, then
    /// the audit log.
    pub fn release(self) -> Result<()> {
        let Self { shm, sem, audit } = self;
        sem.release()?;
        shm.release()?;
        audit.release()
    }

    #[cfg(test)]
    pub fn shm(&self) -> &SharedBuffer {
        &self.shm
    }

    #[cfg(test)]
    pub fn sem(&self) -> &NamedSemaphore {
        &self.sem
    }
}
