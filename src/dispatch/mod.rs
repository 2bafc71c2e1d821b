//! Job-dispatch engine: a pool of worker subprocesses fed over pipes.
//!
//! The dispatcher hands tasks out in order, collects tab-terminated result
//! records as workers produce them, and rebalances remaining tasks onto
//! workers as they drain.
//!
//! # Architecture
//!
//! ```text
//!                  ┌──────────────────┐
//!                  │    Dispatcher    │───▶ shared buffer + semaphore
//!                  │    (foreman)     │───▶ audit log
//!                  └────────┬─────────┘
//!            tasks ▼        ▼        ▼ records
//!            ┌─────────┐┌─────────┐┌─────────┐
//!            │ Worker 0││ Worker 1││ Worker N│
//!            │(process)││(process)││(process)│
//!            └─────────┘└─────────┘└─────────┘
//! ```
//!
//! One run per invocation: the pool is sized and the task list fixed at
//! start, and the engine exits when every task has completed.

mod collect;
mod ipc;
mod pool;
pub mod protocol;
mod spawn;
pub mod worker_main;

pub use pool::WorkerPool;
pub use spawn::WorkerCommand;

use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use tracing::info;

use crate::channel::Publisher;
use crate::error::{ForemanError, Result};

/// Everything a run needs, fixed at start.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Task identifiers, in assignment order.
    pub tasks: Vec<String>,
    /// Worker command line (whitespace-separated program and arguments).
    pub worker_command: String,
    /// Upper bound on the pool size.
    pub max_workers: usize,
    /// Name of the shared-memory segment and semaphore.
    pub channel_name: String,
    /// Audit log path.
    pub audit_path: PathBuf,
    /// Bound on a single result record; sizes the shared buffer.
    pub max_record_size: usize,
    /// Pause between announcing the task count and starting the pool.
    pub settle_delay: Duration,
}

/// What a completed run looked like.
#[derive(Debug, Clone, Copy)]
pub struct RunSummary {
    pub total: usize,
    pub workers: usize,
    pub bytes_published: usize,
}

/// Ordered task list with the shared dispatch cursor.
pub struct TaskQueue {
    tasks: Vec<String>,
    cursor: usize,
}

impl TaskQueue {
    pub fn new(tasks: Vec<String>) -> Self {
        Self { tasks, cursor: 0 }
    }

    pub fn total(&self) -> usize {
        self.tasks.len()
    }

    /// Tasks not yet assigned to any worker.
    pub fn pending(&self) -> usize {
        self.tasks.len() - self.cursor
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Hand out the next task, advancing the cursor.
    pub fn next(&mut self) -> Option<&str> {
        let task = self.tasks.get(self.cursor)?;
        self.cursor += 1;
        Some(task.as_str())
    }
}

/// Execute one full dispatch run: set up the result channel, announce the
/// task count, start the pool, collect until done, tear everything down.
pub fn run(config: DispatchConfig) -> Result<RunSummary> {
    let total = config.tasks.len();
    if config.max_workers == 0 {
        return Err(ForemanError::setup(
            "size worker pool",
            io::Error::new(io::ErrorKind::InvalidInput, "pool size must be at least one"),
        ));
    }
    let capacity = total.checked_mul(config.max_record_size).ok_or_else(|| {
        ForemanError::setup(
            "size shared buffer",
            io::Error::new(io::ErrorKind::InvalidInput, "capacity overflows usize"),
        )
    })?;

    let command = WorkerCommand::parse(&config.worker_command)?;
    let mut publisher = Publisher::create(&config.channel_name, capacity, &config.audit_path)?;

    announce(total)?;
    if !config.settle_delay.is_zero() {
        std::thread::sleep(config.settle_delay);
    }

    let mut queue = TaskQueue::new(config.tasks);
    let mut pool = WorkerPool::init(&command, config.max_workers, &mut queue)?;
    let workers = pool.len();

    let completed =
        collect::collect_results(&mut pool, &mut queue, &mut publisher, config.max_record_size)?;

    pool.shutdown()?;
    let bytes_published = publisher.bytes_published();
    publisher.release()?;

    info!(total = completed, workers, bytes_published, "dispatch run complete");
    Ok(RunSummary {
        total: completed,
        workers,
        bytes_published,
    })
}

/// Write the task count to stdout, unterminated, as the readiness signal
/// for whatever launched us.
fn announce(total: usize) -> Result<()> {
    let mut stdout = io::stdout();
    write!(stdout, "{total}")
        .and_then(|_| stdout.flush())
        .map_err(|e| ForemanError::setup("announce task count", e))
}
