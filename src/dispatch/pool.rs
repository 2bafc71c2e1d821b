//! Worker handle arena and pool lifecycle.
//!
//! Workers are created once at pool initialization and destroyed once at
//! termination; their identity and channel descriptors never change in
//! between. Each handle owns the dispatcher side of both pipes plus the
//! bookkeeping the dispatch loop needs: the in-flight count and the carry
//! buffer for records split across reads.

#![allow(dead_code)] // Some accessors are for monitoring and tests

use std::io::{self, Read};
use std::os::fd::BorrowedFd;

use nix::sys::signal::{self, Signal};
use nix::sys::wait::waitpid;
use nix::unistd::Pid;
use tracing::{debug, info, trace};

use crate::dispatch::TaskQueue;
use crate::dispatch::ipc::{PipeFd, TaskWriter};
use crate::dispatch::protocol;
use crate::dispatch::spawn::{WorkerCommand, spawn_worker};
use crate::error::{ForemanError, Result, errno_io};

/// One live worker process and its dispatcher-side state.
#[derive(Debug)]
pub struct WorkerHandle {
    /// Slot number, for logging.
    id: usize,
    pid: Pid,
    task_tx: Option<TaskWriter>,
    result_rx: Option<PipeFd>,
    /// Tasks sent minus completions reported.
    in_flight: usize,
    /// Bytes of a record whose terminating delimiter has not arrived yet.
    carry: Vec<u8>,
    reaped: bool,
}

impl WorkerHandle {
    fn new(id: usize, pid: Pid, task_tx: TaskWriter, result_rx: PipeFd) -> Self {
        Self {
            id,
            pid,
            task_tx: Some(task_tx),
            result_rx: Some(result_rx),
            in_flight: 0,
            carry: Vec::new(),
            reaped: false,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn is_idle(&self) -> bool {
        self.in_flight == 0
    }

    /// Receive-channel descriptor for the readiness wait; `None` once the
    /// channels have been closed at shutdown.
    pub fn result_fd(&self) -> Option<BorrowedFd<'_>> {
        self.result_rx.as_ref().map(std::os::fd::AsFd::as_fd)
    }

    /// Send one task on the worker's channel and count it in flight.
    pub fn assign(&mut self, task: &str) -> Result<()> {
        let tx = self.task_tx.as_mut().ok_or_else(|| {
            ForemanError::io(
                "assign task",
                io::Error::new(io::ErrorKind::BrokenPipe, "send channel closed"),
            )
        })?;
        tx.send(task)
            .map_err(|e| ForemanError::io("assign task", e))?;
        self.in_flight += 1;
        trace!(worker = self.id, task = %task, "task assigned");
        Ok(())
    }

    /// Count one reported completion; a worker can never complete more
    /// tasks than it was sent.
    pub fn record_completion(&mut self) -> Result<()> {
        self.in_flight = self.in_flight.checked_sub(1).ok_or_else(|| {
            ForemanError::protocol(
                "read worker output",
                format!("worker {} reported a completion with no task in flight", self.id),
            )
        })?;
        Ok(())
    }

    /// One bounded read from the receive channel. Zero means the worker
    /// closed its output (or the channel is already gone).
    pub(crate) fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize> {
        let Some(rx) = self.result_rx.as_mut() else {
            return Ok(0);
        };
        rx.read(buf)
            .map_err(|e| ForemanError::io("read worker output", e))
    }

    /// Buffer a chunk and pull out the complete records accumulated so far.
    ///
    /// Bytes past the last delimiter stay in the carry buffer for the next
    /// read. Returns the delimiter-terminated batch and its record count,
    /// or `None` when no record has completed yet. A carry that reaches
    /// `max_record_size` without a delimiter is a protocol violation.
    pub(crate) fn take_records(
        &mut self,
        chunk: &[u8],
        max_record_size: usize,
    ) -> Result<Option<(Vec<u8>, usize)>> {
        self.carry.extend_from_slice(chunk);

        let (complete, _tail, count) = protocol::split_records(&self.carry);
        let complete_len = complete.len();
        let out = if count > 0 {
            let tail = self.carry.split_off(complete_len);
            let batch = std::mem::replace(&mut self.carry, tail);
            Some((batch, count))
        } else {
            None
        };

        if self.carry.len() >= max_record_size {
            return Err(ForemanError::protocol(
                "read worker output",
                format!(
                    "worker {} record exceeds maximum size {}",
                    self.id, max_record_size
                ),
            ));
        }

        Ok(out)
    }

    /// Drop both channel descriptors. Signals end-of-input to a worker
    /// still reading.
    fn close_channels(&mut self) {
        self.task_tx = None;
        self.result_rx = None;
    }

    /// Wait for the process to exit. The exit status is not inspected.
    fn reap(&mut self) -> Result<()> {
        waitpid(self.pid, None).map_err(|e| ForemanError::process("waitpid", errno_io(e)))?;
        self.reaped = true;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn fake(id: usize, task_tx: TaskWriter, result_rx: PipeFd) -> Self {
        Self {
            id,
            pid: nix::unistd::getpid(),
            task_tx: Some(task_tx),
            result_rx: Some(result_rx),
            in_flight: 0,
            carry: Vec::new(),
            // The pid is our own; never signal or wait on it.
            reaped: true,
        }
    }

    #[cfg(test)]
    pub(crate) fn set_in_flight(&mut self, n: usize) {
        self.in_flight = n;
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        if self.reaped {
            return;
        }
        // Backstop for error paths: don't strand the child. The channels
        // close when the fd owners drop; SIGKILL keeps the reap from
        // blocking on a worker that ignores EOF.
        let _ = signal::kill(self.pid, Signal::SIGKILL);
        let _ = waitpid(self.pid, None);
    }
}

/// Fixed-size arena of worker handles, indexed by slot.
#[derive(Debug)]
pub struct WorkerPool {
    workers: Vec<WorkerHandle>,
}

impl WorkerPool {
    /// Spawn the pool and hand every worker its initial batch.
    ///
    /// Effective pool size is `min(max_workers, total tasks)`; the initial
    /// per-worker load is two when the task list covers the pool twice,
    /// else one. Any spawn or channel failure aborts initialization.
    pub fn init(
        command: &WorkerCommand,
        max_workers: usize,
        queue: &mut TaskQueue,
    ) -> Result<Self> {
        let pool_size = protocol::effective_pool_size(max_workers, queue.total());
        let batch = protocol::initial_load(queue.total(), pool_size);
        info!(
            workers = pool_size,
            initial_load = batch,
            worker_command = command.program(),
            "initializing worker pool"
        );

        let mut workers = Vec::with_capacity(pool_size);
        for id in 0..pool_size {
            let (pid, task_tx, result_rx) = spawn_worker(command)?;
            let mut worker = WorkerHandle::new(id, pid, task_tx, result_rx);
            while worker.in_flight() < batch {
                let Some(task) = queue.next() else { break };
                worker.assign(task)?;
            }
            workers.push(worker);
        }

        debug!(
            distributed = queue.cursor(),
            pending = queue.pending(),
            "initial batches sent"
        );
        Ok(Self { workers })
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn workers(&self) -> impl Iterator<Item = &WorkerHandle> {
        self.workers.iter()
    }

    pub fn worker_mut(&mut self, idx: usize) -> &mut WorkerHandle {
        &mut self.workers[idx]
    }

    /// Close every worker's channels (pool order), then reap every worker
    /// (pool order, one reap each, exit status ignored).
    pub fn shutdown(mut self) -> Result<()> {
        for worker in &mut self.workers {
            worker.close_channels();
        }
        for worker in &mut self.workers {
            worker.reap()?;
        }
        debug!("worker pool terminated");
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn from_handles(workers: Vec<WorkerHandle>) -> Self {
        Self { workers }
    }
}
