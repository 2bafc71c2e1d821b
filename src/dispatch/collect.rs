//! Readiness-multiplexed collection of worker results.
//!
//! The loop has a single state, "collecting", re-entered until every task
//! has completed. Each iteration blocks in `select` over all receive
//! channels (the dispatcher's only suspension point), then drains every
//! ready channel with one bounded read. Batched draining matters for
//! correctness, not just throughput: several workers can become ready in
//! one wake, and one read can carry several records.

use nix::errno::Errno;
use nix::sys::select::{FdSet, select};
use tracing::{debug, trace};

use crate::channel::Publisher;
use crate::dispatch::TaskQueue;
use crate::dispatch::pool::{WorkerHandle, WorkerPool};
use crate::error::{ForemanError, Result, errno_io};

/// Drive the pool until every task has completed. Returns the completed
/// count, which equals the queue's total on success.
pub fn collect_results(
    pool: &mut WorkerPool,
    queue: &mut TaskQueue,
    publisher: &mut Publisher,
    max_record_size: usize,
) -> Result<usize> {
    let total = queue.total();
    let mut completed = 0usize;
    let mut buf = vec![0u8; max_record_size];

    while completed < total {
        for idx in wait_ready(pool)? {
            completed += drain_worker(
                pool.worker_mut(idx),
                queue,
                publisher,
                &mut buf,
                max_record_size,
            )?;
        }
    }

    debug!(completed, "all tasks completed");
    Ok(completed)
}

/// Block until at least one worker channel is readable. Several channels
/// can be ready per wake; all of them are returned, in slot order.
fn wait_ready(pool: &WorkerPool) -> Result<Vec<usize>> {
    loop {
        let mut readfds = FdSet::new();
        for worker in pool.workers() {
            if let Some(fd) = worker.result_fd() {
                readfds.insert(fd);
            }
        }

        match select(None, &mut readfds, None, None, None) {
            Ok(_) => {
                return Ok(pool
                    .workers()
                    .enumerate()
                    .filter(|(_, worker)| {
                        worker.result_fd().is_some_and(|fd| readfds.contains(fd))
                    })
                    .map(|(idx, _)| idx)
                    .collect());
            }
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(ForemanError::io("select", errno_io(e))),
        }
    }
}

/// One bounded read from a ready worker: buffer the chunk, publish every
/// complete record, and refill the worker once it has drained to zero.
fn drain_worker(
    worker: &mut WorkerHandle,
    queue: &mut TaskQueue,
    publisher: &mut Publisher,
    buf: &mut [u8],
    max_record_size: usize,
) -> Result<usize> {
    let n = worker.read_chunk(buf)?;
    if n == 0 {
        // EOF: the worker closed its output. Not progress; reaping happens
        // only at shutdown. A task still in flight here hangs the run.
        trace!(worker = worker.id(), "worker output closed");
        return Ok(0);
    }

    let Some((batch, count)) = worker.take_records(&buf[..n], max_record_size)? else {
        return Ok(0);
    };

    for _ in 0..count {
        worker.record_completion()?;
    }
    publisher.publish(&batch, count)?;
    trace!(
        worker = worker.id(),
        records = count,
        in_flight = worker.in_flight(),
        "collected records"
    );

    // Refill policy: exactly one new task, and only once the worker has
    // fully drained.
    if worker.is_idle()
        && let Some(task) = queue.next()
    {
        worker.assign(task)?;
    }

    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::ipc::{PipeFd, TaskWriter};
    use std::io::{Read, Write};
    use tempfile::tempdir;

    fn test_channel(tag: &str) -> String {
        format!("/foreman-collect-test-{}-{}", std::process::id(), tag)
    }

    fn pipe_pair() -> (PipeFd, PipeFd) {
        let (read_fd, write_fd) = nix::unistd::pipe().expect("Failed to create pipe");
        (PipeFd::new(read_fd), PipeFd::new(write_fd))
    }

    /// A fake worker: the handle the dispatcher sees, plus the worker-side
    /// pipe ends the test drives directly.
    fn fake_worker(id: usize) -> (WorkerHandle, PipeFd, PipeFd) {
        let (task_rx, task_tx) = pipe_pair();
        let (result_rx, result_tx) = pipe_pair();
        let handle = WorkerHandle::fake(id, TaskWriter::new(task_tx), result_rx);
        (handle, task_rx, result_tx)
    }

    fn make_publisher(tag: &str, capacity: usize) -> (Publisher, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let publisher =
            Publisher::create(&test_channel(tag), capacity, &dir.path().join("audit.txt"))
                .unwrap();
        (publisher, dir)
    }

    #[test]
    fn test_two_records_in_one_read_both_counted() {
        let (mut publisher, _dir) = make_publisher("batched", 64);
        let (mut handle, _task_rx, mut result_tx) = fake_worker(0);
        handle.set_in_flight(2);

        let mut queue = TaskQueue::new(vec!["a".into(), "b".into()]);
        queue.next();
        queue.next();

        result_tx.write_all(b"a\tb\t").unwrap();

        let mut pool = WorkerPool::from_handles(vec![handle]);
        let completed =
            collect_results(&mut pool, &mut queue, &mut publisher, 4096).unwrap();

        assert_eq!(completed, 2);
        assert_eq!(publisher.shm().contents(), b"a\tb\t");
        assert_eq!(publisher.sem().value(), 2);
        publisher.release().unwrap();
    }

    #[test]
    fn test_refill_only_after_draining_to_zero() {
        let (mut publisher, _dir) = make_publisher("refill", 64);
        let (mut handle, mut task_rx, mut result_tx) = fake_worker(0);
        handle.set_in_flight(2);

        // Three tasks: two in flight, one still pending.
        let mut queue = TaskQueue::new(vec!["a".into(), "b".into(), "c".into()]);
        queue.next();
        queue.next();

        let mut buf = vec![0u8; 4096];

        // First completion: worker still has one in flight, no refill.
        result_tx.write_all(b"a\t").unwrap();
        let count =
            drain_worker(&mut handle, &mut queue, &mut publisher, &mut buf, 4096).unwrap();
        assert_eq!(count, 1);
        assert_eq!(handle.in_flight(), 1);
        assert_eq!(queue.pending(), 1);

        // Second completion drains the worker; exactly one task goes out.
        result_tx.write_all(b"b\t").unwrap();
        let count =
            drain_worker(&mut handle, &mut queue, &mut publisher, &mut buf, 4096).unwrap();
        assert_eq!(count, 1);
        assert_eq!(handle.in_flight(), 1);
        assert_eq!(queue.pending(), 0);

        let mut sent = [0u8; 8];
        let n = task_rx.read(&mut sent).unwrap();
        assert_eq!(&sent[..n], b"c\0");

        publisher.release().unwrap();
    }

    #[test]
    fn test_record_split_across_reads() {
        let (mut publisher, _dir) = make_publisher("split", 64);
        let (mut handle, _task_rx, mut result_tx) = fake_worker(0);
        handle.set_in_flight(1);

        let mut queue = TaskQueue::new(vec!["task-1".into()]);
        queue.next();

        let mut buf = vec![0u8; 4096];

        result_tx.write_all(b"task-").unwrap();
        let count =
            drain_worker(&mut handle, &mut queue, &mut publisher, &mut buf, 4096).unwrap();
        assert_eq!(count, 0);
        assert_eq!(handle.in_flight(), 1);

        result_tx.write_all(b"1\t").unwrap();
        let count =
            drain_worker(&mut handle, &mut queue, &mut publisher, &mut buf, 4096).unwrap();
        assert_eq!(count, 1);
        assert_eq!(publisher.shm().contents(), b"task-1\t");
        assert_eq!(publisher.sem().value(), 1);

        publisher.release().unwrap();
    }

    #[test]
    fn test_closed_worker_is_not_progress() {
        let (mut publisher, _dir) = make_publisher("eof", 64);

        // Worker 0 exits immediately: its channel reads EOF forever.
        let (handle_dead, _task_rx0, result_tx0) = fake_worker(0);
        drop(result_tx0);

        // Worker 1 carries the whole run.
        let (mut handle_live, _task_rx1, mut result_tx1) = fake_worker(1);
        handle_live.set_in_flight(1);
        result_tx1.write_all(b"a\t").unwrap();

        let mut queue = TaskQueue::new(vec!["a".into()]);
        queue.next();

        let mut pool = WorkerPool::from_handles(vec![handle_dead, handle_live]);
        let completed =
            collect_results(&mut pool, &mut queue, &mut publisher, 4096).unwrap();

        assert_eq!(completed, 1);
        assert_eq!(publisher.sem().value(), 1);
        publisher.release().unwrap();
    }

    #[test]
    fn test_worker_thread_roundtrip_with_refill() {
        let (mut publisher, _dir) = make_publisher("thread", 64);
        let (mut handle, mut task_rx, mut result_tx) = fake_worker(0);
        handle.set_in_flight(1);

        let mut queue = TaskQueue::new(vec!["a".into(), "b".into()]);
        queue.next();

        // The fake worker completes "a", then echoes whatever task the
        // refill sends it.
        let worker = std::thread::spawn(move || {
            result_tx.write_all(b"a\t").unwrap();

            let mut got = Vec::new();
            let mut buf = [0u8; 64];
            while !got.contains(&0) {
                let n = task_rx.read(&mut buf).unwrap();
                if n == 0 {
                    break;
                }
                got.extend_from_slice(&buf[..n]);
            }
            assert_eq!(got, b"b\0");
            result_tx.write_all(b"b\t").unwrap();
        });

        let mut pool = WorkerPool::from_handles(vec![handle]);
        let completed =
            collect_results(&mut pool, &mut queue, &mut publisher, 4096).unwrap();
        worker.join().unwrap();

        assert_eq!(completed, 2);
        assert_eq!(publisher.shm().contents(), b"a\tb\t");
        assert_eq!(publisher.sem().value(), 2);
        publisher.release().unwrap();
    }

    #[test]
    fn test_unexpected_completion_is_an_error() {
        let (mut publisher, _dir) = make_publisher("underflow", 64);
        let (mut handle, _task_rx, mut result_tx) = fake_worker(0);
        // Nothing in flight, yet the worker reports a completion.
        result_tx.write_all(b"ghost\t").unwrap();

        let mut queue = TaskQueue::new(vec!["a".into()]);
        let mut buf = vec![0u8; 4096];
        let err = drain_worker(&mut handle, &mut queue, &mut publisher, &mut buf, 4096)
            .unwrap_err();
        assert!(err.to_string().contains("no task in flight"));

        publisher.release().unwrap();
    }
}
