//! Wire protocol between the dispatcher and its workers.
//!
//! Tasks go out as the raw identifier bytes plus a terminating NUL; no
//! acknowledgement is read back. Results come in as records each
//! terminated by a single tab, and a worker may batch any number of
//! records into one write, so parsing treats the receive side as a byte
//! stream: one read may hold zero, one, or many complete records, plus
//! the head of a record whose tab has not arrived yet.

/// Terminates a task identifier on the dispatcher → worker channel.
pub const TASK_TERMINATOR: u8 = 0;

/// Terminates a result record on the worker → dispatcher channel.
pub const RECORD_DELIMITER: u8 = b'\t';

/// Default bound on a single result record, and the per-task share of the
/// shared buffer.
pub const DEFAULT_MAX_RECORD_SIZE: usize = 4096;

/// Default maximum pool size.
pub const DEFAULT_POOL_SIZE: usize = 5;

/// Tasks handed to each worker at startup when the task list is long
/// enough to keep the whole pool busy twice over.
pub const INITIAL_BATCH_MAX: usize = 2;

/// A pool is never larger than the work available.
pub fn effective_pool_size(max_workers: usize, total_tasks: usize) -> usize {
    max_workers.min(total_tasks)
}

/// Initial per-worker load: two tasks when at least `2 * pool_size` tasks
/// exist, otherwise one.
pub fn initial_load(total_tasks: usize, pool_size: usize) -> usize {
    if total_tasks >= INITIAL_BATCH_MAX * pool_size {
        INITIAL_BATCH_MAX
    } else {
        1
    }
}

/// Split a buffered chunk into its complete records and the partial tail.
///
/// Returns the delimiter-terminated prefix, the tail past the last
/// delimiter, and the number of complete records in the prefix.
pub fn split_records(buf: &[u8]) -> (&[u8], &[u8], usize) {
    match buf.iter().rposition(|&b| b == RECORD_DELIMITER) {
        Some(last) => {
            let count = buf[..=last]
                .iter()
                .filter(|&&b| b == RECORD_DELIMITER)
                .count();
            (&buf[..=last], &buf[last + 1..], count)
        }
        None => (&[], buf, 0),
    }
}
