//! Built-in worker entry point.
//!
//! Runs when `foreman --internal-worker` is invoked: reads NUL-terminated
//! task identifiers from stdin and immediately reports each one back as a
//! tab-terminated record. The real worker program is an external
//! collaborator; this one exists so tests and demos have a dependable
//! counterpart speaking the same wire protocol.

use std::io::{self, Read, Write};

use crate::dispatch::ipc::PipeFd;
use crate::dispatch::protocol::{RECORD_DELIMITER, TASK_TERMINATOR};

/// Echo loop: one result record per received task, until end-of-input.
fn worker_loop(input: &mut PipeFd, output: &mut PipeFd) -> io::Result<()> {
    let mut pending = Vec::new();
    let mut buf = [0u8; 4096];

    loop {
        let n = input.read(&mut buf)?;
        if n == 0 {
            // Dispatcher closed the channel: we're done.
            return Ok(());
        }
        pending.extend_from_slice(&buf[..n]);

        while let Some(end) = pending.iter().position(|&b| b == TASK_TERMINATOR) {
            let mut record: Vec<u8> = pending.drain(..=end).collect();
            // Swap the task terminator for the record delimiter.
            record[end] = RECORD_DELIMITER;
            output.write_all(&record)?;
        }
    }
}

/// Run the worker main function. Never returns.
pub fn run_worker_main() -> ! {
    // Ignore SIGPIPE - pipe errors surface as io::Error instead.
    unsafe {
        nix::sys::signal::signal(
            nix::sys::signal::Signal::SIGPIPE,
            nix::sys::signal::SigHandler::SigIgn,
        )
        .ok();
    }

    // Safety: file descriptors 0 and 1 are always valid for stdin/stdout.
    let mut input = unsafe { PipeFd::from_raw(0) };
    let mut output = unsafe { PipeFd::from_raw(1) };

    match worker_loop(&mut input, &mut output) {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            eprintln!("worker error: {}", e);
            std::process::exit(1);
        }
    }
}
