//! Worker subprocess spawning.
//!
//! Uses `std::process::Command` with piped stdio: the worker's stdin
//! becomes the dispatcher's send channel and its stdout the receive
//! channel. stderr is inherited so worker diagnostics reach the operator.

use std::io;
use std::os::fd::OwnedFd;
use std::process::{Command, Stdio};

use nix::unistd::Pid;

use crate::dispatch::ipc::{PipeFd, TaskWriter};
use crate::error::{ForemanError, Result};

/// The worker invocation, parsed from the `--worker` option.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    program: String,
    args: Vec<String>,
}

impl WorkerCommand {
    /// Split a whitespace-separated command line into program and arguments.
    pub fn parse(command_line: &str) -> Result<Self> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts.next().ok_or_else(|| {
            ForemanError::setup(
                "parse worker command",
                io::Error::new(io::ErrorKind::InvalidInput, "worker command is empty"),
            )
        })?;
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

/// Spawn one worker process wired to a fresh channel pair.
///
/// Returns the child's pid, the send channel, and the receive channel.
pub fn spawn_worker(command: &WorkerCommand) -> Result<(Pid, TaskWriter, PipeFd)> {
    let mut child = Command::new(&command.program)
        .args(&command.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(|e| ForemanError::process("spawn worker", e))?;

    let pid = Pid::from_raw(child.id() as i32);

    let stdin = child.stdin.take().ok_or_else(|| {
        ForemanError::process(
            "spawn worker",
            io::Error::other("child stdin not captured"),
        )
    })?;
    let stdout = child.stdout.take().ok_or_else(|| {
        ForemanError::process(
            "spawn worker",
            io::Error::other("child stdout not captured"),
        )
    })?;

    let task_tx = TaskWriter::new(PipeFd::new(OwnedFd::from(stdin)));
    let result_rx = PipeFd::new(OwnedFd::from(stdout));

    Ok((pid, task_tx, result_rx))
}
