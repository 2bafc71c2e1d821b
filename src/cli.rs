//! Command-line interface definitions using clap.

use std::path::PathBuf;

use clap::Parser;
use tracing::Level;

use crate::dispatch::protocol;

/// Dispatch a list of tasks across a pool of worker processes and publish
/// their results through a shared-memory channel.
#[derive(Parser, Debug)]
#[command(name = "foreman")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Task identifiers to dispatch, in assignment order.
    #[arg(required_unless_present = "internal_worker")]
    pub tasks: Vec<String>,

    /// Worker command (whitespace-separated program and arguments).
    #[arg(long, env = "FOREMAN_WORKER", default_value = "./worker")]
    pub worker: String,

    /// Maximum number of worker processes; the pool is never larger than
    /// the number of tasks.
    #[arg(short = 'j', long = "workers", default_value_t = protocol::DEFAULT_POOL_SIZE)]
    pub max_workers: usize,

    /// Audit log path (created or truncated at startup).
    #[arg(long, default_value = "output.txt")]
    pub audit_log: PathBuf,

    /// Name of the shared result channel; names both the shared-memory
    /// segment and the counting semaphore.
    #[arg(long, default_value = "/foreman-results")]
    pub channel_name: String,

    /// Maximum size in bytes of a single worker result record; also the
    /// per-task share of the shared buffer.
    #[arg(long, default_value_t = protocol::DEFAULT_MAX_RECORD_SIZE)]
    pub max_record_size: usize,

    /// Seconds to wait after announcing the task count, giving an external
    /// consumer time to attach to the result channel.
    #[arg(long, default_value_t = 0)]
    pub settle_delay: u64,

    /// Enable verbose output (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress all output except errors.
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Run as a built-in worker: echo NUL-terminated tasks from stdin back
    /// as tab-terminated records. Used by tests and demos.
    #[arg(long, hide = true)]
    pub internal_worker: bool,
}

impl Cli {
    /// Base log level derived from the -v/-q flags.
    pub fn log_level(&self) -> Level {
        if self.quiet {
            return Level::ERROR;
        }
        match self.verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_debug_assert() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::parse_from(["foreman", "a.txt", "b.txt"]);
        assert_eq!(cli.tasks, vec!["a.txt", "b.txt"]);
        assert_eq!(cli.max_workers, 5);
        assert_eq!(cli.max_record_size, 4096);
        assert_eq!(cli.channel_name, "/foreman-results");
        assert_eq!(cli.audit_log, PathBuf::from("output.txt"));
        assert_eq!(cli.settle_delay, 0);
        assert!(!cli.internal_worker);
    }

    #[test]
    fn test_tasks_required_without_worker_mode() {
        assert!(Cli::try_parse_from(["foreman"]).is_err());
        assert!(Cli::try_parse_from(["foreman", "--internal-worker"]).is_ok());
    }

    #[test]
    fn test_log_level_mapping() {
        let cli = Cli::parse_from(["foreman", "t"]);
        assert_eq!(cli.log_level(), Level::INFO);

        let cli = Cli::parse_from(["foreman", "-v", "t"]);
        assert_eq!(cli.log_level(), Level::DEBUG);

        let cli = Cli::parse_from(["foreman", "-vv", "t"]);
        assert_eq!(cli.log_level(), Level::TRACE);

        let cli = Cli::parse_from(["foreman", "-q", "t"]);
        assert_eq!(cli.log_level(), Level::ERROR);
    }

    #[test]
    fn test_quiet_conflicts_with_verbose() {
        assert!(Cli::try_parse_from(["foreman", "-q", "-v", "t"]).is_err());
    }

    #[test]
    fn test_worker_and_pool_flags() {
        let cli = Cli::parse_from([
            "foreman",
            "--worker",
            "target/debug/foreman --internal-worker",
            "-j",
            "3",
            "t1",
        ]);
        assert_eq!(cli.worker, "target/debug/foreman --internal-worker");
        assert_eq!(cli.max_workers, 3);
    }
}
