//! foreman - process-pool task dispatcher

mod audit;
mod channel;
mod cli;
mod dispatch;
mod error;
mod logging;

use anyhow::Result;
use clap::Parser;
use owo_colors::{OwoColorize, Stream::Stderr};

use cli::Cli;
use dispatch::DispatchConfig;

fn main() {
    let cli = Cli::parse();

    // Worker mode first: the worker speaks the wire protocol on
    // stdin/stdout and must not touch logging or the channel setup.
    if cli.internal_worker {
        dispatch::worker_main::run_worker_main();
    }

    logging::init(
        logging::LogConfig::new()
            .with_level(cli.log_level())
            .with_env_overrides(),
    );

    if let Err(e) = cmd_dispatch(cli) {
        eprintln!(
            "{}: {}",
            "error"
                .if_supports_color(Stderr, |text| text.red())
                .if_supports_color(Stderr, |text| text.bold()),
            e
        );
        // Print the error chain if there are causes
        for cause in e.chain().skip(1) {
            eprintln!(
                "  {}: {}",
                "caused by".if_supports_color(Stderr, |text| text.yellow()),
                cause
            );
        }
        std::process::exit(1);
    }
}

/// Run one dispatch over the tasks given on the command line.
fn cmd_dispatch(cli: Cli) -> Result<()> {
    let config = DispatchConfig {
        tasks: cli.tasks,
        worker_command: cli.worker,
        max_workers: cli.max_workers,
        channel_name: cli.channel_name,
        audit_path: cli.audit_log,
        max_record_size: cli.max_record_size,
        settle_delay: std::time::Duration::from_secs(cli.settle_delay),
    };

    let summary = dispatch::run(config)?;
    tracing::info!(
        tasks = summary.total,
        workers = summary.workers,
        bytes = summary.bytes_published,
        "run finished"
    );
    Ok(())
}
