use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use weaknet::Cli;

fn main() -> ExitCode {
    // Malformed arguments exit with 1, before anything touches the network.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() { ExitCode::FAILURE } else { ExitCode::SUCCESS };
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match weaknet::run(&cli) {
        Ok(report) => {
            tracing::info!(completed = report.completed(), failed = report.failed(), "done");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
