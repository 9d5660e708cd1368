//! Main entry point for the bitum CLI app

use bitum::cli;
use bitum::cli_runner::run_command;
use bitum::config::Workspace;
use tracing_subscriber::EnvFilter;

fn main() -> std::process::ExitCode {
    let args = cli::run();

    let level = match args.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let workspace = Workspace::new(&args.workdir);
    if let Err(e) = run_command(&workspace, &args.command) {
        eprintln!("Error: {}", e);
        return std::process::ExitCode::FAILURE;
    }
    std::process::ExitCode::SUCCESS
}
