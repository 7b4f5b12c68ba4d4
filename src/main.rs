use clap::Parser;
use jwtbridge::cli::{run, Cli};
use jwtbridge::logging::{init_logging_with_config, LogConfig};
use std::process::ExitCode;

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let _log_guard = init_logging_with_config(&LogConfig::from_env())?;
    run(cli)
}
