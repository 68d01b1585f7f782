//! Kinema CLI entry point

use anyhow::Result;
use clap::Parser;

use kinema_cli::{execute, Cli};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .format_target(false)
        .init();

    execute(cli)
}
