// ABOUTME: Main entry point for the browser-pool command line tool
//
// Binary: browser-pool
// Usage: browser-pool [--config PATH] [--format text|json] [--log-json] config <COMMAND>
// - config show: effective configuration after clamping
// - config path: config search paths
// - config init: write the default configuration file
// - config check: validate and report adjustments

#![allow(missing_docs)]

use anyhow::Result;
use clap::Parser;

use browser_pool::cli::{self, Commands};

fn main() -> Result<()> {
    let args = cli::Cli::parse();
    setup_logging(args.log_json);

    match args.command {
        Commands::Config(command) => cli::config::execute(command, args.config.as_deref(), args.format),
    }
}

fn setup_logging(json: bool) {
    use tracing_subscriber::prelude::*;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "browser_pool=info".into());

    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json() // Output in JSON Lines format
                    .with_target(true)
                    .with_writer(std::io::stderr)
                    .with_ansi(false),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
