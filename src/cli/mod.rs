// ABOUTME: CLI argument parsing and command routing for browser-pool
//
// Provides command-line interface for:
// - Inspecting the effective configuration (config show, config check)
// - Locating and creating config files (config path, config init)
//
// The CLI never launches browsers; factories are supplied by library users.

pub mod config;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Bounded browser pool with scoped page leasing
#[derive(Parser)]
#[command(name = "browser-pool")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file to use instead of the search path
    #[arg(long = "config", id = "config_path", global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,
}

/// Output format for commands
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Inspect or create configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

/// Configuration subcommands
#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum ConfigCommand {
    /// Print the effective configuration
    Show,

    /// Print the config search paths
    Path,

    /// Write the default configuration file
    Init(InitArgs),

    /// Load and validate the configuration
    Check,
}

/// Arguments for `config init`
#[derive(clap::Args, Debug, PartialEq, Eq)]
pub struct InitArgs {
    /// Overwrite an existing file
    #[arg(long, short)]
    pub force: bool,

    /// Write here instead of the user config directory
    #[arg(long)]
    pub path: Option<PathBuf>,
}
