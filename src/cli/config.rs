// ABOUTME: CLI config command - show, locate, create and validate configuration
//
// `show` and `check` print the configuration after pool clamping so what the
// user sees is what a Pool built from it would use.

use super::{ConfigCommand, InitArgs, OutputFormat};
use crate::config::{AppConfig, LoadedConfig};
use anyhow::{bail, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// One entry of the config search path
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SearchPath {
    pub path: PathBuf,
    pub exists: bool,
}

/// Result of validating a config
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CheckReport {
    pub source: Option<PathBuf>,
    pub adjustments: Vec<String>,
}

/// Execute a config subcommand
pub fn execute(command: ConfigCommand, explicit: Option<&Path>, format: OutputFormat) -> Result<()> {
    match command {
        ConfigCommand::Show => show(explicit, format),
        ConfigCommand::Path => {
            print_paths(&search_paths(explicit), format)?;
            Ok(())
        }
        ConfigCommand::Init(args) => {
            let path = init(&args, explicit)?;
            println!("Wrote default configuration to {}", path.display());
            Ok(())
        }
        ConfigCommand::Check => {
            let loaded = AppConfig::load(explicit)?;
            print_report(&check(&loaded), format)
        }
    }
}

fn show(explicit: Option<&Path>, format: OutputFormat) -> Result<()> {
    let loaded = AppConfig::load(explicit)?;
    let config = loaded.config.normalized();

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&config)?),
        OutputFormat::Text => {
            match &loaded.source {
                Some(path) => println!("# Loaded from {}", path.display()),
                None => println!("# No config file found, using defaults"),
            }
            print!("{}", toml::to_string_pretty(&config)?);
        }
    }
    Ok(())
}

/// Search path, explicit file first when given
pub fn search_paths(explicit: Option<&Path>) -> Vec<SearchPath> {
    let paths = match explicit {
        Some(path) => vec![path.to_path_buf()],
        None => AppConfig::config_paths(),
    };

    paths
        .into_iter()
        .map(|path| SearchPath {
            exists: path.exists(),
            path,
        })
        .collect()
}

fn print_paths(paths: &[SearchPath], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(paths)?),
        OutputFormat::Text => {
            for entry in paths {
                let marker = if entry.exists { "found" } else { "missing" };
                println!("{:<8} {}", marker, entry.path.display());
            }
        }
    }
    Ok(())
}

/// Write the default config and return where it went
pub fn init(args: &InitArgs, explicit: Option<&Path>) -> Result<PathBuf> {
    let path = match (&args.path, explicit) {
        (Some(path), _) => path.clone(),
        (None, Some(path)) => path.to_path_buf(),
        (None, None) => AppConfig::user_config_path()?,
    };

    if path.exists() && !args.force {
        bail!("{} already exists, pass --force to overwrite", path.display());
    }

    AppConfig::default().save_to(&path)?;
    Ok(path)
}

/// Validate a loaded config
pub fn check(loaded: &LoadedConfig) -> CheckReport {
    CheckReport {
        source: loaded.source.clone(),
        adjustments: loaded.config.adjustments(),
    }
}

fn print_report(report: &CheckReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(report)?),
        OutputFormat::Text => {
            match &report.source {
                Some(path) => println!("Config: {}", path.display()),
                None => println!("Config: defaults (no file found)"),
            }
            if report.adjustments.is_empty() {
                println!("OK");
            } else {
                for note in &report.adjustments {
                    println!("adjusted: {note}");
                }
            }
        }
    }
    Ok(())
}
