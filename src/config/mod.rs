// ABOUTME: Configuration management for browser-pool
// Handles pool sizing, session defaults and shutdown behaviour loaded from TOML

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::pool::PoolConfig;
use crate::session::SessionConfig;

/// Environment variable naming an explicit config file
pub const CONFIG_ENV: &str = "BROWSER_POOL_CONFIG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application version
    #[serde(default = "default_version")]
    pub version: String,

    /// Pool sizing and freshness
    #[serde(default)]
    pub pool: PoolConfig,

    /// Defaults for new sessions
    #[serde(default)]
    pub session: SessionConfig,

    /// Signal handling
    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownConfig {
    /// How long the shutdown drain waits for leased browsers (seconds)
    #[serde(default = "default_grace_period", with = "duration_secs")]
    pub grace_period: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_period: default_grace_period(),
        }
    }
}

fn default_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

const fn default_grace_period() -> Duration {
    Duration::from_secs(10)
}

/// A config together with the file it came from
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: AppConfig,
    /// None when no file was found and defaults are in effect
    pub source: Option<PathBuf>,
}

impl AppConfig {
    /// Load configuration using the standard search order
    ///
    /// An explicit path (from `--config`) must exist. Otherwise the first
    /// existing file from `config_paths` wins; with none, defaults apply.
    pub fn load(explicit: Option<&Path>) -> Result<LoadedConfig> {
        if let Some(path) = explicit {
            if !path.exists() {
                bail!("Config file {} does not exist", path.display());
            }
            return Ok(LoadedConfig {
                config: Self::load_from(path)?,
                source: Some(path.to_path_buf()),
            });
        }

        Self::load_first(&Self::config_paths())
    }

    /// Load the first existing file among `paths`
    pub fn load_first(paths: &[PathBuf]) -> Result<LoadedConfig> {
        for path in paths {
            if path.exists() {
                return Ok(LoadedConfig {
                    config: Self::load_from(path)?,
                    source: Some(path.clone()),
                });
            }
        }

        Ok(LoadedConfig {
            config: Self::default(),
            source: None,
        })
    }

    /// Load configuration from a single file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        toml::from_str(&content).with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Save configuration as pretty TOML, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory {}", parent.display()))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content).with_context(|| format!("Failed to write config to {}", path.display()))?;

        Ok(())
    }

    /// Get configuration file paths in order of precedence
    pub fn config_paths() -> Vec<PathBuf> {
        let mut paths = vec![];

        // 1. Explicit file from the environment
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            paths.push(PathBuf::from(path));
        }

        // 2. Local project config
        if let Ok(cwd) = std::env::current_dir() {
            paths.push(cwd.join(".browser-pool").join("config.toml"));
        }

        // 3. User config
        if let Ok(path) = Self::user_config_path() {
            paths.push(path);
        }

        paths
    }

    /// Location `config init` writes to
    pub fn user_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().context("Failed to get user config directory")?;
        Ok(config_dir.join("browser-pool").join("config.toml"))
    }

    /// Effective configuration after pool clamping
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.pool = self.pool.normalized();
        self
    }

    /// Adjustments `normalized` would make, for reporting
    pub fn adjustments(&self) -> Vec<String> {
        self.pool.adjustments()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            pool: PoolConfig::default(),
            session: SessionConfig::default(),
            shutdown: ShutdownConfig::default(),
        }
    }
}

/// Serde helper for Duration as whole seconds
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}
