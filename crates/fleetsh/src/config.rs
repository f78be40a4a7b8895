//! Configuration loading and types

use std::path::{Path, PathBuf};
use std::time::Duration;

use fleetsh_exec::{ExecOptions, PtyConfig};
use serde::{Deserialize, Serialize};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV: &str = "FLEETSH_CONFIG";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Run settings
    #[serde(default)]
    pub run: RunConfig,
    /// Pseudo-terminal request
    #[serde(default)]
    pub pty: PtyConfig,
}

/// Run settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Seconds to wait after an interrupt before giving up on hosts
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,
    /// Per-host output cap in bytes (0 = unbounded)
    #[serde(default)]
    pub max_output_bytes: usize,
    /// Connection timeout in seconds (0 = none)
    #[serde(default)]
    pub connect_timeout_secs: u64,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: default_grace_period_secs(),
            max_output_bytes: 0,
            connect_timeout_secs: 0,
            log_level: default_log_level(),
        }
    }
}

fn default_grace_period_secs() -> u64 {
    5
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    /// Returns error if file cannot be read or parsed
    pub fn load(path: &Path) -> eyre::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load from default paths or use defaults
    ///
    /// # Errors
    /// Returns error if a config file exists but cannot be loaded
    pub fn load_default() -> eyre::Result<Self> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Self::load(Path::new(&path));
        }

        let mut paths = vec![PathBuf::from("fleetsh.toml")];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("fleetsh/fleetsh.toml"));
        }

        for path in paths {
            if path.exists() {
                return Self::load(&path);
            }
        }

        Ok(Config::default())
    }

    /// Grace period for the orchestration loop
    #[must_use]
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.run.grace_period_secs)
    }

    /// Session options for the executor
    #[must_use]
    pub fn exec_options(&self) -> ExecOptions {
        let mut options = ExecOptions::default().with_pty(self.pty.clone());
        if self.run.max_output_bytes > 0 {
            options = options.with_max_output_bytes(self.run.max_output_bytes);
        }
        if self.run.connect_timeout_secs > 0 {
            options = options.with_connect_timeout(Duration::from_secs(self.run.connect_timeout_secs));
        }
        options
    }
}
