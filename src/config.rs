//! Configuration for the connection pool demo binary.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values, mirroring the
//! precedence rules of a typical cache-server launcher.

use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;

/// Command-line arguments for the pool demo.
#[derive(Parser, Debug)]
#[command(name = "pool-demo")]
#[command(author = "cache-pool authors")]
#[command(version = "0.1.0")]
#[command(about = "Exercise a cache connection pool against a fleet of servers", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Comma-separated list of server addresses (host:port), overrides the
    /// config file's `[pool] servers` list.
    #[arg(short = 's', long, value_delimiter = ',')]
    pub servers: Vec<String>,

    /// Per-node read/write buffer size in bytes.
    #[arg(short = 'b', long)]
    pub buffer_size: Option<usize>,

    /// Coalesce consecutive single-key GETs into multi-key GETs.
    #[arg(long)]
    pub get_optimization: Option<bool>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure.
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub tuning: TuningConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Pool-related configuration.
#[derive(Debug, Deserialize)]
pub struct PoolConfig {
    /// Addresses of the cache server fleet, in node-index order.
    #[serde(default)]
    pub servers: Vec<String>,
    /// Per-node buffer size.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Whether to coalesce consecutive single-key GETs.
    #[serde(default = "default_get_optimization")]
    pub get_optimization: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            buffer_size: default_buffer_size(),
            get_optimization: default_get_optimization(),
        }
    }
}

/// Overridable tuning constants from §6 of the design.
#[derive(Debug, Deserialize)]
pub struct TuningConfig {
    /// Empty-select tolerance before a defensive sweep of all registrations.
    #[serde(default = "default_excessive_empty")]
    pub excessive_empty: u32,
    /// Consecutive protocol errors on one connection before it is reconnected.
    #[serde(default = "default_excessive_errors")]
    pub excessive_errors: u32,
    /// Backoff ceiling in milliseconds.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            excessive_empty: default_excessive_empty(),
            excessive_errors: default_excessive_errors(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_buffer_size() -> usize {
    16 * 1024
}

fn default_get_optimization() -> bool {
    true
}

fn default_excessive_empty() -> u32 {
    100
}

fn default_excessive_errors() -> u32 {
    1
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub servers: Vec<String>,
    pub buffer_size: usize,
    pub get_optimization: bool,
    pub excessive_empty: u32,
    pub excessive_errors: u32,
    pub max_backoff_ms: u64,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Ok(Config {
            servers: if cli.servers.is_empty() {
                toml_config.pool.servers
            } else {
                cli.servers
            },
            buffer_size: cli.buffer_size.unwrap_or(toml_config.pool.buffer_size),
            get_optimization: cli
                .get_optimization
                .unwrap_or(toml_config.pool.get_optimization),
            excessive_empty: toml_config.tuning.excessive_empty,
            excessive_errors: toml_config.tuning.excessive_errors,
            max_backoff_ms: toml_config.tuning.max_backoff_ms,
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        })
    }
}

/// Configuration loading errors.
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
