//! Configuration management for qrshare
//!
//! Handles loading and saving configuration from ~/.config/qrshare/config.toml

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::server::DEFAULT_PORT;

/// Configuration file name
const CONFIG_FILE: &str = "config.toml";

/// Application name for config directory
const APP_NAME: &str = "qrshare";

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    #[error("Could not determine config directory")]
    NoConfigDir,
}

/// Result type for config operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    /// First port the file server tries to bind
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_port: Option<u16>,

    /// Host to put in share URLs instead of the discovered LAN address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// File to write debug logs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<String>,
}

impl Config {
    /// Create a new empty configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the config file path
    ///
    /// Returns ~/.config/qrshare/config.toml on Linux
    pub fn config_path() -> ConfigResult<PathBuf> {
        Ok(Self::config_dir()?.join(CONFIG_FILE))
    }

    /// Get the config directory path
    pub fn config_dir() -> ConfigResult<PathBuf> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(config_dir.join(APP_NAME))
    }

    /// Load configuration from the default location
    ///
    /// Returns default config if file doesn't exist
    pub fn load() -> ConfigResult<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from `path`, or defaults if it doesn't exist
    pub fn load_from(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to the default location
    pub fn save(&self) -> ConfigResult<()> {
        self.save_to(&Self::config_path()?)
    }

    /// Save configuration to `path`, creating parent directories as needed
    pub fn save_to(&self, path: &Path) -> ConfigResult<()> {
        if let Some(dir) = path.parent() {
            if !dir.exists() {
                fs::create_dir_all(dir)?;
            }
        }

        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Check if any configuration is set
    pub fn is_empty(&self) -> bool {
        self.default_port.is_none() && self.host.is_none() && self.log_file.is_none()
    }

    /// Set the default port
    pub fn set_default_port(&mut self, port: Option<u16>) {
        self.default_port = port;
    }

    /// Set the advertised host
    pub fn set_host(&mut self, host: Option<String>) {
        self.host = host;
    }

    /// Set the log file
    pub fn set_log_file(&mut self, log_file: Option<String>) {
        self.log_file = log_file;
    }

    /// Get effective port: CLI argument, then config, then the default
    pub fn effective_port(&self, cli_port: Option<u16>) -> u16 {
        cli_port.or(self.default_port).unwrap_or(DEFAULT_PORT)
    }

    /// Get effective host override: CLI argument, then config
    pub fn effective_host(&self, cli_host: Option<&str>) -> Option<String> {
        cli_host.map(str::to_string).or_else(|| self.host.clone())
    }
}

/// Format the configuration for display
pub fn format_config(config: &Config) -> String {
    let mut lines = Vec::new();

    lines.push("Current configuration:".to_string());
    lines.push(String::new());

    if let Some(port) = config.default_port {
        lines.push(format!("  default_port = {}", port));
    } else {
        lines.push(format!("  default_port = (not set, using {})", DEFAULT_PORT));
    }

    if let Some(ref host) = config.host {
        lines.push(format!("  host = \"{}\"", host));
    } else {
        lines.push("  host = (not set, auto-detected)".to_string());
    }

    if let Some(ref log_file) = config.log_file {
        lines.push(format!("  log_file = \"{}\"", log_file));
    } else {
        lines.push("  log_file = (not set)".to_string());
    }

    lines.join("\n")
}
