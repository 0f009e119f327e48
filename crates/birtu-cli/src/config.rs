//! Birtu CLI Configuration Management
//!
//! Configuration is read from a TOML file (`~/.config/birtu/config.toml` by default),
//! then the `BIRTU_BASE_URL` environment variable, then command line flags, with later
//! sources taking priority. Every section falls back to its defaults when omitted.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use birtu_realtime::ChannelConfig;

/// Environment variable overriding `channel.base_url`
pub const BASE_URL_ENV: &str = "BIRTU_BASE_URL";

// ----------------------------------------------------------------------------
// CLI Application Configuration
// ----------------------------------------------------------------------------

/// Complete configuration for the Birtu CLI
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Real-time channel settings
    pub channel: ChannelConfig,

    /// Where the session is persisted
    pub session: SessionConfig,

    /// Terminal behaviour
    pub cli: CliConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Directory holding the session file; the platform data directory when unset
    pub data_dir: Option<PathBuf>,

    /// Session file name inside `data_dir`
    pub file_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Enable verbose logging output
    pub verbose: bool,

    /// How `listen` prints notifications
    pub notification_format: NotificationFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationFormat {
    /// `title: body`
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

// ----------------------------------------------------------------------------
// Default Implementations
// ----------------------------------------------------------------------------

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            file_name: "session.json".to_string(),
        }
    }
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            notification_format: NotificationFormat::Text,
        }
    }
}

// ----------------------------------------------------------------------------
// Configuration Loading Logic
// ----------------------------------------------------------------------------

impl AppConfig {
    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::FileSystem(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: AppConfig = toml::from_str(&contents).map_err(|e| {
            ConfigError::Loading(format!("Failed to load from {}: {}", path.display(), e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load the default config file if it exists, otherwise use defaults
    pub fn load() -> Result<Self, ConfigError> {
        match Self::default_config_path() {
            Some(path) if path.exists() => Self::load_from_file(path),
            _ => Ok(Self::default()),
        }
    }

    /// Load `path` when given, otherwise the default file, naming the source on failure
    pub fn resolve(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::load_from_file(path)
                .with_context(|| format!("Cannot use config file {}", path.display())),
            None => Self::load().context("Cannot use the default config file"),
        }
    }

    /// Get the default configuration file path
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("birtu").join("config.toml"))
    }

    /// Apply `BIRTU_BASE_URL` if set
    pub fn apply_env_overrides(&mut self) {
        self.apply_base_url_override(std::env::var(BASE_URL_ENV).ok());
    }

    fn apply_base_url_override(&mut self, base_url: Option<String>) {
        if let Some(base_url) = base_url.filter(|url| !url.trim().is_empty()) {
            self.channel.base_url = base_url;
        }
    }

    /// Save configuration to a specific file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ConfigError::FileSystem(format!("Failed to create config directory: {}", e))
            })?;
        }

        let toml_string = toml::to_string_pretty(self).map_err(|e| {
            ConfigError::Serialization(format!("Failed to serialize config: {}", e))
        })?;

        std::fs::write(path.as_ref(), toml_string)
            .map_err(|e| ConfigError::FileSystem(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Validate the configuration for consistency and correctness
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.channel
            .validate()
            .map_err(|e| ConfigError::Validation(e.to_string()))?;

        if self.session.file_name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "Session file name must not be empty".to_string(),
            ));
        }
        if Path::new(&self.session.file_name).components().count() != 1 {
            return Err(ConfigError::Validation(format!(
                "Session file name must be a bare file name, got {}",
                self.session.file_name
            )));
        }

        Ok(())
    }

    /// Directory the session file lives in
    pub fn session_dir(&self) -> PathBuf {
        self.session
            .data_dir
            .clone()
            .or_else(|| dirs::data_dir().map(|dir| dir.join("birtu")))
            .unwrap_or_else(|| PathBuf::from(".birtu"))
    }

    /// Full path of the session file
    pub fn session_path(&self) -> PathBuf {
        self.session_dir().join(&self.session.file_name)
    }

    /// Create example configuration file content
    pub fn example_config() -> String {
        let example_config = AppConfig {
            channel: ChannelConfig::local_development(),
            session: SessionConfig {
                data_dir: Some(PathBuf::from("/var/lib/birtu")),
                file_name: "session.json".to_string(),
            },
            cli: CliConfig {
                verbose: false,
                notification_format: NotificationFormat::Text,
            },
        };

        toml::to_string_pretty(&example_config)
            .unwrap_or_else(|_| "# Failed to generate example config".to_string())
    }
}

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Configuration-related errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration loading error: {0}")]
    Loading(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("File system error: {0}")]
    FileSystem(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
