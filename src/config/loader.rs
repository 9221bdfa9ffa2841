//! Configuration loading from disk.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::schema::ServerConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<ServerConfig, ConfigError> {
    let config: ServerConfig = toml::from_str(content)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ServerConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

/// Where the server reads its configuration from.
///
/// Background tasks (restriction refresh) re-read through this interface, so
/// it must be cheap enough to call on a timer.
pub trait ConfigSource: Send + Sync {
    fn load(&self) -> Result<ServerConfig, ConfigError>;

    /// Human-readable origin for log lines.
    fn describe(&self) -> String;
}

/// Reads a TOML file on every load. A missing file yields the defaults.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigSource for FileSource {
    fn load(&self) -> Result<ServerConfig, ConfigError> {
        if !self.path.exists() {
            return Ok(ServerConfig::default());
        }
        load_config(&self.path)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// A fixed in-memory configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    config: ServerConfig,
}

impl StaticSource {
    pub fn new(config: ServerConfig) -> Self {
        Self { config }
    }
}

impl ConfigSource for StaticSource {
    fn load(&self) -> Result<ServerConfig, ConfigError> {
        Ok(self.config.clone())
    }

    fn describe(&self) -> String {
        "static".to_string()
    }
}
