//! Broker configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::decoder::DEFAULT_MAX_OUTPUT_BYTES;
use crate::staging::{validate_file_name, DEFAULT_EXECUTABLE_NAME};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Root for per-invocation staging directories (OS temp dir if unset)
    #[serde(default)]
    pub staging_dir: Option<PathBuf>,

    /// Deadline for one helper invocation in seconds (0 = no deadline)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Maximum helper stdout buffered while looking for the record
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,

    /// File name for the staged helper when no display name is given
    #[serde(default = "default_executable_name")]
    pub executable_name: String,
}

// Defaults
fn default_timeout_secs() -> u64 { 30 }
fn default_max_output_bytes() -> usize { DEFAULT_MAX_OUTPUT_BYTES }
fn default_executable_name() -> String { DEFAULT_EXECUTABLE_NAME.to_string() }

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            staging_dir: None,
            timeout_secs: default_timeout_secs(),
            max_output_bytes: default_max_output_bytes(),
            executable_name: default_executable_name(),
        }
    }
}

impl BrokerConfig {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }

    /// Load from a TOML file, falling back to defaults if it does not exist
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            info!("Config file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_file_name(&self.executable_name).map_err(ConfigError::Invalid)?;
        if self.max_output_bytes == 0 {
            return Err(ConfigError::Invalid(
                "max_output_bytes must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}
