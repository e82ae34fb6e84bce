//! Runtime configuration for the `calltree` CLI
//!
//! Loaded from an optional TOML file; every field has a default.
//!
//! # Example
//! ```
//! use calltree::config::CalltreeConfig;
//!
//! let config = CalltreeConfig::default();
//! assert_eq!(config.bcc_command, "trace-bpfcc");
//! assert_eq!(config.trace_flags, vec!["-UK".to_string()]);
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config format: {0}")]
    InvalidFormat(#[from] toml::de::Error),

    #[error("bcc command can not be empty")]
    EmptyCommand,

    #[error("Red threshold ({red}) can not be lower than yellow ({yellow})")]
    InvalidColors { yellow: u64, red: u64 },
}

/// Fixed color thresholds overriding the ones derived from call counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorThresholds {
    pub yellow: u64,
    pub red: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CalltreeConfig {
    /// bcc `trace` executable (`trace-bpfcc` on Debian/Ubuntu, `trace` elsewhere)
    pub bcc_command: String,

    /// Flags passed before the probe arguments; `-UK` prints user and kernel stacks
    pub trace_flags: Vec<String>,

    pub colors: Option<ColorThresholds>,
}

impl Default for CalltreeConfig {
    fn default() -> Self {
        Self {
            bcc_command: "trace-bpfcc".to_string(),
            trace_flags: vec!["-UK".to_string()],
            colors: None,
        }
    }
}

impl CalltreeConfig {
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_toml(&content)?;
        tracing::debug!(path = %path.display(), ?config, "loaded config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bcc_command.trim().is_empty() {
            return Err(ConfigError::EmptyCommand);
        }
        if let Some(ColorThresholds { yellow, red }) = self.colors {
            if red < yellow {
                return Err(ConfigError::InvalidColors { yellow, red });
            }
        }
        Ok(())
    }
}
