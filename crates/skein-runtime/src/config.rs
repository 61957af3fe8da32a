//! Runtime configuration (skein.toml)
//!
//! ```toml
//! [scheduler]
//! clock = "virtual"      # or "realtime"
//! max_turns = 100000
//!
//! [logging]
//! filter = "skein_runtime=debug"
//!
//! [sources.user]
//! url = "/api/user"
//! method = "GET"         # GET, POST or JSONP
//!
//! [templates]
//! greeting = "<p>hello</p>"
//! ```
//!
//! Every section is optional.

use crate::batch::SourceConfig;
use serde::{Deserialize, Serialize};
use skein_engine::{ClockMode, SchedulerConfig, DEFAULT_MAX_TURNS};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the file
    #[error("Failed to read config {path}: {source}")]
    Io {
        /// File that could not be read
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Parsed but semantically invalid
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Top-level runtime configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Event loop settings
    pub scheduler: SchedulerSection,

    /// Log filter
    pub logging: LoggingSection,

    /// Named data sources for batch requests
    pub sources: BTreeMap<String, SourceConfig>,

    /// Inline templates seeded into the template cache
    pub templates: BTreeMap<String, String>,
}

/// `[scheduler]`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerSection {
    /// Clock mode
    pub clock: ClockSetting,

    /// Turn budget of a single `run_until_idle`
    pub max_turns: usize,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            clock: ClockSetting::Virtual,
            max_turns: DEFAULT_MAX_TURNS,
        }
    }
}

/// Clock mode as written in the config file
#[derive(Debug, Copy, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ClockSetting {
    #[default]
    Virtual,
    Realtime,
}

impl From<ClockSetting> for ClockMode {
    fn from(setting: ClockSetting) -> Self {
        match setting {
            ClockSetting::Virtual => ClockMode::Virtual,
            ClockSetting::Realtime => ClockMode::Realtime,
        }
    }
}

/// `[logging]`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingSection {
    /// `tracing` filter directive, used when `RUST_LOG` is unset
    pub filter: Option<String>,
}

impl RuntimeConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: RuntimeConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a configuration file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!(path = %path.display(), sources = config.sources.len(), "config loaded");
        Ok(config)
    }

    /// Scheduler settings derived from `[scheduler]`
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            clock: self.scheduler.clock.into(),
            max_turns: self.scheduler.max_turns,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduler.max_turns == 0 {
            return Err(ConfigError::Invalid(
                "scheduler.max_turns must be greater than zero".to_string(),
            ));
        }
        if let Some((name, _)) = self.sources.iter().find(|(_, source)| source.url.is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "source '{name}' has an empty url"
            )));
        }
        Ok(())
    }
}
