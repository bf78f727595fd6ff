//! Application settings

use crate::core::results::DEFAULT_RESULTS_FILE;
use crate::core::session::SessionConfig;
use crate::core::transport::DEFAULT_BAUD_RATE;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// File could not be read or written
    #[error("Config I/O error on {path}: {source}")]
    Io {
        /// Config file
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// File is not valid TOML for this schema
    #[error("Config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// Settings could not be serialized
    #[error("Config serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A value is out of bounds
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Serial link settings
    pub serial: SerialSettings,
    /// Sweep session settings
    pub session: SessionConfig,
    /// Result recording
    pub results: ResultsConfig,
    /// Diagnostic logging
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load from `path`, or from the default location when `None`.
    ///
    /// A missing default file yields defaults; a missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => match super::default_config_path() {
                Some(p) => (p, false),
                None => return Ok(Self::default()),
            },
        };

        if !explicit && !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Save to `path`
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Reject values the sweep cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.serial.baud_rate == 0 {
            return Err(ConfigError::Invalid("serial.baud_rate must be positive".into()));
        }
        if self.session.repeats_per_combo == 0 {
            return Err(ConfigError::Invalid(
                "session.repeats_per_combo must be at least 1".into(),
            ));
        }
        if self.session.max_consecutive_faults == Some(0) {
            return Err(ConfigError::Invalid(
                "session.max_consecutive_faults must be at least 1 when set".into(),
            ));
        }
        Ok(())
    }
}

/// Serial link settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    /// Baud rate of the glitcher UART
    pub baud_rate: u32,
    /// Read timeout for drains and result checks (ms)
    pub read_timeout_ms: u64,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout_ms: 1,
        }
    }
}

impl SerialSettings {
    /// Read timeout as a duration
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

/// Result recording settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultsConfig {
    /// JSON-lines file results are appended to
    pub path: PathBuf,
}

impl Default for ResultsConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_RESULTS_FILE),
        }
    }
}

/// Diagnostic logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is unset
    pub level: String,
    /// Write a daily rolling log file here as well
    pub file_logging: bool,
    /// Log directory; the data directory's `logs/` when unset
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_logging: false,
            directory: None,
        }
    }
}

impl LoggingConfig {
    /// Directory for log files, if one can be determined
    pub fn resolved_directory(&self) -> Option<PathBuf> {
        self.directory.clone().or_else(super::log_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.serial.baud_rate, 28800);
        assert_eq!(config.session.repeats_per_combo, 3);
        assert_eq!(config.session.progress_interval, 10);
        assert_eq!(config.results.path, PathBuf::from("params.log"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[session]\ncrowbar = true\nrepeats_per_combo = 5\n\n[results]\npath = \"hits.jsonl\"\n",
        )
        .unwrap();

        let config = AppConfig::load(Some(&path)).unwrap();
        assert!(config.session.crowbar);
        assert!(config.session.resets_power());
        assert_eq!(config.session.repeats_per_combo, 5);
        assert_eq!(config.session.progress_interval, 10);
        assert_eq!(config.serial.baud_rate, 28800);
        assert_eq!(config.results.path, PathBuf::from("hits.jsonl"));
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = AppConfig::default();
        config.session = SessionConfig::new().randomize(true).seed(Some(9));
        config.logging.file_logging = true;
        config.save(&path).unwrap();

        assert_eq!(AppConfig::load(Some(&path)).unwrap(), config);
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = AppConfig::load(Some(&dir.path().join("nope.toml")));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_rejects_zero_repeats() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[session]\nrepeats_per_combo = 0\n").unwrap();

        assert!(matches!(
            AppConfig::load(Some(&path)),
            Err(ConfigError::Invalid(_))
        ));
    }
}
