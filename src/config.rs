//! Transcoder configuration
//!
//! Loaded from a TOML file passed on the command line; every field has a
//! default so an empty file (or no file at all) yields the stock settings.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Result, TranscodeError};

/// Default output bit rate in bit/s
pub const DEFAULT_BIT_RATE: usize = 96_000;

/// Encoder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Target bit rate in bit/s
    pub bit_rate: usize,

    /// Allow encoders flagged as experimental by FFmpeg
    pub experimental: bool,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            bit_rate: DEFAULT_BIT_RATE,
            experimental: true,
        }
    }
}

/// Output file handling
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Leave a partially written output file on disk when the run fails
    pub keep_partial_output: bool,
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Output format (pretty, json)
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Transcoder configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscodeConfig {
    pub encoder: EncoderConfig,
    pub output: OutputConfig,
    pub logging: LoggingConfig,
}

impl TranscodeConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config: TranscodeConfig = toml::from_str(&content)
            .map_err(|e| TranscodeError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: TranscodeConfig =
            toml::from_str(content).map_err(|e| TranscodeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| TranscodeError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.encoder.bit_rate == 0 {
            return Err(TranscodeError::Config(
                "encoder.bit_rate must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
