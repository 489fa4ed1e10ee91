//! Configuration management for csvdump
//!
//! Configuration is read from a TOML file (`~/.csvdump/config.toml` unless
//! `--config` names another one). Every field has a default, so a missing
//! default file is not an error and a partial file is fine.
//!
//! Precedence (highest to lowest):
//! 1. Command-line arguments
//! 2. Environment variables (connection string only)
//! 3. Configuration file
//! 4. Default values
//!
//! # Example
//!
//! ```toml
//! [database]
//! url = "sqlite://data/app.db"
//!
//! [output]
//! separator = ","
//! date_format = "%Y-%m-%d %H:%M:%S"
//! encoding = "windows-1252"
//! compress = "gz"
//!
//! [export]
//! max_concurrent_sheets = 4
//!
//! [logging]
//! level = "info"
//! ```

use encoding_rs::Encoding;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{ConfigError, Result};
use crate::export::{Compression, CsvOptions, DateLayout, ExportOptions};

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Data source
    #[serde(default)]
    pub database: DatabaseConfig,

    /// CSV output and value rendering
    #[serde(default)]
    pub output: OutputConfig,

    /// Multi-sheet export
    #[serde(default)]
    pub export: ExportConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Data source configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Connection string used when neither `--connect` nor the environment
    /// provides one
    #[serde(default)]
    pub url: Option<String>,
}

/// Output configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Field separator
    #[serde(default = "default_separator")]
    pub separator: String,

    /// Print a header line
    #[serde(default = "default_header")]
    pub header: bool,

    /// Dump raw values instead of CSV
    #[serde(default)]
    pub raw: bool,

    /// Date layout in strftime notation
    #[serde(default = "default_date_format")]
    pub date_format: String,

    /// Show a progress spinner on stderr
    #[serde(default)]
    pub progress: bool,

    /// Character encoding of CSV output (WHATWG label)
    #[serde(default = "default_encoding")]
    pub encoding: String,

    /// Output compression: gz or zstd, empty for none
    #[serde(default)]
    pub compress: String,
}

/// Multi-sheet export configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Maximum number of sheets streamed at once (unbounded when unset)
    #[serde(default)]
    pub max_concurrent_sheets: Option<usize>,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: LogLevel,

    /// Enable timestamps in logs
    #[serde(default)]
    pub timestamps: bool,
}

/// Log level options
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

// Default value functions
fn default_separator() -> String {
    ";".to_string()
}

fn default_header() -> bool {
    true
}

fn default_date_format() -> String {
    DateLayout::DEFAULT.to_string()
}

fn default_encoding() -> String {
    "utf-8".to_string()
}

fn default_log_level() -> LogLevel {
    LogLevel::Warn
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            separator: default_separator(),
            header: default_header(),
            raw: false,
            date_format: default_date_format(),
            progress: false,
            encoding: default_encoding(),
            compress: String::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            timestamps: false,
        }
    }
}

impl Config {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse configuration from TOML text
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| ConfigError::InvalidFormat(e.to_string()).into())
    }

    /// Load configuration from a file
    ///
    /// # Arguments
    /// * `path` - Path to the configuration file (TOML format)
    ///
    /// # Returns
    /// * `Result<Config>` - Loaded configuration or error
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()).into());
        }
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Load the configuration for a run.
    ///
    /// An explicit path must exist. Without one, the default path is used
    /// when present and built-in defaults otherwise.
    ///
    /// # Arguments
    /// * `path` - File named on the command line, if any
    ///
    /// # Returns
    /// * `Result<Config>` - Validated configuration
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default = Self::default_path();
                if default.exists() {
                    Self::from_file(default)?
                } else {
                    Self::default()
                }
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path
    ///
    /// # Returns
    /// * `PathBuf` - Path to default configuration file
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".csvdump")
            .join("config.toml")
    }

    /// Validate the configuration
    ///
    /// # Returns
    /// * `Result<()>` - Ok if valid, error otherwise
    pub fn validate(&self) -> Result<()> {
        DateLayout::new(&self.output.date_format)?;
        self.encoding()?;
        self.compression()?;
        if self.export.max_concurrent_sheets == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "export.max_concurrent_sheets".to_string(),
                value: "0".to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Output encoding. Labels whose encoder would write UTF-8 anyway
    /// (UTF-16 and `replacement`) are rejected.
    pub fn encoding(&self) -> Result<&'static Encoding> {
        Encoding::for_label(self.output.encoding.trim().as_bytes())
            .filter(|encoding| encoding.output_encoding() == *encoding)
            .ok_or_else(|| {
                ConfigError::InvalidValue {
                    field: "output.encoding".to_string(),
                    value: self.output.encoding.clone(),
                }
                .into()
            })
    }

    /// Output compression
    pub fn compression(&self) -> Result<Compression> {
        Ok(self.output.compress.parse()?)
    }

    /// Build the dump settings described by this configuration
    pub fn export_options(&self) -> Result<ExportOptions> {
        Ok(ExportOptions {
            csv: CsvOptions {
                separator: self.output.separator.clone(),
                header: self.output.header,
                raw: self.output.raw,
                encoding: self.encoding()?,
            },
            layout: Arc::new(DateLayout::new(&self.output.date_format)?),
            max_concurrent_sheets: self.export.max_concurrent_sheets,
            progress: self.output.progress,
        })
    }
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DumpError;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.output.separator, ";");
        assert!(config.output.header);
        assert!(!config.output.raw);
        assert_eq!(config.output.date_format, "%Y-%m-%d");
        assert_eq!(config.export.max_concurrent_sheets, None);
        assert_eq!(config.logging.level, LogLevel::Warn);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            [output]
            separator = ","

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();

        assert_eq!(config.output.separator, ",");
        assert!(config.output.header);
        assert_eq!(config.logging.level.to_tracing_level(), tracing::Level::DEBUG);
        assert_eq!(config.database.url, None);
    }

    #[test]
    fn test_invalid_toml() {
        let err = Config::from_toml("[output\nseparator = 1").unwrap_err();
        assert!(matches!(err, DumpError::Config(ConfigError::InvalidFormat(_))));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = Config::default();
        config.export.max_concurrent_sheets = Some(0);
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.output.date_format = "%Y-%Q".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_encoding_and_compression() {
        let config = Config::from_toml(
            r#"
            [output]
            encoding = "latin1"
            compress = "zstd"
            "#,
        )
        .unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.encoding().unwrap(), encoding_rs::WINDOWS_1252);
        assert_eq!(config.compression().unwrap(), Compression::Zstd);
        assert_eq!(config.export_options().unwrap().csv.encoding, encoding_rs::WINDOWS_1252);

        let defaults = Config::default();
        assert_eq!(defaults.encoding().unwrap(), encoding_rs::UTF_8);
        assert_eq!(defaults.compression().unwrap(), Compression::None);
    }

    #[test]
    fn test_validation_rejects_bad_output_settings() {
        for (encoding, compress) in [("klingon", ""), ("utf-16le", ""), ("utf-8", "rar")] {
            let mut config = Config::default();
            config.output.encoding = encoding.to_string();
            config.output.compress = compress.to_string();
            let err = config.validate().unwrap_err();
            assert!(
                matches!(err, DumpError::Config(ConfigError::InvalidValue { .. })),
                "{encoding} {compress}"
            );
        }

        let mut config = Config::default();
        config.output.date_format = "%Y-%m-%d %z".to_string();
        assert!(matches!(
            config.validate().unwrap_err(),
            DumpError::Config(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[database]\nurl = \"sqlite::memory:\"\n[export]\nmax_concurrent_sheets = 2").unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.database.url.as_deref(), Some("sqlite::memory:"));
        assert_eq!(config.export.max_concurrent_sheets, Some(2));

        let options = config.export_options().unwrap();
        assert_eq!(options.max_concurrent_sheets, Some(2));
        assert_eq!(options.csv.separator, ";");
    }

    #[test]
    fn test_explicit_missing_file() {
        let err = Config::load(Some(Path::new("/nonexistent/csvdump.toml"))).unwrap_err();
        assert!(matches!(err, DumpError::Config(ConfigError::FileNotFound(_))));
    }
}
