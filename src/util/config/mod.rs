//! Compiler configuration
//!
//! Settings live in a TOML file (conventionally `fieldview.toml`); every key is
//! optional and falls back to its default.
//!
//! ```toml
//! temp_prefix = "__tmp"
//! size_param_suffix = "_size_"
//! parallel = true
//! validate = true
//! log_level = "info"
//! ```
//!
//! # Usage
//!
//! ```rust
//! use fieldview::util::config::CompileConfig;
//!
//! let config = CompileConfig::from_toml_str("parallel = false").unwrap();
//! assert!(!config.parallel);
//! ```

use crate::util::logger::LogLevel;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;


/// Compiler configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileConfig {
    /// Prefix of fresh temporaries introduced by inlining
    #[serde(default = "default_temp_prefix")]
    pub temp_prefix: String,
    /// Infix of implicit domain-size parameters (`<field><suffix><axis>`)
    #[serde(default = "default_size_param_suffix")]
    pub size_param_suffix: String,
    /// Compile independent units of a batch on the rayon pool
    #[serde(default = "default_true")]
    pub parallel: bool,
    /// Run IR validation after lowering
    #[serde(default = "default_true")]
    pub validate: bool,
    /// Log level used by [`crate::util::logger`]
    #[serde(default)]
    pub log_level: LogLevel,
}

fn default_temp_prefix() -> String {
    "__tmp".to_string()
}

fn default_size_param_suffix() -> String {
    "_size_".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for CompileConfig {
    fn default() -> Self {
        Self {
            temp_prefix: default_temp_prefix(),
            size_param_suffix: default_size_param_suffix(),
            parallel: true,
            validate: true,
            log_level: LogLevel::default(),
        }
    }
}

impl CompileConfig {
    /// Parse a configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: CompileConfig = toml::from_str(content)?;
        config.check()?;
        Ok(config)
    }

    fn check(&self) -> Result<(), ConfigError> {
        if self.temp_prefix.is_empty() {
            return Err(ConfigError::Invalid("temp_prefix must not be empty".to_string()));
        }
        if self.size_param_suffix.is_empty() {
            return Err(ConfigError::Invalid(
                "size_param_suffix must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Load configuration from `path`
/// Returns default config if the file doesn't exist
pub fn load_config(path: &Path) -> Result<CompileConfig, ConfigError> {
    if !path.exists() {
        return Ok(CompileConfig::default());
    }
    let content = fs::read_to_string(path)?;
    CompileConfig::from_toml_str(&content)
}

/// Save configuration to `path`, creating parent directories as needed
pub fn save_config(
    config: &CompileConfig,
    path: &Path,
) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() && !dir.exists() {
            fs::create_dir_all(dir)?;
        }
    }
    let content = toml::to_string_pretty(config)?;
    fs::write(path, content)?;
    Ok(())
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Config parse error: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Config serialize error: {0}")]
    SerializeError(#[from] toml::ser::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}
