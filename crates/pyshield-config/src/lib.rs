//! pyshield configuration
//!
//! Settings are merged in the following order (later overrides earlier):
//! 1. Built-in defaults
//! 2. Project config (`<project>/pyshield.toml`)
//! 3. Environment variables (`PYSHIELD_*`)
//! 4. CLI flags (applied by the caller)
//!
//! # Example
//!
//! ```no_run
//! use pyshield_config::ConfigLoader;
//! use std::path::Path;
//!
//! let config = ConfigLoader::new().load(Path::new("my_project")).unwrap();
//! println!("{:?}", config.output_dir());
//! ```

pub mod loader;
pub mod project;

use std::path::PathBuf;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid TOML syntax in {file}: {error}")]
    TomlParseError {
        file: PathBuf,
        error: toml::de::Error,
    },

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

// Re-export main types
pub use loader::{Config, ConfigLoader, ENV_CC, ENV_CYTHON, ENV_JOBS, ENV_OUTPUT, ENV_PYTHON};
pub use project::{BuildSection, CompilerSection, ExcludeSection, ProjectConfig, CONFIG_FILE_NAME};
