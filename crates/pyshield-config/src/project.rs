//! Project configuration (pyshield.toml)
//!
//! Optional file at the project root. Every field is optional; anything left
//! out falls back to the built-in default.

use crate::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File name looked up at the project root
pub const CONFIG_FILE_NAME: &str = "pyshield.toml";

/// Project configuration from pyshield.toml
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build: Option<BuildSection>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclude: Option<ExcludeSection>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub compiler: Option<CompilerSection>,
}

/// `[build]`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct BuildSection {
    /// Output root (default: "build")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,

    /// Worker count, 0 for auto
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jobs: Option<usize>,

    /// Remove previous output first
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clean: Option<bool>,
}

/// `[exclude]`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct ExcludeSection {
    /// Directory names copied verbatim instead of compiled
    #[serde(default)]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dirs: Vec<String>,

    /// File paths or `*name.py` patterns copied verbatim
    #[serde(default)]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
}

/// `[compiler]`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct CompilerSection {
    /// Cython translator executable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cython: Option<PathBuf>,

    /// C compiler executable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cc: Option<PathBuf>,

    /// Python interpreter used to locate headers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub python: Option<PathBuf>,

    /// Extra C compiler flags
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cflags: Option<Vec<String>>,
}

impl ProjectConfig {
    /// Load project configuration from a file
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.to_path_buf())
            } else {
                ConfigError::IoError(e)
            }
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::TomlParseError {
            file: path.to_path_buf(),
            error: e,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the project configuration
    ///
    /// Exclusion patterns are checked later together with the CLI ones; here
    /// only the shape of each entry is checked.
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(exclude) = &self.exclude {
            check_entries("exclude.dirs", &exclude.dirs)?;
            check_entries("exclude.files", &exclude.files)?;
        }

        if let Some(compiler) = &self.compiler {
            for (field, value) in [
                ("compiler.cython", &compiler.cython),
                ("compiler.cc", &compiler.cc),
                ("compiler.python", &compiler.python),
            ] {
                if value.as_ref().is_some_and(|p| p.as_os_str().is_empty()) {
                    return Err(ConfigError::InvalidValue {
                        field: field.to_string(),
                        reason: "executable cannot be empty".to_string(),
                    });
                }
            }
        }

        if let Some(output) = self.build.as_ref().and_then(|b| b.output.as_ref()) {
            if output.as_os_str().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "build.output".to_string(),
                    reason: "path cannot be empty".to_string(),
                });
            }
        }

        Ok(())
    }

    pub fn exclude_dirs(&self) -> &[String] {
        self.exclude.as_ref().map(|e| e.dirs.as_slice()).unwrap_or_default()
    }

    pub fn exclude_files(&self) -> &[String] {
        self.exclude.as_ref().map(|e| e.files.as_slice()).unwrap_or_default()
    }

    pub(crate) fn build_mut(&mut self) -> &mut BuildSection {
        self.build.get_or_insert_with(BuildSection::default)
    }

    pub(crate) fn compiler_mut(&mut self) -> &mut CompilerSection {
        self.compiler.get_or_insert_with(CompilerSection::default)
    }
}

/// Entries are single tokens; a comma would split into several rules later
fn check_entries(field: &str, entries: &[String]) -> ConfigResult<()> {
    for entry in entries {
        let trimmed = entry.trim();
        if trimmed.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: field.to_string(),
                reason: "entries cannot be empty".to_string(),
            });
        }
        if trimmed.contains(',') {
            return Err(ConfigError::InvalidValue {
                field: field.to_string(),
                reason: format!("'{}' contains a comma; list entries separately", entry),
            });
        }
    }
    Ok(())
}
