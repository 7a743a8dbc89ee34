//! Configuration loader
//!
//! Loads `pyshield.toml` from a project root and applies environment
//! variable overrides on top.

use crate::project::{ProjectConfig, CONFIG_FILE_NAME};
use crate::{ConfigError, ConfigResult};
use std::env;
use std::path::{Path, PathBuf};

pub const ENV_OUTPUT: &str = "PYSHIELD_OUTPUT";
pub const ENV_JOBS: &str = "PYSHIELD_JOBS";
pub const ENV_CYTHON: &str = "PYSHIELD_CYTHON";
pub const ENV_CC: &str = "PYSHIELD_CC";
pub const ENV_PYTHON: &str = "PYSHIELD_PYTHON";

/// Configuration loader
///
/// Precedence, lowest first:
/// 1. Built-in defaults
/// 2. Project config (`<project>/pyshield.toml`)
/// 3. Environment variables (`PYSHIELD_*`)
/// 4. CLI flags - handled by caller
#[derive(Debug, Default)]
pub struct ConfigLoader {
    skip_env: bool,
}

/// Merged configuration result
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub project: ProjectConfig,

    /// The file the project section was read from, if any
    pub config_file: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self { skip_env: false }
    }

    /// Ignore `PYSHIELD_*` variables
    pub fn without_env(mut self) -> Self {
        self.skip_env = true;
        self
    }

    /// Load the configuration for the project rooted at `project_dir`
    ///
    /// A missing `pyshield.toml` is not an error.
    pub fn load(&self, project_dir: &Path) -> ConfigResult<Config> {
        let config_path = project_dir.join(CONFIG_FILE_NAME);
        if config_path.is_file() {
            self.load_from_file(&config_path)
        } else {
            self.finish(ProjectConfig::default(), None)
        }
    }

    /// Load configuration from a specific file
    ///
    /// A relative `build.output` is resolved against the file's directory.
    pub fn load_from_file(&self, config_path: &Path) -> ConfigResult<Config> {
        let mut project = ProjectConfig::load_from_file(config_path)?;

        if let (Some(base), Some(build)) = (config_path.parent(), project.build.as_mut()) {
            if let Some(output) = build.output.as_mut() {
                if output.is_relative() {
                    *output = base.join(&*output);
                }
            }
        }

        self.finish(project, Some(config_path.to_path_buf()))
    }

    fn finish(&self, project: ProjectConfig, config_file: Option<PathBuf>) -> ConfigResult<Config> {
        let project = if self.skip_env {
            project
        } else {
            apply_env_overrides(project)?
        };
        Ok(Config {
            project,
            config_file,
        })
    }
}

/// Apply `PYSHIELD_*` environment overrides; empty values are ignored
fn apply_env_overrides(mut config: ProjectConfig) -> ConfigResult<ProjectConfig> {
    if let Some(output) = env_value(ENV_OUTPUT) {
        config.build_mut().output = Some(PathBuf::from(output));
    }

    if let Some(jobs) = env_value(ENV_JOBS) {
        let parsed = jobs.trim().parse::<usize>().map_err(|_| ConfigError::InvalidValue {
            field: ENV_JOBS.to_string(),
            reason: format!("expected a non-negative integer, got '{}'", jobs),
        })?;
        config.build_mut().jobs = Some(parsed);
    }

    if let Some(cython) = env_value(ENV_CYTHON) {
        config.compiler_mut().cython = Some(PathBuf::from(cython));
    }
    if let Some(cc) = env_value(ENV_CC) {
        config.compiler_mut().cc = Some(PathBuf::from(cc));
    }
    if let Some(python) = env_value(ENV_PYTHON) {
        config.compiler_mut().python = Some(PathBuf::from(python));
    }

    Ok(config)
}

fn env_value(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    /// Output root, if configured
    pub fn output_dir(&self) -> Option<&Path> {
        self.project.build.as_ref()?.output.as_deref()
    }

    /// Worker count, if configured
    pub fn jobs(&self) -> Option<usize> {
        self.project.build.as_ref()?.jobs
    }

    pub fn clean(&self) -> bool {
        self.project
            .build
            .as_ref()
            .and_then(|b| b.clean)
            .unwrap_or(false)
    }

    pub fn exclude_dirs(&self) -> &[String] {
        self.project.exclude_dirs()
    }

    pub fn exclude_files(&self) -> &[String] {
        self.project.exclude_files()
    }

    pub fn cython(&self) -> Option<&Path> {
        self.project.compiler.as_ref()?.cython.as_deref()
    }

    pub fn cc(&self) -> Option<&Path> {
        self.project.compiler.as_ref()?.cc.as_deref()
    }

    pub fn python(&self) -> Option<&Path> {
        self.project.compiler.as_ref()?.python.as_deref()
    }

    pub fn cflags(&self) -> Option<&[String]> {
        self.project.compiler.as_ref()?.cflags.as_deref()
    }

    /// Whether a `pyshield.toml` was found
    pub fn has_config_file(&self) -> bool {
        self.config_file.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = ConfigLoader::new().without_env().load(dir.path()).unwrap();
        assert!(!config.has_config_file());
        assert_eq!(config.output_dir(), None);
        assert_eq!(config.jobs(), None);
        assert!(!config.clean());
    }

    #[test]
    fn test_relative_output_resolved_against_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(CONFIG_FILE_NAME), "[build]\noutput = \"../dist\"\n").unwrap();
        let config = ConfigLoader::new().without_env().load(dir.path()).unwrap();
        assert_eq!(config.output_dir(), Some(dir.path().join("../dist").as_path()));
    }

    #[test]
    fn test_absolute_output_kept() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("out");
        fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            format!("[build]\noutput = {:?}\n", out.to_string_lossy()),
        )
        .unwrap();
        let config = ConfigLoader::new().without_env().load(dir.path()).unwrap();
        assert_eq!(config.output_dir(), Some(out.as_path()));
    }
}
