//! CLI command implementations

pub mod build;
pub mod plan;

use anyhow::{Context, Result};
use pyshield_build::{Builder, RuleSet, RuleValidator};
use pyshield_build::rules::split_list;
use pyshield_config::{Config, ConfigLoader};
use std::path::Path;

/// Open a project and load its configuration
pub fn open_project(project: &Path) -> Result<(Builder, Config)> {
    let builder = Builder::new(project)?;
    let config = ConfigLoader::new()
        .load(builder.root_dir())
        .context("Failed to load project configuration")?;
    Ok((builder, config))
}

/// Validate exclusions from the config file and the command line together
///
/// File entries come first so every rejected pattern is reported in one pass,
/// wherever it was written.
pub fn exclusion_rules(config: &Config, dirs: &[String], files: &[String]) -> Result<RuleSet> {
    let dir_tokens = config
        .exclude_dirs()
        .iter()
        .cloned()
        .chain(dirs.iter().flat_map(|d| split_list(d)));
    let file_tokens = config
        .exclude_files()
        .iter()
        .cloned()
        .chain(files.iter().flat_map(|f| split_list(f)));

    Ok(RuleValidator::validate_tokens(dir_tokens, file_tokens)?)
}
