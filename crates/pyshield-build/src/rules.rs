//! Exclusion rules and their validation
//!
//! User input arrives as two comma-separated lists: directory names to keep
//! uncompiled, and `.py` files to keep uncompiled. Directory names are taken
//! verbatim. File tokens are either an exact project-relative path or a
//! `*name.py` wildcard that matches `name.py` at any depth; every other
//! wildcard shape is rejected before the project is scanned.

use crate::error::{BuildError, BuildResult, PatternError};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

/// Suffix of files that become compile units
pub const SOURCE_SUFFIX: &str = "py";

/// File whose presence turns a directory into a package
pub const PACKAGE_MARKER: &str = "__init__.py";

/// Package name used for the project root itself
pub const ROOT_PACKAGE: &str = ".";

/// Build-script names that are never compiled
pub const BANNED_FILES: &[&str] = &["setup.py"];

/// Build configuration file, never part of the output
pub const CONFIG_FILE: &str = "pyshield.toml";

/// Filename prefixes marking private or hidden modules
pub const HIDDEN_PREFIXES: &[char] = &['.', '_'];

/// Directory names excluded from every build
pub const DEFAULT_EXCLUDED_DIRS: &[&str] =
    &[".idea", "venv", ".venv", ".cache", "build", "__pycache__"];

/// A validated file-exclusion rule
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "kebab-case")]
pub enum Rule {
    /// Project-relative path, `/`-separated
    ExactPath(String),
    /// File name matched at any depth (the pattern minus its leading `*`)
    GlobSuffix(String),
}

impl Rule {
    /// Whether this rule selects the given file
    pub fn matches(&self, relative: &str, file_name: &str) -> bool {
        match self {
            Self::ExactPath(path) => path == relative,
            Self::GlobSuffix(name) => name == file_name,
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExactPath(path) => f.write_str(path),
            Self::GlobSuffix(name) => write!(f, "*{}", name),
        }
    }
}

/// Where an excluded directory name came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DirOrigin {
    /// Built-in structural exclusion, dropped from the output
    Default,
    /// Named by the user, copied verbatim to the output
    User,
}

/// The complete, validated rule set for one build
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RuleSet {
    /// Directory names the user asked to keep uncompiled, in input order
    pub user_dirs: Vec<String>,
    /// File rules in input order, without duplicates
    pub rules: Vec<Rule>,
}

impl RuleSet {
    /// Rule set with no user exclusions
    pub fn new() -> Self {
        Self::default()
    }

    /// Origin of an excluded directory name, if the name is excluded at all
    ///
    /// A name the user lists explicitly counts as user-excluded even when it
    /// is also a default exclusion, so it gets copied.
    pub fn dir_origin(&self, name: &str) -> Option<DirOrigin> {
        if self.user_dirs.iter().any(|d| d == name) {
            Some(DirOrigin::User)
        } else if DEFAULT_EXCLUDED_DIRS.contains(&name) {
            Some(DirOrigin::Default)
        } else {
            None
        }
    }

    /// Merged default and user directory exclusions
    pub fn excluded_dirs(&self) -> BTreeSet<&str> {
        DEFAULT_EXCLUDED_DIRS
            .iter()
            .copied()
            .chain(self.user_dirs.iter().map(String::as_str))
            .collect()
    }

    /// First file rule selecting the given file
    pub fn matching_rule(&self, relative: &str, file_name: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.matches(relative, file_name))
    }

    pub fn exact_paths(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().filter_map(|r| match r {
            Rule::ExactPath(p) => Some(p.as_str()),
            Rule::GlobSuffix(_) => None,
        })
    }
}

/// Parses and validates raw exclusion lists
pub struct RuleValidator;

impl RuleValidator {
    /// Validate comma-separated directory and file exclusion lists
    ///
    /// Every rejected file token is reported, not just the first one.
    pub fn validate(dirs: &str, files: &str) -> BuildResult<RuleSet> {
        Self::validate_tokens(split_list(dirs), split_list(files))
    }

    /// Validate already-split exclusion tokens
    pub fn validate_tokens<D, F>(dirs: D, files: F) -> BuildResult<RuleSet>
    where
        D: IntoIterator,
        D::Item: AsRef<str>,
        F: IntoIterator,
        F::Item: AsRef<str>,
    {
        let mut user_dirs: Vec<String> = Vec::new();
        for dir in dirs {
            let dir = dir.as_ref().trim();
            if !dir.is_empty() && !user_dirs.iter().any(|d| d == dir) {
                user_dirs.push(dir.to_string());
            }
        }

        let mut rules = Vec::new();
        let mut errors = Vec::new();
        for token in files {
            let token = token.as_ref().trim();
            if token.is_empty() {
                continue;
            }
            match parse_file_rule(token) {
                Ok(rule) if !rules.contains(&rule) => rules.push(rule),
                Ok(_) => {}
                Err(e) => errors.push(e),
            }
        }

        if !errors.is_empty() {
            return Err(BuildError::InvalidPatterns(errors));
        }

        Ok(RuleSet { user_dirs, rules })
    }
}

/// Parse one file-exclusion token
pub fn parse_file_rule(token: &str) -> Result<Rule, PatternError> {
    if !token.contains('*') {
        return Ok(Rule::ExactPath(normalize_path(token)));
    }

    let Some(name) = token.strip_prefix('*') else {
        return Err(PatternError::WildcardNotLeading(token.to_string()));
    };
    if name.contains('*') {
        return Err(PatternError::MultipleWildcards(token.to_string()));
    }
    if name.contains(['/', '\\']) {
        return Err(PatternError::PathSeparatorAfterWildcard(token.to_string()));
    }
    let Some(stem) = name.strip_suffix(".py") else {
        return Err(PatternError::NotPythonFile(token.to_string()));
    };
    if stem.is_empty() {
        return Err(PatternError::EmptyFilename(token.to_string()));
    }

    Ok(Rule::GlobSuffix(name.to_string()))
}

/// Split a comma-separated list, dropping blank entries
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// `/`-separated form of a user-supplied relative path
fn normalize_path(path: &str) -> String {
    let unified = path.replace('\\', "/");
    let mut trimmed = unified.as_str();
    while let Some(rest) = trimmed.strip_prefix("./") {
        trimmed = rest;
    }
    trimmed.to_string()
}
