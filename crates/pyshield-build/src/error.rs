/// Build engine error types
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

pub type BuildResult<T> = Result<T, BuildError>;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Project path '{}' does not exist or is not a directory", .path.display())]
    InvalidProjectPath { path: PathBuf },

    #[error("Rejected {} exclusion pattern(s):\n{}", .0.len(), format_pattern_errors(.0))]
    InvalidPatterns(Vec<PatternError>),

    #[error("Output directory {} overlaps project root {}", .output.display(), .project.display())]
    OutputOverlapsProject { output: PathBuf, project: PathBuf },

    #[error("Compiler toolchain unavailable: {0}")]
    Toolchain(String),

    #[error("Failed to create worker pool: {0}")]
    ThreadPool(String),

    #[error("Build interrupted by user ({completed} unit(s) finished, {abandoned} abandoned)")]
    Interrupted { completed: usize, abandoned: usize },

    #[error("I/O error at {path}: {error}")]
    IoError {
        path: PathBuf,
        error: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BuildError {
    /// Create an I/O error with path context
    pub fn io(path: impl Into<PathBuf>, error: std::io::Error) -> Self {
        Self::IoError {
            path: path.into(),
            error,
        }
    }

    /// Create an invalid project path error
    pub fn invalid_project(path: impl Into<PathBuf>) -> Self {
        Self::InvalidProjectPath { path: path.into() }
    }

    /// Whether this error stems from bad user input rather than the environment
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidProjectPath { .. }
                | Self::InvalidPatterns(_)
                | Self::OutputOverlapsProject { .. }
        )
    }
}

/// A file-exclusion token rejected by the rule validator
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "pattern", rename_all = "kebab-case")]
pub enum PatternError {
    #[error("'{0}': wildcard must be the first character (use '*name.py')")]
    WildcardNotLeading(String),

    #[error("'{0}': only a single leading wildcard is allowed")]
    MultipleWildcards(String),

    #[error("'{0}': wildcard patterns cannot contain a path separator")]
    PathSeparatorAfterWildcard(String),

    #[error("'{0}': wildcard patterns must end with '.py'")]
    NotPythonFile(String),

    #[error("'{0}': wildcard pattern is missing a file name")]
    EmptyFilename(String),
}

impl PatternError {
    /// The offending pattern as the user wrote it
    pub fn pattern(&self) -> &str {
        match self {
            Self::WildcardNotLeading(p)
            | Self::MultipleWildcards(p)
            | Self::PathSeparatorAfterWildcard(p)
            | Self::NotPythonFile(p)
            | Self::EmptyFilename(p) => p,
        }
    }
}

fn format_pattern_errors(errors: &[PatternError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Pipeline stage a recovered failure happened in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Scan,
    Compile,
    Artifact,
    Resource,
    PackageMarker,
    PreservedDir,
    PreservedFile,
    Fallback,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Scan => "scan",
            Self::Compile => "compile",
            Self::Artifact => "artifact",
            Self::Resource => "resource",
            Self::PackageMarker => "package marker",
            Self::PreservedDir => "preserved directory",
            Self::PreservedFile => "preserved file",
            Self::Fallback => "fallback source",
        };
        f.write_str(name)
    }
}

/// A file the planner had to leave out of the plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanningWarning {
    pub path: PathBuf,
    pub reason: String,
}

impl PlanningWarning {
    pub fn new(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for PlanningWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.reason)
    }
}

/// An I/O failure while materializing one output file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CopyFailure {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub stage: Stage,
    pub message: String,
}

impl fmt::Display for CopyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} -> {}: {}",
            self.stage,
            self.source.display(),
            self.destination.display(),
            self.message
        )
    }
}
