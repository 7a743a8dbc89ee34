//! Build pipeline: plan, compile, assemble
use crate::assembler::{AssemblyReport, OutputAssembler};
use crate::compiler::{Compiler, CompilerDirectives};
use crate::error::{BuildError, BuildResult};
use crate::orchestrator::{CompileOrchestrator, CompileResults, ProgressCallback};
use crate::plan::BuildPlan;
use crate::rules::RuleSet;
use crate::scanner::TreeScanner;

use serde::Serialize;
use std::env;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Name of the scratch directory for compiler intermediates
pub const TEMP_DIR_NAME: &str = "__temp__";

/// Default output root, relative to the working directory
pub const DEFAULT_OUTPUT_DIR: &str = "build";

/// Build configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildConfig {
    /// Output root; the assembled tree goes to `<output_dir>/<project-name>`
    pub output_dir: PathBuf,
    /// Worker count, `0` for one per hardware thread
    pub jobs: usize,
    /// Remove previous output before building
    pub clean: bool,
    pub directives: CompilerDirectives,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            jobs: 0,
            clean: false,
            directives: CompilerDirectives::default(),
        }
    }
}

/// Overall result of a build that ran to completion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    /// Every unit compiled and every file was placed
    Success,
    /// Some units fell back to source, or planning/copy problems were recorded
    SuccessWithWarnings,
}

/// Build statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildStats {
    /// Total number of compile units
    pub total_units: usize,
    /// Units that produced an artifact
    pub compiled_units: usize,
    /// Units preserved as source after a compile failure
    pub failed_units: usize,
    /// Number of packages discovered
    pub packages: usize,
    /// Files written to the output tree
    pub files_written: usize,
    pub scan_time: Duration,
    pub compile_time: Duration,
    pub assemble_time: Duration,
    pub total_time: Duration,
}

/// Build context - result of a completed build
#[derive(Debug)]
pub struct BuildContext {
    pub plan: BuildPlan,
    pub results: CompileResults,
    pub assembly: AssemblyReport,
    pub stats: BuildStats,
    pub status: BuildStatus,
}

impl BuildContext {
    /// Relative path of a failed unit, for reporting
    pub fn relative_source<'a>(&'a self, source: &'a Path) -> &'a Path {
        source.strip_prefix(&self.plan.root).unwrap_or(source)
    }
}

/// Main builder for orchestrating builds
pub struct Builder {
    /// Canonical project root
    root_dir: PathBuf,
    project_name: String,
    rules: RuleSet,
    config: BuildConfig,
    cancel: Option<Arc<AtomicBool>>,
    progress: Option<ProgressCallback>,
}

impl Builder {
    /// Create a builder for the project at the given path
    pub fn new(project_path: impl AsRef<Path>) -> BuildResult<Self> {
        let path = project_path.as_ref();
        if !path.is_dir() {
            return Err(BuildError::invalid_project(path));
        }
        let root_dir = fs::canonicalize(path).map_err(|_| BuildError::invalid_project(path))?;
        let project_name = root_dir
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .ok_or_else(|| BuildError::invalid_project(path))?;

        Ok(Self {
            root_dir,
            project_name,
            rules: RuleSet::new(),
            config: BuildConfig::default(),
            cancel: None,
            progress: None,
        })
    }

    /// Set build configuration
    pub fn with_config(mut self, config: BuildConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the validated exclusion rules
    pub fn with_rules(mut self, rules: RuleSet) -> Self {
        self.rules = rules;
        self
    }

    /// Set the output root
    pub fn with_output_dir(mut self, output_dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = output_dir.into();
        self
    }

    /// Set the worker count
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.config.jobs = jobs;
        self
    }

    /// Flag checked between units; once set, the build stops dispatching work
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Receive per-unit progress events
    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn project_name(&self) -> &str {
        &self.project_name
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// Absolute output root
    pub fn output_root(&self) -> BuildResult<PathBuf> {
        absolutize(&self.config.output_dir)
    }

    /// Directory the assembled tree is written to
    pub fn target_dir(&self) -> BuildResult<PathBuf> {
        Ok(self.output_root()?.join(&self.project_name))
    }

    /// Scratch directory for compiler intermediates
    pub fn temp_dir(&self) -> BuildResult<PathBuf> {
        Ok(self.output_root()?.join(TEMP_DIR_NAME))
    }

    /// Scan the project without compiling anything
    pub fn plan(&self) -> BuildResult<BuildPlan> {
        let output_root = self.checked_output_root()?;

        let mut scanner = TreeScanner::new(&self.root_dir, &self.rules);
        if output_root.starts_with(&self.root_dir) {
            scanner = scanner.with_pruned(output_root);
        }
        scanner.scan()
    }

    /// Plan and execute the build
    pub fn build<C: Compiler>(&self, compiler: C) -> BuildResult<BuildContext> {
        info!(project = %self.project_name, "building");

        let scan_start = Instant::now();
        let plan = self.plan()?;
        let scan_time = scan_start.elapsed();

        let mut ctx = self.execute(plan, compiler)?;
        ctx.stats.scan_time = scan_time;
        ctx.stats.total_time += scan_time;
        Ok(ctx)
    }

    /// Compile and assemble an already computed plan
    pub fn execute<C: Compiler>(&self, plan: BuildPlan, compiler: C) -> BuildResult<BuildContext> {
        let start = Instant::now();
        let mut stats = BuildStats::default();

        if self.config.clean {
            self.clean()?;
        }

        let temp_dir = self.temp_dir()?;
        fs::create_dir_all(&temp_dir).map_err(|e| BuildError::io(&temp_dir, e))?;

        let compile_start = Instant::now();
        let mut orchestrator = CompileOrchestrator::new(compiler)
            .with_jobs(self.config.jobs)
            .with_directives(self.config.directives.clone())
            .with_progress(self.progress.clone());
        if let Some(cancel) = &self.cancel {
            orchestrator = orchestrator.with_cancel_flag(Arc::clone(cancel));
        }
        let results = orchestrator.execute(&plan.units, &temp_dir)?;
        stats.compile_time = compile_start.elapsed();

        if results.interrupted {
            warn!(
                completed = results.completed(),
                abandoned = results.abandoned.len(),
                "build interrupted; output not assembled"
            );
            return Err(BuildError::Interrupted {
                completed: results.completed(),
                abandoned: results.abandoned.len(),
            });
        }

        let assemble_start = Instant::now();
        let mut assembler = OutputAssembler::new(self.target_dir()?);
        let output_root = self.output_root()?;
        if output_root.starts_with(&self.root_dir) {
            assembler = assembler.with_pruned(output_root);
        }
        let assembly = assembler.assemble(&plan, &results)?;
        stats.assemble_time = assemble_start.elapsed();

        stats.total_units = plan.units.len();
        stats.compiled_units = results.artifacts.len();
        stats.failed_units = results.failures.len();
        stats.packages = plan.packages.len();
        stats.files_written = assembly.files_written();
        stats.total_time = start.elapsed();

        let status = if results.failures.is_empty()
            && assembly.failures.is_empty()
            && plan.warnings.is_empty()
        {
            BuildStatus::Success
        } else {
            BuildStatus::SuccessWithWarnings
        };

        info!(
            compiled = stats.compiled_units,
            failed = stats.failed_units,
            files = stats.files_written,
            elapsed_ms = stats.total_time.as_millis() as u64,
            ?status,
            "build finished"
        );

        Ok(BuildContext {
            plan,
            results,
            assembly,
            stats,
            status,
        })
    }

    /// Remove the assembled tree and compiler intermediates
    pub fn clean(&self) -> BuildResult<()> {
        self.checked_output_root()?;
        for dir in [self.target_dir()?, self.temp_dir()?] {
            if dir.exists() {
                info!(dir = %dir.display(), "removing");
                fs::remove_dir_all(&dir).map_err(|e| BuildError::io(&dir, e))?;
            }
        }
        Ok(())
    }

    /// Output root, rejected if it is the project or one of its ancestors
    fn checked_output_root(&self) -> BuildResult<PathBuf> {
        let output_root = self.output_root()?;
        if self.root_dir.starts_with(&output_root) {
            return Err(BuildError::OutputOverlapsProject {
                output: output_root,
                project: self.root_dir.clone(),
            });
        }
        Ok(output_root)
    }
}

/// Absolute, symlink-resolved form of a path that may not exist yet
///
/// The longest existing prefix is canonicalized; the rest is normalized
/// lexically.
fn absolutize(path: &Path) -> BuildResult<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir()?.join(path)
    };

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }

    let mut existing = normalized.as_path();
    let mut rest = Vec::new();
    while !existing.exists() {
        let (Some(parent), Some(name)) = (existing.parent(), existing.file_name()) else {
            return Ok(normalized);
        };
        rest.push(name.to_os_string());
        existing = parent;
    }

    let mut resolved = fs::canonicalize(existing).map_err(|e| BuildError::io(existing, e))?;
    resolved.extend(rest.iter().rev());
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_build_config_default() {
        let config = BuildConfig::default();
        assert_eq!(config.output_dir, PathBuf::from("build"));
        assert_eq!(config.jobs, 0);
        assert!(!config.clean);
    }

    #[test]
    fn test_missing_project_is_config_error() {
        let err = Builder::new("/definitely/not/here").err().unwrap();
        assert!(matches!(err, BuildError::InvalidProjectPath { .. }));
        assert!(err.is_config_error());
    }

    #[test]
    fn test_file_is_not_a_project() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.py");
        fs::write(&file, "").unwrap();
        assert!(Builder::new(&file).is_err());
    }

    #[test]
    fn test_layout_under_output_root() {
        let project = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let builder = Builder::new(project.path())
            .unwrap()
            .with_output_dir(out.path().join("dist"));
        let root = out.path().canonicalize().unwrap().join("dist");

        assert_eq!(builder.target_dir().unwrap(), root.join(builder.project_name()));
        assert_eq!(builder.temp_dir().unwrap(), root.join("__temp__"));
    }

    #[test]
    fn test_output_equal_to_project_is_rejected() {
        let project = TempDir::new().unwrap();
        let builder = Builder::new(project.path())
            .unwrap()
            .with_output_dir(project.path());
        assert!(matches!(
            builder.plan(),
            Err(BuildError::OutputOverlapsProject { .. })
        ));
    }

    #[test]
    fn test_output_containing_project_is_rejected() {
        let parent = TempDir::new().unwrap();
        let project = parent.path().join("proj");
        fs::create_dir(&project).unwrap();
        let builder = Builder::new(&project)
            .unwrap()
            .with_output_dir(parent.path());
        assert!(builder.clean().is_err());
    }

    #[test]
    fn test_absolutize_resolves_dot_segments() {
        let dir = TempDir::new().unwrap();
        let base = dir.path().canonicalize().unwrap();
        let path = base.join("a/./b/../c");
        assert_eq!(absolutize(&path).unwrap(), base.join("a/c"));
    }
}
