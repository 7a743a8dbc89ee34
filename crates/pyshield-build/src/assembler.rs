//! Output tree assembly
//!
//! Every file in the plan ends up in the output as exactly one of: a compiled
//! artifact, a verbatim source with a recorded reason, a package marker, a
//! resource, or part of a preserved directory. Copies are independent and run
//! in parallel; a failed copy is recorded and the rest continue.

use crate::error::{BuildError, BuildResult, CopyFailure, Stage};
use crate::orchestrator::CompileResults;
use crate::plan::BuildPlan;
use crate::rules::Rule;

use rayon::prelude::*;
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Why a `.py` file was copied instead of compiled
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum PreserveReason {
    /// Selected by a user file rule
    Rule { rule: Rule },
    /// The compiler rejected it
    CompileFailed { line: Option<u32> },
    /// Never reached the compiler
    NotCompiled,
}

/// A source file written to the output verbatim
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreservedSource {
    pub relative: PathBuf,
    pub reason: PreserveReason,
}

/// What the assembler wrote
#[derive(Debug, Clone, Default, Serialize)]
pub struct AssemblyReport {
    pub output_dir: PathBuf,
    pub artifacts: usize,
    pub fallbacks: usize,
    pub package_markers: usize,
    pub resources: usize,
    pub preserved_files: usize,
    /// Files copied as part of preserved directories
    pub preserved_dir_files: usize,
    pub preserved_sources: Vec<PreservedSource>,
    pub failures: Vec<CopyFailure>,
}

impl AssemblyReport {
    /// Total number of files written
    pub fn files_written(&self) -> usize {
        self.artifacts
            + self.fallbacks
            + self.package_markers
            + self.resources
            + self.preserved_files
            + self.preserved_dir_files
    }

    fn record(&mut self, stage: Stage) {
        match stage {
            Stage::Artifact => self.artifacts += 1,
            Stage::Fallback => self.fallbacks += 1,
            Stage::PackageMarker => self.package_markers += 1,
            Stage::Resource => self.resources += 1,
            Stage::PreservedFile => self.preserved_files += 1,
            Stage::PreservedDir => self.preserved_dir_files += 1,
            Stage::Scan | Stage::Compile => {}
        }
    }
}

#[derive(Debug)]
struct CopyJob {
    source: PathBuf,
    destination: PathBuf,
    stage: Stage,
}

/// Materializes a build plan and its compile results into an output directory
pub struct OutputAssembler {
    output_dir: PathBuf,
    pruned: Vec<PathBuf>,
}

impl OutputAssembler {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            pruned: Vec::new(),
        }
    }

    /// Never copy from this absolute directory when expanding preserved directories
    pub fn with_pruned(mut self, dir: impl Into<PathBuf>) -> Self {
        self.pruned.push(dir.into());
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Assemble the output tree
    pub fn assemble(&self, plan: &BuildPlan, results: &CompileResults) -> BuildResult<AssemblyReport> {
        fs::create_dir_all(&self.output_dir).map_err(|e| BuildError::io(&self.output_dir, e))?;

        let mut report = AssemblyReport {
            output_dir: self.output_dir.clone(),
            ..AssemblyReport::default()
        };
        let jobs = self.collect_jobs(plan, results, &mut report);
        info!(
            files = jobs.len(),
            output = %self.output_dir.display(),
            "assembling output"
        );

        let outcomes: Vec<(Stage, Option<CopyFailure>)> = jobs
            .par_iter()
            .map(|job| (job.stage, copy_job(job).err()))
            .collect();

        for (stage, failure) in outcomes {
            match failure {
                None => report.record(stage),
                Some(failure) => {
                    warn!(
                        stage = %failure.stage,
                        source = %failure.source.display(),
                        "copy failed: {}",
                        failure.message
                    );
                    report.failures.push(failure);
                }
            }
        }

        info!(
            written = report.files_written(),
            failed = report.failures.len(),
            "assembly complete"
        );
        Ok(report)
    }

    fn collect_jobs(
        &self,
        plan: &BuildPlan,
        results: &CompileResults,
        report: &mut AssemblyReport,
    ) -> Vec<CopyJob> {
        let root = &plan.root;
        let mut jobs = Vec::new();

        let artifacts: HashMap<&Path, &Path> = results
            .artifacts
            .iter()
            .map(|a| (a.unit.source.as_path(), a.artifact.as_path()))
            .collect();

        for unit in &plan.units {
            if let Some(artifact) = artifacts.get(unit.source.as_path()) {
                let Some(file_name) = artifact.file_name() else {
                    report.failures.push(CopyFailure {
                        source: artifact.to_path_buf(),
                        destination: self.output_dir.clone(),
                        stage: Stage::Artifact,
                        message: "artifact path has no file name".to_string(),
                    });
                    continue;
                };
                let destination = match unit.relative.parent() {
                    Some(parent) => self.output_dir.join(parent).join(file_name),
                    None => self.output_dir.join(file_name),
                };
                jobs.push(CopyJob {
                    source: artifact.to_path_buf(),
                    destination,
                    stage: Stage::Artifact,
                });
                continue;
            }

            let reason = match results.failures.get(&unit.source) {
                Some(diagnostic) => PreserveReason::CompileFailed {
                    line: diagnostic.line,
                },
                None => PreserveReason::NotCompiled,
            };
            debug!(file = %unit.relative.display(), "falling back to source");
            report.preserved_sources.push(PreservedSource {
                relative: unit.relative.clone(),
                reason,
            });
            jobs.push(self.verbatim(root, &unit.relative, Stage::Fallback));
        }

        for marker in &plan.package_markers {
            jobs.push(self.verbatim(root, marker, Stage::PackageMarker));
        }
        for resource in &plan.resources {
            jobs.push(self.verbatim(root, resource, Stage::Resource));
        }
        for preserved in &plan.preserved_files {
            report.preserved_sources.push(PreservedSource {
                relative: preserved.relative.clone(),
                reason: PreserveReason::Rule {
                    rule: preserved.rule.clone(),
                },
            });
            jobs.push(self.verbatim(root, &preserved.relative, Stage::PreservedFile));
        }
        for dir in &plan.preserved_dirs {
            self.expand_dir(root, dir, &mut jobs, report);
        }

        report
            .preserved_sources
            .sort_by(|a, b| a.relative.cmp(&b.relative));
        jobs
    }

    fn verbatim(&self, root: &Path, relative: &Path, stage: Stage) -> CopyJob {
        CopyJob {
            source: root.join(relative),
            destination: self.output_dir.join(relative),
            stage,
        }
    }

    /// One job per file below a preserved directory
    fn expand_dir(
        &self,
        root: &Path,
        dir: &Path,
        jobs: &mut Vec<CopyJob>,
        report: &mut AssemblyReport,
    ) {
        let source_dir = root.join(dir);
        // Keep empty preserved directories in the output too
        let target_dir = self.output_dir.join(dir);
        if let Err(e) = fs::create_dir_all(&target_dir) {
            report.failures.push(CopyFailure {
                source: source_dir.clone(),
                destination: target_dir,
                stage: Stage::PreservedDir,
                message: e.to_string(),
            });
            return;
        }

        let walker = WalkDir::new(&source_dir)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !self.pruned.iter().any(|p| p == e.path()));
        for entry in walker {
            match entry {
                Ok(entry) if entry.file_type().is_dir() => {}
                Ok(entry) => {
                    let Ok(relative) = entry.path().strip_prefix(root) else {
                        continue;
                    };
                    jobs.push(self.verbatim(root, relative, Stage::PreservedDir));
                }
                Err(err) => {
                    let source = err.path().map(Path::to_path_buf).unwrap_or(source_dir.clone());
                    report.failures.push(CopyFailure {
                        destination: self.output_dir.join(dir),
                        source,
                        stage: Stage::PreservedDir,
                        message: err.to_string(),
                    });
                }
            }
        }
    }
}

fn copy_job(job: &CopyJob) -> Result<(), CopyFailure> {
    copy_preserving_metadata(&job.source, &job.destination).map_err(|e| CopyFailure {
        source: job.source.clone(),
        destination: job.destination.clone(),
        stage: job.stage,
        message: e.to_string(),
    })
}

/// Copy a file, keeping its permissions and modification time
///
/// Parent directories are created if absent, so concurrent copies into the
/// same directory never race.
pub fn copy_preserving_metadata(source: &Path, destination: &Path) -> io::Result<()> {
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(source, destination)?;

    let modified = fs::metadata(source)?.modified()?;
    fs::File::options()
        .write(true)
        .open(destination)?
        .set_modified(modified)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::Diagnostic;
    use crate::orchestrator::CompiledArtifact;
    use crate::plan::{CompileUnit, PreservedFile};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn write(path: &Path, contents: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_copy_preserves_mtime() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("a.txt");
        write(&source, "data");
        let destination = dir.path().join("out/nested/a.txt");

        copy_preserving_metadata(&source, &destination).unwrap();

        assert_eq!(fs::read_to_string(&destination).unwrap(), "data");
        assert_eq!(
            fs::metadata(&source).unwrap().modified().unwrap(),
            fs::metadata(&destination).unwrap().modified().unwrap()
        );
    }

    #[test]
    fn test_assemble_places_every_kind_of_file() {
        let project = TempDir::new().unwrap();
        let root = project.path().canonicalize().unwrap();
        write(&root.join("a.py"), "a = 1\n");
        write(&root.join("pkg/__init__.py"), "");
        write(&root.join("pkg/b.py"), "b = 2\n");
        write(&root.join("pkg/bad.py"), "def broken(:\n");
        write(&root.join("pkg/data.json"), "{}");
        write(&root.join("tests/test_a.py"), "assert True\n");

        let scratch = TempDir::new().unwrap();
        let artifact = scratch.path().join("a.so");
        write(&artifact, "binary");

        let plan = BuildPlan {
            root: root.clone(),
            units: vec![
                CompileUnit::new(&root, "a.py"),
                CompileUnit::new(&root, "pkg/bad.py"),
            ],
            packages: vec!["pkg".to_string()],
            package_markers: vec![PathBuf::from("pkg/__init__.py")],
            resources: vec![PathBuf::from("pkg/data.json")],
            preserved_files: vec![PreservedFile {
                relative: PathBuf::from("pkg/b.py"),
                rule: Rule::GlobSuffix("b.py".to_string()),
            }],
            preserved_dirs: vec![PathBuf::from("tests")],
            warnings: Vec::new(),
        };
        let mut results = CompileResults::default();
        results.artifacts.push(CompiledArtifact {
            unit: plan.units[0].clone(),
            artifact,
        });
        results
            .failures
            .insert(root.join("pkg/bad.py"), Diagnostic::new("boom").with_line(1));

        let out = TempDir::new().unwrap();
        let report = OutputAssembler::new(out.path().join("proj"))
            .assemble(&plan, &results)
            .unwrap();

        let target = out.path().join("proj");
        assert!(target.join("a.so").is_file());
        assert!(!target.join("a.py").exists());
        assert!(target.join("pkg/__init__.py").is_file());
        assert!(target.join("pkg/b.py").is_file());
        assert!(target.join("pkg/bad.py").is_file());
        assert!(target.join("pkg/data.json").is_file());
        assert!(target.join("tests/test_a.py").is_file());

        assert_eq!(report.files_written(), 6);
        assert!(report.failures.is_empty());
        assert_eq!(
            report.preserved_sources,
            vec![
                PreservedSource {
                    relative: PathBuf::from("pkg/b.py"),
                    reason: PreserveReason::Rule {
                        rule: Rule::GlobSuffix("b.py".to_string())
                    },
                },
                PreservedSource {
                    relative: PathBuf::from("pkg/bad.py"),
                    reason: PreserveReason::CompileFailed { line: Some(1) },
                },
            ]
        );
    }

    #[test]
    fn test_preserved_dir_skips_pruned_output() {
        let project = TempDir::new().unwrap();
        let root = project.path().canonicalize().unwrap();
        write(&root.join("app/tool.py"), "t = 1\n");
        write(&root.join("app/out/proj/app/tool.py"), "stale\n");
        write(&root.join("app/out/__temp__/c/tool.c"), "/* c */\n");

        let plan = BuildPlan {
            root: root.clone(),
            preserved_dirs: vec![PathBuf::from("app")],
            ..BuildPlan::default()
        };

        let report = OutputAssembler::new(root.join("app/out/proj"))
            .with_pruned(root.join("app/out"))
            .assemble(&plan, &CompileResults::default())
            .unwrap();

        assert_eq!(report.preserved_dir_files, 1);
        assert!(!root.join("app/out/proj/app/out").exists());
    }

    #[test]
    fn test_missing_resource_is_recorded_not_fatal() {
        let project = TempDir::new().unwrap();
        let root = project.path().canonicalize().unwrap();
        write(&root.join("keep.txt"), "x");

        let plan = BuildPlan {
            root: root.clone(),
            resources: vec![PathBuf::from("gone.txt"), PathBuf::from("keep.txt")],
            ..BuildPlan::default()
        };

        let out = TempDir::new().unwrap();
        let report = OutputAssembler::new(out.path())
            .assemble(&plan, &CompileResults::default())
            .unwrap();

        assert_eq!(report.resources, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].stage, Stage::Resource);
        assert!(out.path().join("keep.txt").is_file());
    }
}
