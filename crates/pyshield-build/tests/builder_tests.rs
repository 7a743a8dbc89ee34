//! Integration tests for the build pipeline
//!
//! The native toolchain is replaced by in-process compilers so these tests
//! exercise planning, orchestration and assembly end to end.

use pyshield_build::{
    BuildConfig, BuildError, BuildStatus, BuildSummary, Builder, CompileRequest, Compiler,
    Diagnostic, PreserveReason, ProgressEvent, RuleValidator, UnitState,
};
use pretty_assertions::assert_eq;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use walkdir::WalkDir;

const ARTIFACT_SUFFIX: &str = ".so";

/// Writes `compiled:<source bytes>` next to where a real toolchain would
#[derive(Default)]
struct FakeCompiler {
    failing: HashSet<String>,
    panicking: HashSet<String>,
}

impl FakeCompiler {
    fn failing(modules: &[&str]) -> Self {
        Self {
            failing: modules.iter().map(|m| m.to_string()).collect(),
            ..Self::default()
        }
    }

    fn panicking(modules: &[&str]) -> Self {
        Self {
            panicking: modules.iter().map(|m| m.to_string()).collect(),
            ..Self::default()
        }
    }
}

impl Compiler for FakeCompiler {
    fn compile(&self, request: &CompileRequest<'_>) -> Result<PathBuf, Diagnostic> {
        let unit = request.unit;
        if self.panicking.contains(&unit.module) {
            panic!("translator crashed on {}", unit.module);
        }
        if self.failing.contains(&unit.module) {
            return Err(Diagnostic::from_compiler_output(&format!(
                "{}:12:4: undeclared name not builtin: frobnicate",
                unit.relative.display()
            )));
        }

        let source = fs::read(&unit.source).map_err(|e| Diagnostic::new(e.to_string()))?;
        let artifact = request
            .temp_dir
            .join("lib")
            .join(unit.relative.parent().unwrap_or(Path::new("")))
            .join(format!("{}{}", unit.short_name(), ARTIFACT_SUFFIX));
        fs::create_dir_all(artifact.parent().unwrap()).unwrap();
        let mut bytes = b"compiled:".to_vec();
        bytes.extend(source);
        fs::write(&artifact, bytes).map_err(|e| Diagnostic::new(e.to_string()))?;
        Ok(artifact)
    }
}

/// Sets the cancel flag as soon as it compiles its first unit
struct CancellingCompiler {
    inner: FakeCompiler,
    cancel: Arc<AtomicBool>,
}

impl Compiler for CancellingCompiler {
    fn compile(&self, request: &CompileRequest<'_>) -> Result<PathBuf, Diagnostic> {
        self.cancel.store(true, Ordering::SeqCst);
        self.inner.compile(request)
    }
}

fn create_project(files: &[(&str, &str)]) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    for (path, content) in files {
        let full = dir.path().join(path);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(full, content).unwrap();
    }
    dir
}

fn make_builder(project: &TempDir, out: &TempDir, dirs: &str, files: &str) -> Builder {
    let rules = RuleValidator::validate(dirs, files).unwrap();
    Builder::new(project.path())
        .unwrap()
        .with_rules(rules)
        .with_config(BuildConfig {
            output_dir: out.path().to_path_buf(),
            jobs: 2,
            ..BuildConfig::default()
        })
}

/// Relative path -> contents for every file below `dir`
fn tree(dir: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            (
                e.path().strip_prefix(dir).unwrap().to_path_buf(),
                fs::read(e.path()).unwrap(),
            )
        })
        .collect()
}

fn tree_digest(dir: &Path) -> String {
    let mut hasher = Sha256::new();
    for (path, contents) in tree(dir) {
        hasher.update(path.to_string_lossy().as_bytes());
        hasher.update([0]);
        hasher.update(&contents);
    }
    format!("{:x}", hasher.finalize())
}

fn paths(dir: &Path) -> BTreeSet<String> {
    tree(dir)
        .into_keys()
        .map(|p| p.to_string_lossy().replace('\\', "/"))
        .collect()
}

fn set(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[test]
fn test_glob_exclusion_preserves_matching_source() {
    let project = create_project(&[
        ("a.py", "A = 1\n"),
        ("pkg/__init__.py", ""),
        ("pkg/b.py", "B = 2\n"),
    ]);
    let out = tempfile::tempdir().unwrap();
    let builder = make_builder(&project, &out, "", "*b.py");

    let plan = builder.plan().unwrap();
    let modules: Vec<_> = plan.units.iter().map(|u| u.module.as_str()).collect();
    assert_eq!(modules, vec!["a"]);
    assert_eq!(plan.packages, vec!["pkg"]);

    let ctx = builder.build(FakeCompiler::default()).unwrap();
    let target = builder.target_dir().unwrap();

    assert_eq!(ctx.status, BuildStatus::Success);
    assert_eq!(
        paths(&target),
        set(&["a.so", "pkg/__init__.py", "pkg/b.py"])
    );
    assert_eq!(fs::read_to_string(target.join("pkg/b.py")).unwrap(), "B = 2\n");
}

#[test]
fn test_failed_unit_falls_back_with_line() {
    let project = create_project(&[("good.py", "x = 1\n"), ("bad.py", "y = frobnicate\n")]);
    let out = tempfile::tempdir().unwrap();
    let builder = make_builder(&project, &out, "", "");

    let ctx = builder.build(FakeCompiler::failing(&["bad"])).unwrap();
    let target = builder.target_dir().unwrap();

    assert_eq!(ctx.status, BuildStatus::SuccessWithWarnings);
    assert_eq!(ctx.results.artifacts.len(), 1);
    assert_eq!(ctx.results.failures.len(), 1);

    let (source, diagnostic) = ctx.results.failures.iter().next().unwrap();
    assert_eq!(ctx.relative_source(source), Path::new("bad.py"));
    assert_eq!(diagnostic.line, Some(12));
    assert!(diagnostic.message.contains("frobnicate"));
    assert_eq!(ctx.results.state_of(source), UnitState::Failed);

    assert!(target.join("good.so").is_file());
    assert_eq!(
        fs::read_to_string(target.join("bad.py")).unwrap(),
        "y = frobnicate\n"
    );

    let summary = BuildSummary::from_context(&ctx);
    assert!(summary.has_warnings());
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].file, PathBuf::from("bad.py"));
    assert_eq!(summary.failed[0].line, Some(12));
    assert!(summary.to_json().unwrap().contains("\"line\": 12"));
}

#[test]
fn test_entire_batch_failing_is_not_fatal() {
    let project = create_project(&[("a.py", "a\n"), ("b.py", "b\n"), ("res.txt", "r")]);
    let out = tempfile::tempdir().unwrap();
    let builder = make_builder(&project, &out, "", "");

    let ctx = builder.build(FakeCompiler::failing(&["a", "b"])).unwrap();

    assert!(ctx.results.all_failed());
    assert_eq!(ctx.status, BuildStatus::SuccessWithWarnings);
    assert_eq!(ctx.stats.compiled_units, 0);
    assert_eq!(
        paths(&builder.target_dir().unwrap()),
        set(&["a.py", "b.py", "res.txt"])
    );
}

#[test]
fn test_panicking_compiler_is_isolated() {
    let project = create_project(&[("a.py", "a\n"), ("boom.py", "b\n"), ("c.py", "c\n")]);
    let out = tempfile::tempdir().unwrap();
    let builder = make_builder(&project, &out, "", "");

    let ctx = builder.build(FakeCompiler::panicking(&["boom"])).unwrap();

    assert_eq!(ctx.results.artifacts.len(), 2);
    let diagnostic = ctx.results.failures.values().next().unwrap();
    assert!(diagnostic.message.contains("panicked"));
    assert!(diagnostic.message.contains("boom"));
    assert!(builder.target_dir().unwrap().join("boom.py").is_file());
}

#[test]
fn test_vanished_source_fails_without_compiling() {
    let project = create_project(&[("a.py", "a\n"), ("gone.py", "g\n")]);
    let out = tempfile::tempdir().unwrap();
    let builder = make_builder(&project, &out, "", "");

    let plan = builder.plan().unwrap();
    fs::remove_file(project.path().join("gone.py")).unwrap();

    let orchestrator = pyshield_build::CompileOrchestrator::new(FakeCompiler::panicking(&["gone"]));
    let results = orchestrator
        .execute(&plan.units, &builder.temp_dir().unwrap())
        .unwrap();

    let diagnostic = results.failures.values().next().unwrap();
    assert!(diagnostic.message.starts_with("source file not found"));
    assert_eq!(results.artifacts.len(), 1);
}

#[test]
fn test_interrupt_abandons_pending_units() {
    let project = create_project(&[("a.py", "a\n"), ("b.py", "b\n"), ("c.py", "c\n")]);
    let out = tempfile::tempdir().unwrap();
    let cancel = Arc::new(AtomicBool::new(false));
    let builder = make_builder(&project, &out, "", "")
        .with_jobs(1)
        .with_cancel_flag(Arc::clone(&cancel));

    let compiler = CancellingCompiler {
        inner: FakeCompiler::default(),
        cancel,
    };
    let err = builder.build(compiler).unwrap_err();

    match err {
        BuildError::Interrupted {
            completed,
            abandoned,
        } => {
            assert_eq!(completed, 1);
            assert_eq!(abandoned, 2);
        }
        other => panic!("expected interruption, got {other:?}"),
    }
    assert!(!builder.target_dir().unwrap().exists());
}

#[test]
fn test_progress_events_cover_every_unit() {
    let project = create_project(&[("a.py", "a\n"), ("b.py", "b\n"), ("c.py", "c\n")]);
    let out = tempfile::tempdir().unwrap();
    let started = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));

    let (s, f) = (Arc::clone(&started), Arc::clone(&failed));
    let builder = make_builder(&project, &out, "", "").with_progress(Arc::new(move |event: ProgressEvent<'_>| {
        match event {
            ProgressEvent::Started { .. } => {
                s.fetch_add(1, Ordering::SeqCst);
            }
            ProgressEvent::Finished { ok: false, .. } => {
                f.fetch_add(1, Ordering::SeqCst);
            }
            ProgressEvent::Finished { .. } => {}
        }
    }));

    builder.build(FakeCompiler::failing(&["c"])).unwrap();

    assert_eq!(started.load(Ordering::SeqCst), 3);
    assert_eq!(failed.load(Ordering::SeqCst), 1);
}

#[test]
fn test_no_file_vanishes() {
    let project = create_project(&[
        ("main.py", "m\n"),
        ("setup.py", "setup()\n"),
        ("_private.py", "p\n"),
        ("pyshield.toml", "[build]\n"),
        ("pkg/__init__.py", ""),
        ("pkg/core.py", "c\n"),
        ("pkg/broken.py", "x\n"),
        ("pkg/config.py", "cfg\n"),
        ("pkg/assets/logo.png", "png"),
        ("pkg/fast.pyx", "cdef int x\n"),
        ("tests/test_core.py", "t\n"),
        ("tests/fixtures/data.json", "{}"),
        ("venv/lib/site.py", "v\n"),
        ("__pycache__/main.cpython-312.pyc", "bytecode"),
    ]);
    let out = tempfile::tempdir().unwrap();
    let builder = make_builder(&project, &out, "tests", "pkg/config.py");

    let ctx = builder.build(FakeCompiler::failing(&["pkg.broken"])).unwrap();
    let target = builder.target_dir().unwrap();

    let expected = set(&[
        "main.so",
        "pkg/__init__.py",
        "pkg/core.so",
        "pkg/broken.py",
        "pkg/config.py",
        "pkg/assets/logo.png",
        "pkg/fast.pyx",
        "tests/test_core.py",
        "tests/fixtures/data.json",
    ]);
    assert_eq!(paths(&target), expected);
    assert_eq!(ctx.stats.files_written, expected.len());
    assert!(ctx.assembly.failures.is_empty());

    let reasons: Vec<_> = ctx
        .assembly
        .preserved_sources
        .iter()
        .map(|p| (p.relative.clone(), p.reason.clone()))
        .collect();
    assert_eq!(reasons.len(), 2);
    assert_eq!(reasons[0].0, PathBuf::from("pkg/broken.py"));
    assert_eq!(reasons[0].1, PreserveReason::CompileFailed { line: Some(12) });
    assert_eq!(reasons[1].0, PathBuf::from("pkg/config.py"));
}

#[test]
fn test_rebuild_is_byte_identical() {
    let project = create_project(&[
        ("app/__init__.py", ""),
        ("app/main.py", "print('hi')\n"),
        ("app/bad.py", "def (\n"),
        ("app/static/site.css", "body {}"),
        ("docs/index.md", "# docs"),
    ]);
    let out = tempfile::tempdir().unwrap();
    let builder = make_builder(&project, &out, "docs", "");

    builder.build(FakeCompiler::failing(&["app.bad"])).unwrap();
    let first = tree_digest(&builder.target_dir().unwrap());
    builder.build(FakeCompiler::failing(&["app.bad"])).unwrap();
    let second = tree_digest(&builder.target_dir().unwrap());

    assert_eq!(first, second);
}

#[test]
fn test_output_inside_project_is_not_rescanned() {
    let project = create_project(&[("main.py", "m\n")]);
    let builder = Builder::new(project.path())
        .unwrap()
        .with_output_dir(project.path().join("dist"));

    builder.build(FakeCompiler::default()).unwrap();
    let ctx = builder.build(FakeCompiler::default()).unwrap();

    assert_eq!(ctx.plan.units.len(), 1);
    assert!(ctx.plan.resources.is_empty());
    assert_eq!(ctx.status, BuildStatus::Success);
}

#[test]
fn test_clean_removes_previous_output() {
    let project = create_project(&[("main.py", "m\n")]);
    let out = tempfile::tempdir().unwrap();
    let builder = make_builder(&project, &out, "", "");

    builder.build(FakeCompiler::default()).unwrap();
    let stale = builder.target_dir().unwrap().join("stale.txt");
    fs::write(&stale, "old").unwrap();

    builder.clean().unwrap();
    assert!(!builder.target_dir().unwrap().exists());
    assert!(!builder.temp_dir().unwrap().exists());

    let clean_builder = make_builder(&project, &out, "", "").with_config(BuildConfig {
        output_dir: out.path().to_path_buf(),
        clean: true,
        ..BuildConfig::default()
    });
    fs::create_dir_all(stale.parent().unwrap()).unwrap();
    fs::write(&stale, "old").unwrap();
    clean_builder.build(FakeCompiler::default()).unwrap();
    assert!(!stale.exists());
}

#[test]
fn test_unmatched_exclusions_are_warnings() {
    let project = create_project(&[("main.py", "m\n")]);
    let out = tempfile::tempdir().unwrap();
    let builder = make_builder(&project, &out, "docs", "nope.py");

    let ctx = builder.build(FakeCompiler::default()).unwrap();

    assert_eq!(ctx.status, BuildStatus::SuccessWithWarnings);
    assert_eq!(ctx.plan.warnings.len(), 2);
    assert_eq!(ctx.results.failures.len(), 0);
}

#[test]
fn test_empty_project_builds_nothing() {
    let project = create_project(&[("README.md", "hello")]);
    let out = tempfile::tempdir().unwrap();
    let builder = make_builder(&project, &out, "", "");

    let ctx = builder.build(FakeCompiler::default()).unwrap();

    assert_eq!(ctx.stats.total_units, 0);
    assert_eq!(ctx.status, BuildStatus::Success);
    assert!(builder.target_dir().unwrap().join("README.md").is_file());
}

#[test]
fn test_output_inside_preserved_dir_is_not_copied_back() {
    let project = create_project(&[
        ("main.py", "m\n"),
        ("app/tool.py", "t\n"),
        ("app/config.json", "{}"),
    ]);
    let builder = Builder::new(project.path())
        .unwrap()
        .with_rules(RuleValidator::validate("app", "").unwrap())
        .with_output_dir(project.path().join("app/out"));

    let first = builder.build(FakeCompiler::default()).unwrap();
    let digest = tree_digest(&builder.target_dir().unwrap());
    let second = builder.build(FakeCompiler::default()).unwrap();
    let third = builder.build(FakeCompiler::default()).unwrap();

    assert_eq!(first.stats.files_written, 3);
    assert_eq!(second.stats.files_written, 3);
    assert_eq!(third.stats.files_written, 3);
    assert_eq!(tree_digest(&builder.target_dir().unwrap()), digest);
}

#[test]
fn test_cancel_after_last_dispatch_keeps_build() {
    let project = create_project(&[("only.py", "o\n")]);
    let out = tempfile::tempdir().unwrap();
    let cancel = Arc::new(AtomicBool::new(false));
    let builder = make_builder(&project, &out, "", "")
        .with_jobs(1)
        .with_cancel_flag(Arc::clone(&cancel));

    let compiler = CancellingCompiler {
        inner: FakeCompiler::default(),
        cancel: Arc::clone(&cancel),
    };
    let ctx = builder.build(compiler).unwrap();

    assert!(cancel.load(Ordering::SeqCst));
    assert!(!ctx.results.interrupted);
    assert!(ctx.results.abandoned.is_empty());
    assert_eq!(ctx.stats.compiled_units, 1);
    assert!(builder.target_dir().unwrap().join("only.so").is_file());
}

#[cfg(unix)]
#[test]
fn test_symlinked_dir_outside_project_is_reported() {
    let project = create_project(&[("main.py", "m\n")]);
    let shared = create_project(&[("helper.py", "h\n"), ("data.json", "{}")]);
    std::os::unix::fs::symlink(shared.path(), project.path().join("shared")).unwrap();
    let out = tempfile::tempdir().unwrap();
    let builder = make_builder(&project, &out, "", "");

    let ctx = builder.build(FakeCompiler::default()).unwrap();

    assert_eq!(ctx.status, BuildStatus::SuccessWithWarnings);
    assert_eq!(ctx.plan.warnings.len(), 1);
    assert!(ctx.plan.warnings[0].path.ends_with("shared"));

    let summary = BuildSummary::from_context(&ctx);
    assert!(summary.has_warnings());
    assert_eq!(summary.planning_warnings.len(), 1);
}
