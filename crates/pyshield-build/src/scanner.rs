//! Project tree scanning and package inference
use crate::classify::{classify, excluded_ancestor, excluded_prefix, Classification, DropReason};
use crate::error::{BuildError, BuildResult, PlanningWarning};
use crate::plan::{package_name, BuildPlan, CompileUnit, PreservedFile};
use crate::rules::{DirOrigin, Rule, RuleSet, CONFIG_FILE, PACKAGE_MARKER};

use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

/// Derives namespace packages from the directories holding a package marker
#[derive(Debug, Default)]
pub struct PackageResolver {
    marker_dirs: HashSet<PathBuf>,
    packages: BTreeSet<String>,
}

impl PackageResolver {
    /// Create a resolver over the project-relative directories that contain a marker
    pub fn new(marker_dirs: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            marker_dirs: marker_dirs.into_iter().collect(),
            packages: BTreeSet::new(),
        }
    }

    /// Register every marked directory between `file` and the project root
    ///
    /// The walk is iterative and bounded by the number of segments in `file`,
    /// so it always terminates at the root.
    pub fn register(&mut self, file: &Path) {
        let ceiling = file.components().count();
        let mut dir = file.parent();
        let mut steps = 0;

        while let Some(current) = dir {
            if steps > ceiling {
                break;
            }
            if self.marker_dirs.contains(current) {
                self.packages.insert(package_name(current));
            }
            dir = current.parent();
            steps += 1;
        }
    }

    /// Sorted package names
    pub fn into_packages(self) -> Vec<String> {
        self.packages.into_iter().collect()
    }
}

/// Walks a project once and produces its [`BuildPlan`]
pub struct TreeScanner<'a> {
    root: PathBuf,
    rules: &'a RuleSet,
    pruned: Vec<PathBuf>,
}

impl<'a> TreeScanner<'a> {
    /// Create a scanner for an existing project root
    pub fn new(root: impl Into<PathBuf>, rules: &'a RuleSet) -> Self {
        Self {
            root: root.into(),
            rules,
            pruned: Vec::new(),
        }
    }

    /// Skip an absolute directory during the walk (e.g. an output root inside the project)
    pub fn with_pruned(mut self, dir: impl Into<PathBuf>) -> Self {
        self.pruned.push(dir.into());
        self
    }

    /// Scan the project tree
    pub fn scan(&self) -> BuildResult<BuildPlan> {
        info!(root = %self.root.display(), "scanning project");

        let mut state = ScanState::default();

        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| !self.is_pruned(entry) && !self.is_default_excluded(entry));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) if err.depth() == 0 => {
                    let error = err
                        .into_io_error()
                        .unwrap_or_else(|| std::io::Error::other("unreadable project root"));
                    return Err(BuildError::io(&self.root, error));
                }
                Err(err) => {
                    let path = err.path().map(Path::to_path_buf).unwrap_or_default();
                    warn!(path = %path.display(), error = %err, "skipping unreadable entry");
                    state
                        .warnings
                        .push(PlanningWarning::new(path, format!("unreadable: {}", err)));
                    continue;
                }
            };

            if entry.depth() == 0 {
                continue;
            }

            if entry.file_type().is_dir() {
                self.visit_dir(&entry, &mut state);
            } else if let Some(relative) = self.resolve_file(&entry, &mut state) {
                self.visit_file(relative, &mut state);
            }
        }

        Ok(self.finish(state))
    }

    fn is_pruned(&self, entry: &DirEntry) -> bool {
        self.pruned.iter().any(|p| p == entry.path())
    }

    /// Default-excluded directories hold nothing that reaches the output
    fn is_default_excluded(&self, entry: &DirEntry) -> bool {
        if entry.depth() == 0 || !entry.file_type().is_dir() {
            return false;
        }
        entry
            .file_name()
            .to_str()
            .and_then(|name| self.rules.dir_origin(name))
            == Some(DirOrigin::Default)
    }

    fn visit_dir(&self, entry: &DirEntry, state: &mut ScanState) {
        let Ok(relative) = entry.path().strip_prefix(&self.root) else {
            return;
        };
        if let Some((prefix, DirOrigin::User)) = excluded_prefix(relative, self.rules) {
            if prefix == relative {
                debug!(dir = %relative.display(), "preserving excluded directory");
                if let Some(name) = relative.file_name().and_then(|n| n.to_str()) {
                    state.matched_dirs.insert(name.to_string());
                }
                state.preserved_dirs.push(relative.to_path_buf());
            }
        }
    }

    /// Project-relative path of a file entry, or `None` if it cannot be planned
    fn resolve_file(&self, entry: &DirEntry, state: &mut ScanState) -> Option<PathBuf> {
        let path = entry.path();

        if entry.path_is_symlink() {
            match fs::canonicalize(path) {
                Ok(target) if target.is_dir() => {
                    let reason = if target.starts_with(&self.root) {
                        format!(
                            "symlinked directory not followed; contents planned at {}",
                            target.display()
                        )
                    } else {
                        format!(
                            "resolves outside project root to {}; directory contents dropped",
                            target.display()
                        )
                    };
                    warn!(path = %path.display(), "{}", reason);
                    state.warnings.push(PlanningWarning::new(path, reason));
                    return None;
                }
                Ok(target) if !target.starts_with(&self.root) => {
                    warn!(path = %path.display(), "symlink resolves outside project root");
                    state.warnings.push(PlanningWarning::new(
                        path,
                        format!("resolves outside project root to {}", target.display()),
                    ));
                    return None;
                }
                Ok(_) => {}
                Err(e) => {
                    state
                        .warnings
                        .push(PlanningWarning::new(path, format!("dangling symlink: {}", e)));
                    return None;
                }
            }
        } else if !entry.file_type().is_file() {
            return None;
        }

        match path.strip_prefix(&self.root) {
            Ok(relative) => Some(relative.to_path_buf()),
            Err(_) => {
                state
                    .warnings
                    .push(PlanningWarning::new(path, "not inside the project root"));
                None
            }
        }
    }

    fn visit_file(&self, relative: PathBuf, state: &mut ScanState) {
        let file_name = relative.file_name().and_then(|n| n.to_str()).unwrap_or("");
        let is_marker = file_name == PACKAGE_MARKER;

        if is_marker {
            if let Some(parent) = relative.parent() {
                state.marker_dirs.push(parent.to_path_buf());
            }
        }

        match classify(&relative, self.rules) {
            Classification::Compile if is_marker => {
                state.package_sources.push(relative.clone());
                state.package_markers.push(relative);
            }
            Classification::Compile => {
                debug!(file = %relative.display(), "compile unit");
                state.package_sources.push(relative.clone());
                state.units.push(CompileUnit::new(&self.root, relative));
            }
            Classification::PreserveFile { rule } => {
                debug!(file = %relative.display(), rule = %rule, "preserving source");
                state.matched_rules.insert(rule.clone());
                state.preserved_files.push(PreservedFile { relative, rule });
            }
            Classification::PreserveDir { .. } => {}
            Classification::Drop {
                reason: DropReason::NotSource,
            } => {
                if relative.as_os_str() == CONFIG_FILE {
                    return;
                }
                if excluded_ancestor(&relative, self.rules).is_none() {
                    state.resources.push(relative);
                }
            }
            Classification::Drop { reason } => {
                debug!(file = %relative.display(), ?reason, "dropped");
            }
        }
    }

    fn finish(&self, mut state: ScanState) -> BuildPlan {
        let mut resolver = PackageResolver::new(state.marker_dirs);
        for file in &state.package_sources {
            resolver.register(file);
        }
        let packages = resolver.into_packages();

        for path in self.rules.exact_paths() {
            if !state.matched_rules.contains(&Rule::ExactPath(path.to_string())) {
                state
                    .warnings
                    .push(PlanningWarning::new(path, "exclusion matched no file"));
            }
        }
        for dir in &self.rules.user_dirs {
            if !state.matched_dirs.contains(dir) {
                state
                    .warnings
                    .push(PlanningWarning::new(dir, "excluded directory not found"));
            }
        }

        state.units.sort_by(|a, b| a.relative.cmp(&b.relative));
        state.package_markers.sort();
        state.resources.sort();
        state.preserved_files.sort_by(|a, b| a.relative.cmp(&b.relative));
        state.preserved_dirs.sort();

        info!(
            units = state.units.len(),
            packages = packages.len(),
            resources = state.resources.len(),
            preserved = state.preserved_files.len() + state.preserved_dirs.len(),
            "scan complete"
        );

        BuildPlan {
            root: self.root.clone(),
            units: state.units,
            packages,
            package_markers: state.package_markers,
            resources: state.resources,
            preserved_files: state.preserved_files,
            preserved_dirs: state.preserved_dirs,
            warnings: state.warnings,
        }
    }
}

#[derive(Default)]
struct ScanState {
    units: Vec<CompileUnit>,
    package_markers: Vec<PathBuf>,
    package_sources: Vec<PathBuf>,
    marker_dirs: Vec<PathBuf>,
    resources: Vec<PathBuf>,
    preserved_files: Vec<PreservedFile>,
    preserved_dirs: Vec<PathBuf>,
    matched_rules: HashSet<Rule>,
    matched_dirs: HashSet<String>,
    warnings: Vec<PlanningWarning>,
}
