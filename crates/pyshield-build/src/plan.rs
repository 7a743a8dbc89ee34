//! Build plan: the contract between scanning and compilation
use crate::classify::to_slash;
use crate::error::PlanningWarning;
use crate::rules::{Rule, ROOT_PACKAGE};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// One source file selected for compilation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompileUnit {
    /// Absolute path of the source file
    pub source: PathBuf,
    /// Path relative to the project root
    pub relative: PathBuf,
    /// Dotted module name, e.g. `pkg.sub.mod`
    pub module: String,
}

impl CompileUnit {
    /// Create a unit for a file below `root`
    pub fn new(root: &Path, relative: impl Into<PathBuf>) -> Self {
        let relative = relative.into();
        Self {
            source: root.join(&relative),
            module: module_name(&relative),
            relative,
        }
    }

    /// Final segment of the module name
    pub fn short_name(&self) -> &str {
        self.module.rsplit('.').next().unwrap_or(&self.module)
    }
}

/// A `.py` file kept as source because a user rule selected it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreservedFile {
    pub relative: PathBuf,
    pub rule: Rule,
}

/// Immutable result of scanning a project
#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildPlan {
    /// Canonical project root
    pub root: PathBuf,
    /// Units to compile, sorted by relative path
    pub units: Vec<CompileUnit>,
    /// Package names, sorted; the root package is `.`
    pub packages: Vec<String>,
    /// Package marker files to copy verbatim
    pub package_markers: Vec<PathBuf>,
    /// Non-source files to copy verbatim
    pub resources: Vec<PathBuf>,
    /// Source files kept uncompiled by a user rule
    pub preserved_files: Vec<PreservedFile>,
    /// User-excluded directories to copy whole
    pub preserved_dirs: Vec<PathBuf>,
    /// Files that could not be planned
    pub warnings: Vec<PlanningWarning>,
}

impl BuildPlan {
    /// Whether there is nothing to compile
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Find the unit for an absolute source path
    pub fn unit_for(&self, source: &Path) -> Option<&CompileUnit> {
        self.units.iter().find(|u| u.source == source)
    }
}

/// Dotted module name for a project-relative `.py` path
pub fn module_name(relative: &Path) -> String {
    to_slash(&relative.with_extension("")).replace('/', ".")
}

/// Dotted package name for a project-relative directory
pub fn package_name(relative_dir: &Path) -> String {
    let name = to_slash(relative_dir).replace('/', ".");
    if name.is_empty() {
        ROOT_PACKAGE.to_string()
    } else {
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_name_joins_segments() {
        assert_eq!(module_name(Path::new("src/utils/helper.py")), "src.utils.helper");
        assert_eq!(module_name(Path::new("a.py")), "a");
    }

    #[test]
    fn test_package_name_root_sentinel() {
        assert_eq!(package_name(Path::new("")), ".");
        assert_eq!(package_name(Path::new("pkg/sub")), "pkg.sub");
    }

    #[test]
    fn test_compile_unit_paths() {
        let unit = CompileUnit::new(Path::new("/proj"), "pkg/b.py");
        assert_eq!(unit.source, PathBuf::from("/proj/pkg/b.py"));
        assert_eq!(unit.module, "pkg.b");
        assert_eq!(unit.short_name(), "b");
    }
}
