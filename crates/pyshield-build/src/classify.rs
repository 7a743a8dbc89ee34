//! File classification
//!
//! Decides what happens to a single file. The policy is an ordered table of
//! checks; the first check that returns a verdict wins. Structural checks
//! (non-source, banned, hidden, excluded directory) come before the user's
//! file rules so a rule can never pull an unsafe file back into compilation.

use crate::rules::{
    DirOrigin, Rule, RuleSet, BANNED_FILES, HIDDEN_PREFIXES, PACKAGE_MARKER, SOURCE_SUFFIX,
};
use serde::Serialize;
use std::path::{Component, Path, PathBuf};

/// Why a file is left out of the build entirely
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DropReason {
    /// Not a `.py` file; handled by the resource copier instead
    NotSource,
    /// A build script such as `setup.py`
    Banned,
    /// Private or hidden module name
    Hidden,
}

/// Verdict for one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Classification {
    /// Compile into a binary artifact
    Compile,
    /// Inside an excluded directory; `dir` is the project-relative directory
    PreserveDir { dir: PathBuf, origin: DirOrigin },
    /// Selected by a user file rule; copied as source
    PreserveFile { rule: Rule },
    /// Not part of the compiled module set
    Drop { reason: DropReason },
}

/// A file as seen by the classifier
#[derive(Debug, Clone)]
pub struct Candidate<'a> {
    /// Path relative to the project root
    pub relative: &'a Path,
    /// Relative path with `/` separators
    pub relative_str: String,
    pub file_name: &'a str,
}

impl<'a> Candidate<'a> {
    /// Build a candidate from a project-relative path
    pub fn new(relative: &'a Path) -> Option<Self> {
        let file_name = relative.file_name()?.to_str()?;
        Some(Self {
            relative,
            relative_str: to_slash(relative),
            file_name,
        })
    }

    fn has_source_suffix(&self) -> bool {
        self.relative.extension().and_then(|e| e.to_str()) == Some(SOURCE_SUFFIX)
    }
}

type Check = fn(&Candidate<'_>, &RuleSet) -> Option<Classification>;

/// The classification policy, in precedence order
const POLICY: &[(&str, Check)] = &[
    ("source-suffix", check_suffix),
    ("banned-file", check_banned),
    ("hidden-file", check_hidden),
    ("excluded-dir", check_excluded_dir),
    ("exact-path", check_exact_path),
    ("glob-suffix", check_glob_suffix),
];

/// Classify a project-relative path against the rule set
pub fn classify(relative: &Path, rules: &RuleSet) -> Classification {
    match Candidate::new(relative) {
        Some(candidate) => classify_candidate(&candidate, rules),
        // Non-UTF-8 names cannot be matched by module names; treat as resources
        None => Classification::Drop {
            reason: DropReason::NotSource,
        },
    }
}

/// Run the policy table over a prepared candidate
pub fn classify_candidate(candidate: &Candidate<'_>, rules: &RuleSet) -> Classification {
    POLICY
        .iter()
        .find_map(|(_, check)| check(candidate, rules))
        .unwrap_or(Classification::Compile)
}

/// Names of the policy steps in evaluation order
pub fn policy_order() -> impl Iterator<Item = &'static str> {
    POLICY.iter().map(|(name, _)| *name)
}

fn check_suffix(candidate: &Candidate<'_>, _: &RuleSet) -> Option<Classification> {
    (!candidate.has_source_suffix()).then_some(Classification::Drop {
        reason: DropReason::NotSource,
    })
}

fn check_banned(candidate: &Candidate<'_>, _: &RuleSet) -> Option<Classification> {
    BANNED_FILES
        .contains(&candidate.file_name)
        .then_some(Classification::Drop {
            reason: DropReason::Banned,
        })
}

fn check_hidden(candidate: &Candidate<'_>, _: &RuleSet) -> Option<Classification> {
    let hidden = candidate.file_name.starts_with(HIDDEN_PREFIXES)
        && candidate.file_name != PACKAGE_MARKER;
    hidden.then_some(Classification::Drop {
        reason: DropReason::Hidden,
    })
}

fn check_excluded_dir(candidate: &Candidate<'_>, rules: &RuleSet) -> Option<Classification> {
    excluded_ancestor(candidate.relative, rules)
        .map(|(dir, origin)| Classification::PreserveDir { dir, origin })
}

fn check_exact_path(candidate: &Candidate<'_>, rules: &RuleSet) -> Option<Classification> {
    rules
        .rules
        .iter()
        .find(|r| matches!(r, Rule::ExactPath(p) if *p == candidate.relative_str))
        .map(|rule| Classification::PreserveFile { rule: rule.clone() })
}

fn check_glob_suffix(candidate: &Candidate<'_>, rules: &RuleSet) -> Option<Classification> {
    rules
        .rules
        .iter()
        .find(|r| matches!(r, Rule::GlobSuffix(name) if name == candidate.file_name))
        .map(|rule| Classification::PreserveFile { rule: rule.clone() })
}

/// Outermost excluded directory containing the file at `relative`
///
/// Only directory segments count; a file that happens to share a name with an
/// excluded directory is not excluded.
pub fn excluded_ancestor(relative: &Path, rules: &RuleSet) -> Option<(PathBuf, DirOrigin)> {
    excluded_prefix(relative.parent()?, rules)
}

/// Outermost excluded directory among the segments of a relative directory path
pub fn excluded_prefix(dir: &Path, rules: &RuleSet) -> Option<(PathBuf, DirOrigin)> {
    let mut prefix = PathBuf::new();
    for component in dir.components() {
        let Component::Normal(segment) = component else {
            continue;
        };
        prefix.push(segment);
        if let Some(origin) = segment.to_str().and_then(|s| rules.dir_origin(s)) {
            return Some((prefix, origin));
        }
    }
    None
}

/// `/`-joined form of a relative path
pub fn to_slash(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::RuleValidator;
    use pretty_assertions::assert_eq;

    fn rules(dirs: &str, files: &str) -> RuleSet {
        RuleValidator::validate(dirs, files).unwrap()
    }

    #[test]
    fn test_plain_module_compiles() {
        assert_eq!(
            classify(Path::new("pkg/mod.py"), &RuleSet::new()),
            Classification::Compile
        );
    }

    #[test]
    fn test_non_source_is_dropped() {
        assert_eq!(
            classify(Path::new("data/config.json"), &RuleSet::new()),
            Classification::Drop {
                reason: DropReason::NotSource
            }
        );
        assert_eq!(
            classify(Path::new("ext/fast.pyx"), &RuleSet::new()),
            Classification::Drop {
                reason: DropReason::NotSource
            }
        );
    }

    #[test]
    fn test_setup_script_is_banned_even_if_user_rule_matches() {
        assert_eq!(
            classify(Path::new("setup.py"), &rules("", "*setup.py")),
            Classification::Drop {
                reason: DropReason::Banned
            }
        );
    }

    #[test]
    fn test_hidden_and_private_dropped() {
        for path in ["_private.py", "pkg/.hidden.py", "__main__.py"] {
            assert_eq!(
                classify(Path::new(path), &RuleSet::new()),
                Classification::Drop {
                    reason: DropReason::Hidden
                },
                "{}",
                path
            );
        }
    }

    #[test]
    fn test_package_marker_never_dropped_as_hidden() {
        assert_eq!(
            classify(Path::new("pkg/__init__.py"), &RuleSet::new()),
            Classification::Compile
        );
        assert_eq!(
            classify(Path::new("pkg/__init__.py"), &rules("", "*__init__.py")),
            Classification::PreserveFile {
                rule: Rule::GlobSuffix("__init__.py".to_string())
            }
        );
    }

    #[test]
    fn test_excluded_dir_beats_file_rules() {
        assert_eq!(
            classify(Path::new("app/tests/test_a.py"), &rules("tests", "app/tests/test_a.py")),
            Classification::PreserveDir {
                dir: PathBuf::from("app/tests"),
                origin: DirOrigin::User
            }
        );
    }

    #[test]
    fn test_default_excluded_dir() {
        assert_eq!(
            classify(Path::new("venv/lib/site.py"), &RuleSet::new()),
            Classification::PreserveDir {
                dir: PathBuf::from("venv"),
                origin: DirOrigin::Default
            }
        );
    }

    #[test]
    fn test_file_named_like_excluded_dir_is_not_excluded() {
        assert_eq!(
            classify(Path::new("pkg/tests.py"), &rules("tests.py", "")),
            Classification::Compile
        );
    }

    #[test]
    fn test_exact_path_before_glob() {
        let set = rules("", "*b.py,pkg/b.py");
        assert_eq!(
            classify(Path::new("pkg/b.py"), &set),
            Classification::PreserveFile {
                rule: Rule::ExactPath("pkg/b.py".to_string())
            }
        );
        assert_eq!(
            classify(Path::new("other/b.py"), &set),
            Classification::PreserveFile {
                rule: Rule::GlobSuffix("b.py".to_string())
            }
        );
    }

    #[test]
    fn test_exact_path_only_matches_full_relative_path() {
        assert_eq!(
            classify(Path::new("nested/config.py"), &rules("", "config.py")),
            Classification::Compile
        );
    }

    #[test]
    fn test_policy_order_is_stable() {
        assert_eq!(
            policy_order().collect::<Vec<_>>(),
            vec![
                "source-suffix",
                "banned-file",
                "hidden-file",
                "excluded-dir",
                "exact-path",
                "glob-suffix"
            ]
        );
    }
}
