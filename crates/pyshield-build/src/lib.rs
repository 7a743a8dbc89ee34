//! pyshield build engine
//!
//! Turns a tree of Python modules into compiled extension modules:
//! - Exclusion rule validation
//! - File classification and project scanning
//! - Package inference from `__init__.py` markers
//! - Isolated, parallel compilation with source fallback
//! - Output tree assembly

pub mod assembler;
pub mod builder;
pub mod classify;
pub mod compiler;
pub mod error;
pub mod orchestrator;
pub mod plan;
pub mod rules;
pub mod scanner;
pub mod summary;

// Re-export main types
pub use assembler::{AssemblyReport, OutputAssembler, PreserveReason, PreservedSource};
pub use builder::{BuildConfig, BuildContext, BuildStats, BuildStatus, Builder};
pub use classify::{classify, Classification, DropReason};
pub use compiler::{
    CompileRequest, Compiler, CompilerDirectives, CythonCompiler, Diagnostic, Toolchain,
};
pub use error::{BuildError, BuildResult, CopyFailure, PatternError, PlanningWarning, Stage};
pub use orchestrator::{
    CompileOrchestrator, CompileOutcome, CompileResults, CompiledArtifact, ProgressCallback,
    ProgressEvent, UnitState,
};
pub use plan::{BuildPlan, CompileUnit, PreservedFile};
pub use rules::{DirOrigin, Rule, RuleSet, RuleValidator};
pub use scanner::{PackageResolver, TreeScanner};
pub use summary::{BuildSummary, FailedUnit};
