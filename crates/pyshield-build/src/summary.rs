//! Machine-readable build summary
use crate::assembler::PreservedSource;
use crate::builder::{BuildContext, BuildStatus};
use crate::error::{CopyFailure, PlanningWarning};

use serde::Serialize;
use std::path::PathBuf;

/// One unit that fell back to source
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedUnit {
    /// Project-relative source path
    pub file: PathBuf,
    pub module: String,
    pub line: Option<u32>,
    pub column: Option<u32>,
    /// Compiler output, verbatim
    pub message: String,
    pub context: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Timings {
    pub scan_ms: u64,
    pub compile_ms: u64,
    pub assemble_ms: u64,
    pub total_ms: u64,
}

/// Everything a caller needs to report on a finished build
#[derive(Debug, Clone, Serialize)]
pub struct BuildSummary {
    pub project: PathBuf,
    pub output: PathBuf,
    pub status: BuildStatus,
    pub total_units: usize,
    pub compiled: usize,
    pub packages: Vec<String>,
    pub failed: Vec<FailedUnit>,
    pub preserved: Vec<PreservedSource>,
    pub planning_warnings: Vec<PlanningWarning>,
    pub copy_failures: Vec<CopyFailure>,
    pub files_written: usize,
    pub timings: Timings,
}

impl BuildSummary {
    /// Collect the summary of a completed build
    pub fn from_context(ctx: &BuildContext) -> Self {
        let failed = ctx
            .results
            .failures
            .iter()
            .map(|(source, diagnostic)| FailedUnit {
                file: ctx.relative_source(source).to_path_buf(),
                module: ctx
                    .plan
                    .unit_for(source)
                    .map(|u| u.module.clone())
                    .unwrap_or_default(),
                line: diagnostic.line,
                column: diagnostic.column,
                message: diagnostic.message.clone(),
                context: diagnostic.context.clone(),
            })
            .collect();

        let ms = |d: std::time::Duration| d.as_millis() as u64;

        Self {
            project: ctx.plan.root.clone(),
            output: ctx.assembly.output_dir.clone(),
            status: ctx.status,
            total_units: ctx.stats.total_units,
            compiled: ctx.stats.compiled_units,
            packages: ctx.plan.packages.clone(),
            failed,
            preserved: ctx.assembly.preserved_sources.clone(),
            planning_warnings: ctx.plan.warnings.clone(),
            copy_failures: ctx.assembly.failures.clone(),
            files_written: ctx.stats.files_written,
            timings: Timings {
                scan_ms: ms(ctx.stats.scan_time),
                compile_ms: ms(ctx.stats.compile_time),
                assemble_ms: ms(ctx.stats.assemble_time),
                total_ms: ms(ctx.stats.total_time),
            },
        }
    }

    /// Whether anything needs the user's attention
    pub fn has_warnings(&self) -> bool {
        self.status == BuildStatus::SuccessWithWarnings
    }

    /// Pretty-printed JSON document
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
