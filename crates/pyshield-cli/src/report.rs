//! Build reporter - human-readable build results

use colored::*;
use pyshield_build::{BuildPlan, BuildSummary, PreserveReason};
use std::fmt::Write as _;

/// Formats build summaries and plans for the terminal
pub struct BuildReporter {
    /// Errors and warnings only
    quiet: bool,
    /// Disable colored output
    no_color: bool,
}

impl Default for BuildReporter {
    fn default() -> Self {
        Self::new(false)
    }
}

impl BuildReporter {
    /// Create a new reporter
    pub fn new(quiet: bool) -> Self {
        Self {
            quiet,
            no_color: false,
        }
    }

    /// Disable colored output
    pub fn with_no_color(mut self, no_color: bool) -> Self {
        self.no_color = no_color;
        self
    }

    /// Print the result of a completed build
    pub fn report(&self, summary: &BuildSummary) {
        self.with_colors(|| print!("{}", self.render(summary)));
    }

    /// Print a dry-run plan
    pub fn report_plan(&self, plan: &BuildPlan) {
        self.with_colors(|| print!("{}", render_plan(plan)));
    }

    fn with_colors(&self, print: impl FnOnce()) {
        if self.no_color {
            colored::control::set_override(false);
        }
        print();
        if self.no_color {
            colored::control::unset_override();
        }
    }

    /// Full report text
    pub fn render(&self, summary: &BuildSummary) -> String {
        let mut out = String::new();
        if !self.quiet {
            render_totals(&mut out, summary);
        }
        if summary.has_warnings() {
            render_warnings(&mut out, summary);
        }
        out
    }
}

fn render_totals(out: &mut String, summary: &BuildSummary) {
    let headline = if summary.has_warnings() {
        "Build finished with warnings".yellow().bold()
    } else {
        "Build succeeded".green().bold()
    };
    let _ = writeln!(
        out,
        "{} in {:.2}s",
        headline,
        summary.timings.total_ms as f64 / 1000.0
    );
    let _ = writeln!(out, "{}", "─".repeat(50));
    let _ = writeln!(
        out,
        "  Modules:   {}/{} compiled",
        summary.compiled, summary.total_units
    );
    let _ = writeln!(out, "  Packages:  {}", summary.packages.len());
    let _ = writeln!(out, "  Preserved: {} source file(s)", summary.preserved.len());
    let _ = writeln!(out, "  Files:     {}", summary.files_written);
    let _ = writeln!(out, "  Output:    {}", summary.output.display());
    if !summary.preserved.is_empty() {
        let _ = writeln!(out, "  Kept as source:");
        for source in &summary.preserved {
            let _ = writeln!(
                out,
                "    {} ({})",
                source.relative.display(),
                preserve_reason(&source.reason)
            );
        }
    }
    let _ = writeln!(out, "{}", "─".repeat(50));
}

fn render_warnings(out: &mut String, summary: &BuildSummary) {
    let _ = writeln!(out, "\n{}", "WARNINGS".yellow().bold());

    if !summary.failed.is_empty() {
        let _ = writeln!(
            out,
            "\n{} module(s) failed to compile and were kept as source:",
            summary.failed.len()
        );
        for failure in &summary.failed {
            let location = match failure.line {
                Some(line) => format!("{}:{}", failure.file.display(), line),
                None => failure.file.display().to_string(),
            };
            let _ = writeln!(out, "\n  {} {}", "✗".red().bold(), location.bold());
            for line in failure.message.lines() {
                let _ = writeln!(out, "      {}", line.dimmed());
            }
        }
    }

    if !summary.planning_warnings.is_empty() {
        let _ = writeln!(out, "\nPlanning:");
        for warning in &summary.planning_warnings {
            let _ = writeln!(out, "  {} {}", "!".yellow().bold(), warning);
        }
    }

    if !summary.copy_failures.is_empty() {
        let _ = writeln!(out, "\nCopy failures:");
        for failure in &summary.copy_failures {
            let _ = writeln!(out, "  {} {}", "!".red().bold(), failure);
        }
    }

    if !summary.failed.is_empty() {
        let _ = writeln!(
            out,
            "\n{}",
            "Fix the errors above and rebuild to compile these modules.".cyan()
        );
    }
}

fn render_plan(plan: &BuildPlan) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} {}", "Project".bold(), plan.root.display());

    let _ = writeln!(out, "\n{} ({})", "Compile".green().bold(), plan.units.len());
    for unit in &plan.units {
        let _ = writeln!(out, "  {:<40} {}", unit.module, unit.relative.display());
    }

    let _ = writeln!(out, "\n{} ({})", "Packages".bold(), plan.packages.len());
    for package in &plan.packages {
        let _ = writeln!(out, "  {}", package);
    }

    if !plan.preserved_files.is_empty() || !plan.preserved_dirs.is_empty() {
        let _ = writeln!(out, "\n{}", "Kept as source".yellow().bold());
        for file in &plan.preserved_files {
            let _ = writeln!(out, "  {:<40} rule {}", file.relative.display(), file.rule);
        }
        for dir in &plan.preserved_dirs {
            let _ = writeln!(out, "  {}/", dir.display());
        }
    }

    let copied = plan.resources.len() + plan.package_markers.len();
    let _ = writeln!(out, "\n{} ({})", "Copied verbatim".bold(), copied);
    for path in plan.package_markers.iter().chain(&plan.resources) {
        let _ = writeln!(out, "  {}", path.display());
    }

    if !plan.warnings.is_empty() {
        let _ = writeln!(out, "\n{}", "WARNINGS".yellow().bold());
        for warning in &plan.warnings {
            let _ = writeln!(out, "  {} {}", "!".yellow().bold(), warning);
        }
    }
    out
}

/// Short description of why a source was preserved
pub fn preserve_reason(reason: &PreserveReason) -> String {
    match reason {
        PreserveReason::Rule { rule } => format!("excluded by {}", rule),
        PreserveReason::CompileFailed { line: Some(line) } => {
            format!("compile failed at line {}", line)
        }
        PreserveReason::CompileFailed { line: None } => "compile failed".to_string(),
        PreserveReason::NotCompiled => "not compiled".to_string(),
    }
}
