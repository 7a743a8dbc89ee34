//! Build command - compile a Python project into extension modules

use crate::commands::{exclusion_rules, open_project};
use crate::report::BuildReporter;
use anyhow::{Context, Result};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use pyshield_build::{
    BuildConfig, BuildSummary, CythonCompiler, ProgressCallback, ProgressEvent, Toolchain,
};
use pyshield_config::Config;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Build command arguments
#[derive(Default)]
pub struct BuildArgs {
    /// Project directory
    pub project: PathBuf,
    /// Output root
    pub output: Option<PathBuf>,
    /// Number of parallel jobs
    pub jobs: Option<usize>,
    /// Comma-separated directory exclusions, possibly repeated
    pub exclude_dirs: Vec<String>,
    /// Comma-separated file exclusions, possibly repeated
    pub exclude_files: Vec<String>,
    /// Remove previous output first
    pub clean: bool,
    /// JSON output
    pub json: bool,
    /// Quiet output (warnings and errors only)
    pub quiet: bool,
    /// Disable colors
    pub no_color: bool,
}

/// Run the build command
pub fn run(args: BuildArgs, cancel: Arc<AtomicBool>) -> Result<()> {
    let (builder, config) = open_project(&args.project)?;
    let rules = exclusion_rules(&config, &args.exclude_dirs, &args.exclude_files)?;

    let build_config = BuildConfig {
        output_dir: args
            .output
            .clone()
            .or_else(|| config.output_dir().map(PathBuf::from))
            .unwrap_or_else(|| BuildConfig::default().output_dir),
        jobs: args.jobs.or(config.jobs()).unwrap_or(0),
        clean: args.clean || config.clean(),
        ..BuildConfig::default()
    };
    debug!(
        output = %build_config.output_dir.display(),
        jobs = build_config.jobs,
        clean = build_config.clean,
        config_file = config.has_config_file(),
        "resolved build settings"
    );

    let compiler = CythonCompiler::detect(toolchain(&config))
        .context("Cannot set up the Cython toolchain")?;

    let show_progress = !args.json && !args.quiet;
    let progress = ProgressBar::hidden();
    let mut builder = builder
        .with_rules(rules)
        .with_config(build_config)
        .with_cancel_flag(cancel);
    if show_progress {
        builder = builder.with_progress(progress_callback(&progress));
    }

    let scan_start = Instant::now();
    let plan = builder.plan().context("Failed to scan project")?;
    let scan_time = scan_start.elapsed();

    if show_progress {
        progress.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        progress.set_length(plan.units.len() as u64);
        progress.set_style(bar_style());
        println!(
            "{} {} ({} modules)",
            "Compiling".green().bold(),
            builder.project_name(),
            plan.units.len()
        );
    }

    let result = builder.execute(plan, &compiler);
    progress.finish_and_clear();
    let mut context = result.context("Build failed")?;
    context.stats.scan_time = scan_time;
    context.stats.total_time += scan_time;

    let summary = BuildSummary::from_context(&context);
    if args.json {
        println!("{}", summary.to_json()?);
    } else {
        BuildReporter::new(args.quiet)
            .with_no_color(args.no_color)
            .report(&summary);
    }

    Ok(())
}

/// Toolchain from configuration, falling back to defaults per field
fn toolchain(config: &Config) -> Toolchain {
    let defaults = Toolchain::default();
    Toolchain {
        cython: config.cython().map(PathBuf::from).unwrap_or(defaults.cython),
        cc: config.cc().map(PathBuf::from).unwrap_or(defaults.cc),
        python: config.python().map(PathBuf::from).unwrap_or(defaults.python),
        cflags: config.cflags().map(<[String]>::to_vec).unwrap_or(defaults.cflags),
    }
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .map(|style| style.progress_chars("=> "))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
}

fn progress_callback(bar: &ProgressBar) -> ProgressCallback {
    let bar = bar.clone();
    Arc::new(move |event: ProgressEvent<'_>| match event {
        ProgressEvent::Started { unit } => bar.set_message(unit.module.clone()),
        ProgressEvent::Finished { unit, ok } => {
            if !ok {
                bar.println(format!(
                    "  {} {}",
                    "failed".yellow().bold(),
                    unit.relative.display()
                ));
            }
            bar.inc(1);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pyshield_config::{CompilerSection, ProjectConfig};

    #[test]
    fn test_build_args_default() {
        let args = BuildArgs::default();
        assert!(args.output.is_none());
        assert!(args.jobs.is_none());
        assert!(!args.clean);
        assert!(!args.json);
    }

    #[test]
    fn test_toolchain_defaults_fill_gaps() {
        let config = Config {
            project: ProjectConfig {
                compiler: Some(CompilerSection {
                    cc: Some(PathBuf::from("clang")),
                    ..CompilerSection::default()
                }),
                ..ProjectConfig::default()
            },
            config_file: None,
        };
        let toolchain = toolchain(&config);
        assert_eq!(toolchain.cc, PathBuf::from("clang"));
        assert_eq!(toolchain.cython, PathBuf::from("cython"));
        assert_eq!(toolchain.cflags, vec!["-O2".to_string()]);
    }
}
