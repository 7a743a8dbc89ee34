//! Plan command - show what a build would do without compiling

use crate::commands::{exclusion_rules, open_project};
use crate::report::BuildReporter;
use anyhow::{Context, Result};
use std::path::PathBuf;

/// Plan command arguments
#[derive(Default)]
pub struct PlanArgs {
    pub project: PathBuf,
    /// Output root, pruned from the scan if inside the project
    pub output: Option<PathBuf>,
    pub exclude_dirs: Vec<String>,
    pub exclude_files: Vec<String>,
    pub json: bool,
    pub no_color: bool,
}

/// Run the plan command
pub fn run(args: PlanArgs) -> Result<()> {
    let (builder, config) = open_project(&args.project)?;
    let rules = exclusion_rules(&config, &args.exclude_dirs, &args.exclude_files)?;

    let mut builder = builder.with_rules(rules);
    if let Some(output) = args.output.clone().or_else(|| config.output_dir().map(PathBuf::from)) {
        builder = builder.with_output_dir(output);
    }

    let plan = builder.plan().context("Failed to scan project")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else {
        BuildReporter::default()
            .with_no_color(args.no_color)
            .report_plan(&plan);
    }
    Ok(())
}
