use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use colored::*;
use pyshield_build::BuildError;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod report;

/// Exit code after Ctrl-C, matching shell convention for SIGINT
const EXIT_INTERRUPTED: u8 = 130;

/// Compile Python projects into native extension modules.
///
/// pyshield translates every eligible module of a project with Cython,
/// compiles the result with the system C compiler, and assembles an output
/// tree where compiled modules replace their sources. Modules that fail to
/// compile are kept as source so the output always stays importable.
///
/// EXAMPLES:
///     pyshield build myapp                     Compile into build/myapp
///     pyshield build myapp -o dist -t 8        Custom output, 8 jobs
///     pyshield build myapp -P '*_test.py'      Keep matching files as source
///     pyshield plan myapp                      Show what would be compiled
///
/// ENVIRONMENT VARIABLES:
///     PYSHIELD_OUTPUT   Default output directory
///     PYSHIELD_JOBS     Default number of parallel jobs
///     PYSHIELD_CYTHON   Cython executable
///     PYSHIELD_CC       C compiler executable
///     PYSHIELD_PYTHON   Python interpreter used for headers
///     PYSHIELD_JSON     Set to '1' for JSON output by default
///     PYSHIELD_LOG      Log filter (e.g. 'debug', 'pyshield_build=trace')
///     NO_COLOR          Set to disable colored output
#[derive(Parser)]
#[command(name = "pyshield")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a project
    ///
    /// Scans the project, compiles every eligible module in parallel and
    /// writes the output tree to <OUTPUT>/<project name>. Exclusion flags
    /// accept comma-separated lists and may be repeated; they are merged
    /// with the [exclude] section of pyshield.toml.
    ///
    /// File patterns:
    ///     settings.py          Exact path relative to the project root
    ///     pkg/settings.py      Exact nested path
    ///     *_test.py            Any file whose name ends with '_test.py'
    ///
    /// EXAMPLES:
    ///     pyshield build myapp
    ///     pyshield build myapp --clean --output /tmp/out
    ///     pyshield build myapp -D scripts,tools -P 'conf.py,*_dev.py'
    ///     pyshield build myapp --json > summary.json
    #[command(visible_alias = "b")]
    Build {
        /// Path to the project directory
        project: PathBuf,
        /// Output root directory
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
        /// Number of parallel compile jobs (0 = all cores)
        #[arg(long, short = 't')]
        jobs: Option<usize>,
        /// Directories to copy without compiling (comma-separated)
        #[arg(long = "exclude-dir", short = 'D', value_name = "DIRS")]
        exclude_dirs: Vec<String>,
        /// Python files to keep as source (comma-separated patterns)
        #[arg(long = "exclude-py", short = 'P', value_name = "PATTERNS")]
        exclude_files: Vec<String>,
        /// Remove previous output before building
        #[arg(long)]
        clean: bool,
        /// Print the build summary as JSON
        #[arg(long, env = "PYSHIELD_JSON")]
        json: bool,
        /// Quiet output (warnings and errors only)
        #[arg(long, short = 'q')]
        quiet: bool,
    },

    /// Show the build plan without compiling
    ///
    /// Lists the modules that would be compiled, the packages found, and
    /// everything that would be copied or kept as source.
    ///
    /// EXAMPLES:
    ///     pyshield plan myapp
    ///     pyshield plan myapp -P '*b.py' --json
    #[command(visible_alias = "p")]
    Plan {
        /// Path to the project directory
        project: PathBuf,
        /// Output root directory
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
        /// Directories to copy without compiling (comma-separated)
        #[arg(long = "exclude-dir", short = 'D', value_name = "DIRS")]
        exclude_dirs: Vec<String>,
        /// Python files to keep as source (comma-separated patterns)
        #[arg(long = "exclude-py", short = 'P', value_name = "PATTERNS")]
        exclude_files: Vec<String>,
        /// Print the plan as JSON
        #[arg(long, env = "PYSHIELD_JSON")]
        json: bool,
    },

    /// Generate shell completions
    ///
    /// EXAMPLES:
    ///     pyshield completions bash > ~/.bash_completions/pyshield.bash
    ///     pyshield completions zsh > ~/.zfunc/_pyshield
    ///     pyshield completions fish > ~/.config/fish/completions/pyshield.fish
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let cli_config = config::Config::from_env();

    init_tracing(&cli_config, cli.verbose);

    match run(cli, &cli_config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {:#}", "error:".red().bold(), err);
            ExitCode::from(exit_code(&err))
        }
    }
}

fn run(cli: Cli, cli_config: &config::Config) -> Result<()> {
    if cli_config.no_color {
        colored::control::set_override(false);
    }

    match cli.command {
        Commands::Build {
            project,
            output,
            jobs,
            exclude_dirs,
            exclude_files,
            clean,
            json,
            quiet,
        } => {
            let cancel = install_interrupt_handler();
            let args = commands::build::BuildArgs {
                project,
                output,
                jobs,
                exclude_dirs,
                exclude_files,
                clean,
                json,
                quiet,
                no_color: cli_config.no_color,
            };
            commands::build::run(args, cancel)?;
        }
        Commands::Plan {
            project,
            output,
            exclude_dirs,
            exclude_files,
            json,
        } => {
            let args = commands::plan::PlanArgs {
                project,
                output,
                exclude_dirs,
                exclude_files,
                json,
                no_color: cli_config.no_color,
            };
            commands::plan::run(args)?;
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_string();
            generate(shell, &mut cmd, name, &mut io::stdout());
        }
    }

    Ok(())
}

/// Log to stderr so JSON on stdout stays parseable
fn init_tracing(cli_config: &config::Config, verbosity: u8) {
    let filter = cli_config
        .log_filter
        .as_deref()
        .and_then(|directive| EnvFilter::try_new(directive).ok())
        .unwrap_or_else(|| EnvFilter::new(config::Config::default_filter(verbosity)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .with_ansi(!cli_config.no_color)
        .init();
}

/// First Ctrl-C stops dispatching new units; running units finish
fn install_interrupt_handler() -> Arc<AtomicBool> {
    let cancel = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancel);
    ctrlc::set_handler(move || {
        if !flag.swap(true, Ordering::SeqCst) {
            eprintln!(
                "\n{} waiting for running modules to finish...",
                "Interrupted,".yellow().bold()
            );
        }
    })
    .expect("Error setting Ctrl-C handler");
    cancel
}

fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<BuildError>() {
        Some(BuildError::Interrupted { .. }) => EXIT_INTERRUPTED,
        _ => 1,
    }
}
