//! Isolated, parallel compilation of a build plan's units
//!
//! Each unit is handed to the [`Compiler`] on its own; the result is a tagged
//! outcome, never an error that unwinds across units. A panic inside the
//! compiler is caught at the unit boundary and recorded as a failure.
//! Cancellation is checked before a unit starts: running units finish, units
//! not yet started are abandoned.

use crate::compiler::{CompileRequest, Compiler, CompilerDirectives, Diagnostic};
use crate::error::{BuildError, BuildResult};
use crate::plan::CompileUnit;

use rayon::prelude::*;
use serde::Serialize;
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, warn};

/// Degree of parallelism above which memory pressure becomes noticeable
pub const HIGH_JOB_COUNT: usize = 8;

/// Lifecycle of a compile unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitState {
    Pending,
    Compiling,
    Succeeded,
    Failed,
}

impl UnitState {
    /// Whether the unit has reached its final state
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Units only move forward and are never retried
    pub fn can_transition_to(self, next: UnitState) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Compiling)
                | (Self::Compiling, Self::Succeeded)
                | (Self::Compiling, Self::Failed)
        )
    }

    /// Move to `next`, or `None` if the transition is not allowed
    pub fn advance(self, next: UnitState) -> Option<UnitState> {
        self.can_transition_to(next).then_some(next)
    }
}

/// Final result for one unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileOutcome {
    Succeeded { artifact: PathBuf },
    Failed { diagnostic: Diagnostic },
}

impl CompileOutcome {
    pub fn state(&self) -> UnitState {
        match self {
            Self::Succeeded { .. } => UnitState::Succeeded,
            Self::Failed { .. } => UnitState::Failed,
        }
    }
}

/// A unit that compiled, with the location of its artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompiledArtifact {
    pub unit: CompileUnit,
    pub artifact: PathBuf,
}

/// Progress notifications published while compiling
#[derive(Debug, Clone, Copy)]
pub enum ProgressEvent<'a> {
    Started { unit: &'a CompileUnit },
    Finished { unit: &'a CompileUnit, ok: bool },
}

pub type ProgressCallback = Arc<dyn Fn(ProgressEvent<'_>) + Send + Sync>;

/// Outcome of a whole batch; every unit appears in exactly one collection
#[derive(Debug, Clone, Default, Serialize)]
pub struct CompileResults {
    /// Units that produced an artifact, in plan order
    pub artifacts: Vec<CompiledArtifact>,
    /// Failed units keyed by absolute source path
    pub failures: BTreeMap<PathBuf, Diagnostic>,
    /// Units never dispatched because the build was cancelled
    pub abandoned: Vec<PathBuf>,
    /// Whether cancellation left at least one unit undispatched
    pub interrupted: bool,
}

impl CompileResults {
    /// Number of units that reached a terminal state
    pub fn completed(&self) -> usize {
        self.artifacts.len() + self.failures.len()
    }

    /// Whether at least one unit ran and none of them succeeded
    pub fn all_failed(&self) -> bool {
        self.artifacts.is_empty() && !self.failures.is_empty()
    }

    /// State a unit ended the batch in
    pub fn state_of(&self, source: &Path) -> UnitState {
        if self.failures.contains_key(source) {
            UnitState::Failed
        } else if self.artifacts.iter().any(|a| a.unit.source == source) {
            UnitState::Succeeded
        } else {
            UnitState::Pending
        }
    }
}

enum UnitRun {
    Done(CompileOutcome),
    Abandoned,
}

/// Resolve a requested job count; `0` means one per available hardware thread
pub fn effective_jobs(requested: usize) -> usize {
    if requested > 0 {
        requested
    } else {
        thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}

/// Dispatches compile units to a compiler with bounded parallelism
pub struct CompileOrchestrator<C: Compiler> {
    compiler: C,
    jobs: usize,
    directives: CompilerDirectives,
    cancel: Option<Arc<AtomicBool>>,
    progress: Option<ProgressCallback>,
}

impl<C: Compiler> CompileOrchestrator<C> {
    /// Create an orchestrator using one worker per hardware thread
    pub fn new(compiler: C) -> Self {
        Self {
            compiler,
            jobs: 0,
            directives: CompilerDirectives::default(),
            cancel: None,
            progress: None,
        }
    }

    /// Set the worker count (`0` = auto-detect)
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs;
        self
    }

    pub fn with_directives(mut self, directives: CompilerDirectives) -> Self {
        self.directives = directives;
        self
    }

    /// Flag that, once set, stops new units from being dispatched
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_progress(mut self, progress: Option<ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    /// Compile every unit, isolating failures per unit
    pub fn execute(&self, units: &[CompileUnit], temp_dir: &Path) -> BuildResult<CompileResults> {
        if units.is_empty() {
            warn!("no modules to compile");
            return Ok(CompileResults::default());
        }

        let jobs = effective_jobs(self.jobs).min(units.len());
        info!(units = units.len(), jobs, "compiling");
        if jobs > HIGH_JOB_COUNT {
            warn!(jobs, "high job count may use a lot of memory; lower it if builds fail");
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(jobs)
            .thread_name(|i| format!("pyshield-compile-{}", i))
            .build()
            .map_err(|e| BuildError::ThreadPool(e.to_string()))?;

        let runs: Vec<UnitRun> = pool.install(|| {
            units
                .par_iter()
                .map(|unit| self.run_unit(unit, temp_dir))
                .collect()
        });

        let mut results = CompileResults::default();
        for (unit, run) in units.iter().zip(runs) {
            match run {
                UnitRun::Done(CompileOutcome::Succeeded { artifact }) => {
                    results.artifacts.push(CompiledArtifact {
                        unit: unit.clone(),
                        artifact,
                    });
                }
                UnitRun::Done(CompileOutcome::Failed { diagnostic }) => {
                    results.failures.insert(unit.source.clone(), diagnostic);
                }
                UnitRun::Abandoned => results.abandoned.push(unit.source.clone()),
            }
        }
        // A cancel that lands after the last dispatch leaves nothing to abandon
        results.interrupted = !results.abandoned.is_empty();

        if results.all_failed() {
            warn!(
                failed = results.failures.len(),
                "every unit failed to compile; sources will be preserved"
            );
        }
        info!(
            compiled = results.artifacts.len(),
            failed = results.failures.len(),
            abandoned = results.abandoned.len(),
            "compilation finished"
        );

        Ok(results)
    }

    /// Compile a single unit
    pub fn compile_unit(&self, unit: &CompileUnit, temp_dir: &Path) -> CompileOutcome {
        if !unit.source.is_file() {
            warn!(file = %unit.relative.display(), "source vanished before compilation");
            return CompileOutcome::Failed {
                diagnostic: Diagnostic::source_not_found(&unit.source),
            };
        }

        let request = CompileRequest {
            unit,
            temp_dir,
            directives: &self.directives,
        };

        match panic::catch_unwind(AssertUnwindSafe(|| self.compiler.compile(&request))) {
            Ok(Ok(artifact)) if artifact.is_file() => CompileOutcome::Succeeded { artifact },
            Ok(Ok(artifact)) => CompileOutcome::Failed {
                diagnostic: Diagnostic::new(format!(
                    "compiler reported artifact {} but it does not exist",
                    artifact.display()
                )),
            },
            Ok(Err(diagnostic)) => CompileOutcome::Failed { diagnostic },
            Err(payload) => CompileOutcome::Failed {
                diagnostic: Diagnostic::new(format!(
                    "compiler panicked: {}",
                    panic_message(payload.as_ref())
                )),
            },
        }
    }

    fn run_unit(&self, unit: &CompileUnit, temp_dir: &Path) -> UnitRun {
        if self.is_cancelled() {
            debug!(module = %unit.module, "abandoned");
            return UnitRun::Abandoned;
        }

        let state = UnitState::Pending.advance(UnitState::Compiling);
        debug!(module = %unit.module, ?state, "dispatch");
        self.notify(ProgressEvent::Started { unit });

        let outcome = self.compile_unit(unit, temp_dir);
        debug_assert!(state.and_then(|s| s.advance(outcome.state())).is_some());

        match &outcome {
            CompileOutcome::Succeeded { artifact } => {
                debug!(module = %unit.module, artifact = %artifact.display(), "compiled");
            }
            CompileOutcome::Failed { diagnostic } => {
                warn!(
                    file = %unit.relative.display(),
                    line = ?diagnostic.line,
                    "compilation failed: {}",
                    diagnostic.headline()
                );
            }
        }
        self.notify(ProgressEvent::Finished {
            unit,
            ok: outcome.state() == UnitState::Succeeded,
        });

        UnitRun::Done(outcome)
    }

    fn notify(&self, event: ProgressEvent<'_>) {
        if let Some(progress) = &self.progress {
            progress(event);
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
