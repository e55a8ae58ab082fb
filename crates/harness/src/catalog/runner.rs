//! Per-case execution.
//!
//! Each case walks the [`Stage`] graph under a [`CaseRun`], which logs every
//! transition and collects the command lines that were run. Whatever goes wrong
//! inside a case ends up in that case's [`TestOutcome`]; it never stops the run.

use std::fmt::Write as _;
use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::outcome::{OutcomeKind, Report, Stage, TestOutcome};
use super::{Catalog, ComparisonMode, TestCase};
use crate::common::{CompileError, SetupError};
use crate::compare::{ComparisonOutcome, Reference, compare};
use crate::config::Config;
use crate::sim::{ExecutionResult, SimulatorKind, SimulatorRunner};
use crate::toolchain::Toolchain;

/// Options for a whole run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    /// Regular expression selecting cases by name; all cases when unset.
    pub filter: Option<String>,
    /// Number of worker threads.
    pub jobs: NonZeroUsize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            filter: None,
            jobs: NonZeroUsize::MIN,
        }
    }
}

/// Preflights `config`, discovers and filters the catalog, and runs every selected case.
///
/// # Returns
///
/// The report, or a [`SetupError`] if the run could not start.
pub fn run(config: &Config, options: &RunOptions) -> Result<Report, SetupError> {
    let config = config.preflight()?;
    let mut catalog = Catalog::discover(&config.paths.programs_dir)?;
    if let Some(pattern) = &options.filter {
        catalog.retain_matching(pattern)?;
    }
    info!(cases = catalog.len(), jobs = options.jobs.get(), "running test catalog");
    TestRunner::new(&config).run(&catalog, options.jobs)
}

/// Why a case stopped before comparison finished.
#[derive(Debug)]
struct Failure {
    stage: Stage,
    kind: OutcomeKind,
    diagnostic: String,
}

impl Failure {
    fn new(stage: Stage, kind: OutcomeKind, diagnostic: impl Into<String>) -> Self {
        Self {
            stage,
            kind,
            diagnostic: diagnostic.into(),
        }
    }
}

/// State of one case in flight.
#[derive(Debug)]
struct CaseRun<'c> {
    case: &'c TestCase,
    stage: Stage,
    commands: Vec<String>,
    started: Instant,
}

impl<'c> CaseRun<'c> {
    fn new(case: &'c TestCase) -> Self {
        Self {
            case,
            stage: Stage::Pending,
            commands: Vec::new(),
            started: Instant::now(),
        }
    }

    fn advance(&mut self, next: Stage) {
        debug_assert!(
            self.stage.can_advance_to(next),
            "illegal transition {} -> {next}",
            self.stage
        );
        debug!(case = %self.case.name, from = %self.stage, to = %next, "stage");
        self.stage = next;
    }

    fn record(&mut self, command: impl Into<String>) {
        self.commands.push(command.into());
    }

    fn finish(self, kind: OutcomeKind, diagnostic: Option<String>) -> TestOutcome {
        TestOutcome {
            name: self.case.name.clone(),
            passed: self.stage == Stage::Passed,
            kind,
            stage: self.stage,
            diagnostic,
            commands: self.commands,
            elapsed: self.started.elapsed(),
        }
    }
}

/// Drives cases through compile, execute, and compare.
#[derive(Debug)]
pub struct TestRunner<'a> {
    config: &'a Config,
    toolchain: Toolchain,
    simulators: SimulatorRunner,
}

impl<'a> TestRunner<'a> {
    /// Creates a runner; `config` should already have passed [`Config::preflight`].
    pub fn new(config: &'a Config) -> Self {
        Self {
            config,
            toolchain: Toolchain::new(config),
            simulators: SimulatorRunner::new(config),
        }
    }

    /// Runs every case of `catalog` on up to `jobs` worker threads.
    ///
    /// Each worker compiles into its own directory `<scratch>/worker-<i>`. The
    /// report lists outcomes in catalog order regardless of completion order.
    pub fn run(&self, catalog: &Catalog, jobs: NonZeroUsize) -> Result<Report, SetupError> {
        let cases = catalog.cases();
        let workers = jobs.get().min(cases.len()).max(1);
        let scratch_dirs = (0..workers)
            .map(|index| {
                let dir = self.config.paths.scratch_dir.join(format!("worker-{index}"));
                fs::create_dir_all(&dir)
                    .map(|()| dir.clone())
                    .map_err(|source| SetupError::Scratch { path: dir, source })
            })
            .collect::<Result<Vec<PathBuf>, _>>()?;

        let mut slots: Vec<Option<TestOutcome>> = vec![None; cases.len()];
        if let [scratch] = scratch_dirs.as_slice() {
            for (slot, case) in slots.iter_mut().zip(cases) {
                *slot = Some(self.run_case(case, scratch));
            }
        } else {
            let next = AtomicUsize::new(0);
            let finished: Vec<Vec<(usize, TestOutcome)>> = thread::scope(|scope| {
                let handles: Vec<_> = scratch_dirs
                    .iter()
                    .map(|scratch| {
                        let next = &next;
                        scope.spawn(move || {
                            let mut done = Vec::new();
                            loop {
                                let index = next.fetch_add(1, Ordering::Relaxed);
                                let Some(case) = cases.get(index) else {
                                    break;
                                };
                                done.push((index, self.run_case(case, scratch)));
                            }
                            done
                        })
                    })
                    .collect();
                handles
                    .into_iter()
                    .filter_map(|handle| handle.join().ok())
                    .collect()
            });
            for (index, outcome) in finished.into_iter().flatten() {
                if let Some(slot) = slots.get_mut(index) {
                    *slot = Some(outcome);
                }
            }
        }

        let outcomes = slots
            .into_iter()
            .zip(cases)
            .map(|(slot, case)| slot.unwrap_or_else(|| lost(case)))
            .collect();
        Ok(Report::new(outcomes))
    }

    /// Runs one case, writing its image into `scratch`.
    pub fn run_case(&self, case: &TestCase, scratch: &Path) -> TestOutcome {
        let mut run = CaseRun::new(case);
        let outcome = match self.drive(&mut run, scratch) {
            Ok((comparison, results)) => {
                let mut diagnostic = comparison.describe();
                let kind = if comparison.passed() {
                    run.advance(Stage::Passed);
                    OutcomeKind::Passed
                } else {
                    run.advance(Stage::Failed);
                    diagnostic = diagnostic.map(|text| with_stderr(text, &results));
                    match comparison {
                        ComparisonOutcome::Undecodable { .. } => OutcomeKind::DecodeError,
                        ComparisonOutcome::ExitStatusMismatch { .. } => {
                            OutcomeKind::ExitStatusMismatch
                        }
                        ComparisonOutcome::Match | ComparisonOutcome::Mismatch { .. } => {
                            OutcomeKind::Mismatch
                        }
                    }
                };
                run.finish(kind, diagnostic)
            }
            Err(failure) => {
                run.advance(failure.stage);
                run.finish(failure.kind, Some(failure.diagnostic))
            }
        };

        if outcome.passed {
            info!(case = %outcome.name, kind = %outcome.kind, "case finished");
        } else {
            warn!(
                case = %outcome.name,
                kind = %outcome.kind,
                diagnostic = outcome.diagnostic.as_deref().unwrap_or(""),
                "case failed"
            );
        }
        outcome
    }

    /// Compiles, simulates, and compares one case.
    ///
    /// Returns the comparison together with the runs it was based on, oracle first.
    fn drive(
        &self,
        run: &mut CaseRun<'_>,
        scratch: &Path,
    ) -> Result<(ComparisonOutcome, Vec<ExecutionResult>), Failure> {
        let case = run.case;
        let policy = self.config.comparison.exit_status;
        let layout = &self.config.memory;

        run.advance(Stage::Compiling);
        let request = self
            .toolchain
            .request(&case.source, &scratch.join(case.binary_name()));
        run.record(self.toolchain.command_line(&request).to_string());
        let image = self.toolchain.compile(&request).map_err(|err| {
            let kind = match &err {
                CompileError::TimedOut { .. } => OutcomeKind::Timeout,
                _ => OutcomeKind::CompileFailed,
            };
            Failure::new(Stage::CompileFailed, kind, err.to_string())
        })?;
        run.advance(Stage::Compiled);

        if let Some(segment) = image.first_uncovered(layout) {
            return Err(Failure::new(
                Stage::Failed,
                OutcomeKind::LayoutMismatch,
                format!(
                    "load segment {:#x}+{:#x} is outside the memory layout {layout}",
                    segment.address, segment.size
                ),
            ));
        }

        run.advance(Stage::Executing);
        match &case.mode {
            ComparisonMode::LiteralExpected { target, expected } => {
                let result = self.execute(run, image.path(), *target)?;
                run.advance(Stage::Executed);
                run.advance(Stage::Comparing);
                let comparison = compare(&result, Reference::Literal(expected), policy);
                Ok((comparison, vec![result]))
            }
            ComparisonMode::OracleDifferential => {
                let oracle = self.execute(run, image.path(), SimulatorKind::Oracle)?;
                let subject = self.execute(run, image.path(), SimulatorKind::UnderTest)?;
                run.advance(Stage::Executed);
                run.advance(Stage::Comparing);
                let comparison = compare(&subject, Reference::Oracle(&oracle), policy);
                Ok((comparison, vec![oracle, subject]))
            }
        }
    }

    /// Runs `binary` under `target` as many times as configured.
    ///
    /// Repeated runs must be observably identical; the first run is returned.
    fn execute(
        &self,
        run: &mut CaseRun<'_>,
        binary: &Path,
        target: SimulatorKind,
    ) -> Result<ExecutionResult, Failure> {
        let layout = &self.config.memory;
        let timeout = self.config.limits.simulate_timeout();
        let runs = self.config.comparison.runs();

        let mut first: Option<ExecutionResult> = None;
        for attempt in 1..=runs {
            let result = self
                .simulators
                .run(binary, target, layout, timeout)
                .map_err(|err| {
                    Failure::new(Stage::Failed, OutcomeKind::ExecutionError, err.to_string())
                })?;
            if attempt == 1 {
                run.record(result.command());
            }
            if result.timed_out() {
                return Err(timed_out(target, timeout, &result));
            }
            let Some(reference) = &first else {
                first = Some(result);
                continue;
            };
            if !reference.same_behavior(&result) {
                return Err(Failure::new(
                    Stage::Failed,
                    OutcomeKind::Nondeterministic,
                    format!(
                        "{target} behaved differently on run {attempt} of {runs}: \
                         run 1 gave {} with {} stdout bytes, run {attempt} gave {} with {} stdout bytes",
                        reference.status(),
                        reference.stdout().len(),
                        result.status(),
                        result.stdout().len()
                    ),
                ));
            }
        }
        first.ok_or_else(|| {
            Failure::new(Stage::Failed, OutcomeKind::ExecutionError, "no simulator run")
        })
    }
}

fn timed_out(target: SimulatorKind, timeout: Duration, result: &ExecutionResult) -> Failure {
    let mut diagnostic = format!(
        "{target} did not finish within {:.1}s and was killed",
        timeout.as_secs_f64()
    );
    let stderr = result.stderr_lossy();
    if !stderr.trim().is_empty() {
        diagnostic.push_str("\nstderr:\n");
        diagnostic.push_str(stderr.trim_end());
    }
    Failure::new(Stage::ExecutionFailedTimeout, OutcomeKind::Timeout, diagnostic)
}

/// Appends the captured stderr of every run to a failure diagnostic.
fn with_stderr(mut diagnostic: String, results: &[ExecutionResult]) -> String {
    for result in results {
        let stderr = result.stderr_lossy();
        let stderr = stderr.trim_end();
        if stderr.is_empty() {
            let _ = write!(diagnostic, "\nstderr ({}): <empty>", result.target());
        } else {
            let _ = write!(diagnostic, "\nstderr ({}):\n{stderr}", result.target());
        }
    }
    diagnostic
}

/// Outcome for a case whose worker died before reporting.
fn lost(case: &TestCase) -> TestOutcome {
    TestOutcome {
        name: case.name.clone(),
        passed: false,
        kind: OutcomeKind::ExecutionError,
        stage: Stage::Pending,
        diagnostic: Some("worker thread panicked before the case finished".to_string()),
        commands: Vec::new(),
        elapsed: Duration::ZERO,
    }
}
