//! Case stages, outcomes, and the aggregated report.

use std::fmt::{self, Write as _};
use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use serde::{Serialize, Serializer};

/// Where a case is in its lifecycle.
///
/// Legal transitions:
///
/// ```text
/// Pending -> Compiling -> CompileFailed
///                      -> Compiled -> Failed
///                                  -> Executing -> ExecutionFailedTimeout
///                                               -> Failed
///                                               -> Executed -> Comparing -> Passed
///                                                                        -> Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Not started.
    Pending,
    /// The compiler is running.
    Compiling,
    /// Terminal: no image was produced.
    CompileFailed,
    /// A valid image exists.
    Compiled,
    /// Simulators are running.
    Executing,
    /// Terminal: a simulator was killed at its deadline.
    ExecutionFailedTimeout,
    /// Every simulator run finished.
    Executed,
    /// Outputs are being compared.
    Comparing,
    /// Terminal: the case passed.
    Passed,
    /// Terminal: the case failed after compiling.
    Failed,
}

impl Stage {
    /// Returns true if `next` is a legal successor of `self`.
    pub const fn can_advance_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Compiling)
                | (Self::Compiling, Self::CompileFailed | Self::Compiled)
                | (Self::Compiled, Self::Executing | Self::Failed)
                | (
                    Self::Executing,
                    Self::ExecutionFailedTimeout | Self::Executed | Self::Failed
                )
                | (Self::Executed, Self::Comparing)
                | (Self::Comparing, Self::Passed | Self::Failed)
        )
    }

    /// Returns true if no transition leaves this stage.
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::CompileFailed | Self::ExecutionFailedTimeout | Self::Passed | Self::Failed
        )
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Classification of a finished case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeKind {
    /// Behavior matched.
    Passed,
    /// The compiler failed or produced an unusable image.
    CompileFailed,
    /// The image does not fit the memory layout.
    LayoutMismatch,
    /// A simulator could not be started.
    ExecutionError,
    /// The compiler or a simulator exceeded its time bound.
    Timeout,
    /// Stdout was not valid text.
    DecodeError,
    /// Stdout differed.
    Mismatch,
    /// Stdout matched but exit status differed.
    ExitStatusMismatch,
    /// Repeated runs of one simulator disagreed.
    Nondeterministic,
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Passed => "PASSED",
            Self::CompileFailed => "COMPILE_FAILED",
            Self::LayoutMismatch => "LAYOUT_MISMATCH",
            Self::ExecutionError => "EXECUTION_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::DecodeError => "DECODE_ERROR",
            Self::Mismatch => "MISMATCH",
            Self::ExitStatusMismatch => "EXIT_STATUS_MISMATCH",
            Self::Nondeterministic => "NONDETERMINISTIC",
        })
    }
}

fn as_secs<S: Serializer>(elapsed: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(elapsed.as_secs_f64())
}

/// The record of one finished case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestOutcome {
    /// Case name.
    pub name: String,
    /// Whether the case passed.
    pub passed: bool,
    /// Classification.
    pub kind: OutcomeKind,
    /// Terminal stage reached.
    pub stage: Stage,
    /// Explanation for failures and warnings.
    pub diagnostic: Option<String>,
    /// Every command line run for the case, in order.
    pub commands: Vec<String>,
    /// Wall time for the whole case.
    #[serde(rename = "elapsed_secs", serialize_with = "as_secs")]
    pub elapsed: Duration,
}

/// Ordered outcomes of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Report {
    outcomes: Vec<TestOutcome>,
}

#[derive(Serialize)]
struct ReportJson<'a> {
    passed: usize,
    failed: usize,
    outcomes: &'a [TestOutcome],
}

impl Report {
    /// Wraps outcomes already in catalog order.
    pub const fn new(outcomes: Vec<TestOutcome>) -> Self {
        Self { outcomes }
    }

    /// The outcomes in catalog order.
    pub fn outcomes(&self) -> &[TestOutcome] {
        &self.outcomes
    }

    /// Looks up an outcome by case name.
    pub fn get(&self, name: &str) -> Option<&TestOutcome> {
        self.outcomes.iter().find(|outcome| outcome.name == name)
    }

    /// Number of passing cases.
    pub fn passed(&self) -> usize {
        self.outcomes.iter().filter(|outcome| outcome.passed).count()
    }

    /// Number of failing cases.
    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.passed()
    }

    /// Returns true if every case passed.
    pub fn all_passed(&self) -> bool {
        self.outcomes.iter().all(|outcome| outcome.passed)
    }

    /// Renders the report for a terminal.
    ///
    /// Failures always carry their diagnostic. Passing cases are listed only when
    /// `verbose` is set, or when they passed with a warning.
    pub fn render(&self, verbose: bool) -> String {
        let mut out = String::new();
        for outcome in &self.outcomes {
            let show = !outcome.passed || verbose || outcome.diagnostic.is_some();
            if !show {
                continue;
            }
            let _ = writeln!(
                out,
                "{:<20} {} ({:.2}s)",
                outcome.kind.to_string(),
                outcome.name,
                outcome.elapsed.as_secs_f64()
            );
            if let Some(diagnostic) = &outcome.diagnostic {
                for line in diagnostic.lines() {
                    let _ = writeln!(out, "    {line}");
                }
            }
        }
        let _ = writeln!(
            out,
            "{} passed, {} failed, {} total",
            self.passed(),
            self.failed(),
            self.outcomes.len()
        );
        out
    }

    /// Serializes the report with its counts.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&ReportJson {
            passed: self.passed(),
            failed: self.failed(),
            outcomes: &self.outcomes,
        })
    }

    /// Writes [`Report::to_json`] to `path`.
    pub fn write_json(&self, path: &Path) -> io::Result<()> {
        let json = self.to_json().map_err(io::Error::other)?;
        fs::write(path, json)
    }
}
