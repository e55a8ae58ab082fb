//! Output equivalence checking.
//!
//! Decides whether a simulator run behaved as expected. The primary criterion is
//! exact equality of decoded stdout; exit status is a secondary criterion reported
//! on its own, and only when comparing against the oracle.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::common::{DecodeError, ExitState};
use crate::sim::{ExecutionResult, SimulatorKind};

/// What an exit-status divergence with matching stdout does to a case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExitStatusPolicy {
    /// The case fails.
    #[default]
    Strict,
    /// The case passes with a warning in its diagnostic.
    Warn,
}

impl fmt::Display for ExitStatusPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Strict => "strict",
            Self::Warn => "warn",
        })
    }
}

/// What a run is compared against.
#[derive(Debug, Clone, Copy)]
pub enum Reference<'a> {
    /// A fixed expected stdout.
    Literal(&'a str),
    /// The oracle's run of the same image.
    Oracle(&'a ExecutionResult),
}

/// Result of one comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComparisonOutcome {
    /// Stdout and, against the oracle, exit status agree.
    Match,
    /// Decoded stdout differs.
    Mismatch {
        /// Reference stdout.
        expected: String,
        /// Subject stdout.
        actual: String,
    },
    /// Stdout agrees but the simulators exited differently.
    ExitStatusMismatch {
        /// Oracle exit state.
        expected: ExitState,
        /// Subject exit state.
        actual: ExitState,
        /// Whether the divergence fails the case.
        fatal: bool,
    },
    /// One side's stdout is not valid text.
    Undecodable {
        /// The simulator whose output could not be decoded.
        target: SimulatorKind,
        /// Where decoding stopped.
        error: DecodeError,
    },
}

impl ComparisonOutcome {
    /// Returns true if the case passes.
    pub const fn passed(&self) -> bool {
        match self {
            Self::Match => true,
            Self::ExitStatusMismatch { fatal, .. } => !*fatal,
            Self::Mismatch { .. } | Self::Undecodable { .. } => false,
        }
    }

    /// A human-readable explanation, or `None` for a clean match.
    pub fn describe(&self) -> Option<String> {
        match self {
            Self::Match => None,
            Self::Mismatch { expected, actual } => Some(format!(
                "stdout differs: {}\n--- expected ---\n{expected}\n--- actual ---\n{actual}",
                first_difference(expected, actual)
            )),
            Self::ExitStatusMismatch {
                expected,
                actual,
                fatal,
            } => Some(format!(
                "{}stdout matches but exit status differs: oracle {expected}, under test {actual}",
                if *fatal { "" } else { "warning: " }
            )),
            Self::Undecodable { target, error } => Some(format!("{target} {error}")),
        }
    }
}

/// Compares `subject` against `reference`.
///
/// # Arguments
///
/// * `subject` - The run being judged.
/// * `reference` - A literal expected stdout or the oracle's run.
/// * `policy` - How an exit-status divergence is treated.
///
/// # Returns
///
/// The outcome. A decode failure on either side is never a match; the reference
/// side is checked first so an undecodable oracle run is blamed on the oracle.
pub fn compare(
    subject: &ExecutionResult,
    reference: Reference<'_>,
    policy: ExitStatusPolicy,
) -> ComparisonOutcome {
    let expected = match reference {
        Reference::Literal(text) => text,
        Reference::Oracle(oracle) => match oracle.stdout_text() {
            Ok(text) => text,
            Err(error) => {
                return ComparisonOutcome::Undecodable {
                    target: oracle.target(),
                    error: error.clone(),
                };
            }
        },
    };
    let actual = match subject.stdout_text() {
        Ok(text) => text,
        Err(error) => {
            return ComparisonOutcome::Undecodable {
                target: subject.target(),
                error: error.clone(),
            };
        }
    };

    if expected != actual {
        return ComparisonOutcome::Mismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        };
    }

    if let Reference::Oracle(oracle) = reference {
        if oracle.status() != subject.status() {
            return ComparisonOutcome::ExitStatusMismatch {
                expected: oracle.status(),
                actual: subject.status(),
                fatal: policy == ExitStatusPolicy::Strict,
            };
        }
    }
    ComparisonOutcome::Match
}

/// Locates the first differing line of two texts.
fn first_difference(expected: &str, actual: &str) -> String {
    let expected_lines: Vec<&str> = expected.split_inclusive('\n').collect();
    let actual_lines: Vec<&str> = actual.split_inclusive('\n').collect();
    let count = expected_lines.len().max(actual_lines.len());
    for index in 0..count {
        let left = expected_lines.get(index).copied();
        let right = actual_lines.get(index).copied();
        if left != right {
            return format!(
                "line {}: expected {:?}, got {:?}",
                index + 1,
                left.unwrap_or("<end of output>"),
                right.unwrap_or("<end of output>")
            );
        }
    }
    "outputs differ".to_string()
}
