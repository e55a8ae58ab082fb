//! Test discovery, execution, and reporting.
//!
//! This module turns a directory of test programs into a report. It provides:
//! 1. **Discovery:** [`Catalog::discover`] finds programs and derives named cases from them.
//! 2. **Selection:** [`Catalog::retain_matching`] narrows the catalog with a regular expression.
//! 3. **Execution:** [`TestRunner`] drives each case through its stages, optionally in parallel.
//! 4. **Reporting:** [`Report`] aggregates outcomes for the console and as JSON.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::common::SetupError;
use crate::sim::SimulatorKind;

/// Stages, outcome kinds, and the aggregated report.
pub mod outcome;

/// The per-case state machine and the worker pool.
pub mod runner;

pub use outcome::{OutcomeKind, Report, Stage, TestOutcome};
pub use runner::{RunOptions, TestRunner, run};

/// Source extensions recognized for a program, in order of preference.
const SOURCE_EXTENSIONS: [&str; 3] = ["c", "S", "s"];

/// Extension of the optional literal expected-output file.
const EXPECTED_EXTENSION: &str = "expected";

/// Case-name suffix for the oracle-differential case.
const DIFFERENTIAL_SUFFIX: &str = "differential";

/// How a case decides pass or fail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum ComparisonMode {
    /// One simulator's stdout must equal a fixed string.
    LiteralExpected {
        /// Simulator that runs the program.
        target: SimulatorKind,
        /// Exact expected stdout.
        expected: String,
    },
    /// The simulator under test must reproduce the oracle's stdout and exit status.
    OracleDifferential,
}

/// One named test: a program and how its behavior is judged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestCase {
    /// Unique name, e.g. `hello_world/differential`.
    pub name: String,
    /// Program directory name shared by every case derived from it.
    pub program: String,
    /// The test program source.
    pub source: PathBuf,
    /// Pass criterion.
    pub mode: ComparisonMode,
}

impl TestCase {
    /// A case comparing the simulator under test against the oracle.
    pub fn differential(program: &str, source: PathBuf) -> Self {
        Self {
            name: format!("{program}/{DIFFERENTIAL_SUFFIX}"),
            program: program.to_string(),
            source,
            mode: ComparisonMode::OracleDifferential,
        }
    }

    /// A case checking one simulator's stdout against `expected`.
    pub fn literal(program: &str, source: PathBuf, target: SimulatorKind, expected: &str) -> Self {
        Self {
            name: format!("{program}/{target}"),
            program: program.to_string(),
            source,
            mode: ComparisonMode::LiteralExpected {
                target,
                expected: expected.to_string(),
            },
        }
    }

    /// File name for the compiled image; unique per case and safe on any filesystem.
    pub fn binary_name(&self) -> String {
        self.name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect()
    }
}

/// An ordered set of test cases.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    cases: Vec<TestCase>,
}

impl Catalog {
    /// Builds a catalog from explicit cases, sorted by name.
    pub fn from_cases(mut cases: Vec<TestCase>) -> Self {
        cases.sort_by(|a, b| a.name.cmp(&b.name));
        Self { cases }
    }

    /// Scans `programs_dir` for test programs.
    ///
    /// Every subdirectory `<name>` holding `<name>.c`, `<name>.S`, or `<name>.s`
    /// yields `<name>/differential`. If `<name>.expected` is present it also yields
    /// `<name>/oracle` and `<name>/under-test`, each checked against that text.
    /// Directories without a matching source are skipped.
    ///
    /// # Arguments
    ///
    /// * `programs_dir` - Directory with one subdirectory per program.
    ///
    /// # Returns
    ///
    /// The sorted catalog, or [`SetupError::Catalog`] if a directory or expected file is unreadable.
    pub fn discover(programs_dir: &Path) -> Result<Self, SetupError> {
        let unreadable = |path: &Path| {
            let path = path.to_path_buf();
            move |source: io::Error| SetupError::Catalog { path, source }
        };

        let mut cases = Vec::new();
        for entry in fs::read_dir(programs_dir).map_err(unreadable(programs_dir))? {
            let dir = entry.map_err(unreadable(programs_dir))?.path();
            if !dir.is_dir() {
                continue;
            }
            let Some(program) = dir.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            let Some(source) = SOURCE_EXTENSIONS
                .iter()
                .map(|ext| dir.join(format!("{program}.{ext}")))
                .find(|candidate| candidate.is_file())
            else {
                debug!(dir = %dir.display(), "no program source, skipping");
                continue;
            };

            let expected_path = dir.join(format!("{program}.{EXPECTED_EXTENSION}"));
            if expected_path.is_file() {
                let expected =
                    fs::read_to_string(&expected_path).map_err(unreadable(&expected_path))?;
                for target in SimulatorKind::ALL {
                    cases.push(TestCase::literal(program, source.clone(), target, &expected));
                }
            }
            cases.push(TestCase::differential(program, source));
        }

        let catalog = Self::from_cases(cases);
        debug!(dir = %programs_dir.display(), cases = catalog.len(), "discovered test cases");
        Ok(catalog)
    }

    /// Keeps only cases whose name matches the regular expression `pattern`.
    pub fn retain_matching(&mut self, pattern: &str) -> Result<(), SetupError> {
        let regex = Regex::new(pattern).map_err(|source| SetupError::Filter {
            pattern: pattern.to_string(),
            source,
        })?;
        self.cases.retain(|case| regex.is_match(&case.name));
        Ok(())
    }

    /// The cases in name order.
    pub fn cases(&self) -> &[TestCase] {
        &self.cases
    }

    /// Number of cases.
    pub fn len(&self) -> usize {
        self.cases.len()
    }

    /// Returns true if no case was found or all were filtered out.
    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }
}
