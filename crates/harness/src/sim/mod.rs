//! Simulator identities and execution.
//!
//! Provides everything needed to run a compiled image under one of the two
//! simulators being compared. It includes:
//! 1. **Identity:** [`SimulatorKind`] names the oracle and the simulator under test.
//! 2. **Arguments:** [`ArgumentBuilder`] translates the shared memory layout into each simulator's syntax.
//! 3. **Results:** [`ExecutionResult`] holds captured output, exit state, and decoded text.
//! 4. **Runner:** [`SimulatorRunner`] binds executables to builders and runs them with a timeout.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Per-simulator command-line builders.
pub mod args;

/// Captured execution results and output decoding.
pub mod result;

/// Simulator invocation.
pub mod runner;

pub use args::{ArgumentBuilder, OracleArgs, UnderTestArgs};
pub use result::{ExecutionResult, TextEncoding};
pub use runner::SimulatorRunner;

/// Which of the two simulators is meant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SimulatorKind {
    /// The trusted reference simulator.
    Oracle,
    /// The simulator whose correctness is being checked.
    UnderTest,
}

impl SimulatorKind {
    /// Both simulators, oracle first.
    pub const ALL: [Self; 2] = [Self::Oracle, Self::UnderTest];

    /// Short name used in case names, logs, and reports.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Oracle => "oracle",
            Self::UnderTest => "under-test",
        }
    }
}

impl fmt::Display for SimulatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
