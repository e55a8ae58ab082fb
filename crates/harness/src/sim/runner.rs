//! Simulator invocation.
//!
//! [`SimulatorRunner`] owns one executable and one [`ArgumentBuilder`] per simulator.
//! It runs a compiled image synchronously, bounded by a caller-supplied timeout, and
//! always returns the captured behavior; only a failure to start the simulator or a
//! layout the simulator cannot express is an error.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info};

use super::args::{ArgumentBuilder, OracleArgs, UnderTestArgs};
use super::result::{ExecutionResult, TextEncoding};
use super::SimulatorKind;
use crate::common::{CommandLine, LayoutError, MemoryLayout, RunError};
use crate::config::Config;

/// One simulator executable paired with the builder for its argument syntax.
#[derive(Debug)]
struct Simulator {
    executable: PathBuf,
    builder: Box<dyn ArgumentBuilder>,
}

/// Runs compiled images under the oracle or the simulator under test.
#[derive(Debug)]
pub struct SimulatorRunner {
    oracle: Simulator,
    under_test: Simulator,
    encoding: TextEncoding,
}

impl SimulatorRunner {
    /// Creates a runner from the resolved configuration.
    pub fn new(config: &Config) -> Self {
        Self {
            oracle: Simulator {
                executable: config.simulators.oracle.clone(),
                builder: Box::new(OracleArgs::new(config.target.oracle_isa())),
            },
            under_test: Simulator {
                executable: config.simulators.under_test.clone(),
                builder: Box::new(UnderTestArgs::new(config.limits.max_cycles)),
            },
            encoding: config.comparison.encoding,
        }
    }

    const fn simulator(&self, kind: SimulatorKind) -> &Simulator {
        match kind {
            SimulatorKind::Oracle => &self.oracle,
            SimulatorKind::UnderTest => &self.under_test,
        }
    }

    /// The argument builder used for `kind`.
    pub fn builder(&self, kind: SimulatorKind) -> &dyn ArgumentBuilder {
        self.simulator(kind).builder.as_ref()
    }

    /// Builds the exact command line that [`SimulatorRunner::run`] would execute.
    ///
    /// # Arguments
    ///
    /// * `binary` - Compiled ELF image, passed as the sole positional argument.
    /// * `kind` - Which simulator to invoke.
    /// * `layout` - Memory map to translate into the simulator's syntax.
    pub fn command(
        &self,
        binary: &Path,
        kind: SimulatorKind,
        layout: &MemoryLayout,
    ) -> Result<CommandLine, LayoutError> {
        let simulator = self.simulator(kind);
        let mut command = CommandLine::new(&simulator.executable);
        command.extend(simulator.builder.arguments(binary, layout)?);
        Ok(command)
    }

    /// Runs `binary` under the simulator `kind`.
    ///
    /// A nonzero exit is data, not an error: the simulator under test may legitimately
    /// trap or halt with a nonzero code. On timeout the simulator is killed and the
    /// result carries [`crate::common::ExitState::TimedOut`].
    ///
    /// # Arguments
    ///
    /// * `binary` - Compiled ELF image.
    /// * `kind` - Which simulator to invoke.
    /// * `layout` - Memory map handed to the simulator.
    /// * `timeout` - Upper bound on the simulator's wall time.
    ///
    /// # Returns
    ///
    /// The captured behavior, or a [`RunError`] if the simulator could not be started.
    pub fn run(
        &self,
        binary: &Path,
        kind: SimulatorKind,
        layout: &MemoryLayout,
        timeout: Duration,
    ) -> Result<ExecutionResult, RunError> {
        let command = self.command(binary, kind, layout)?;
        debug!(target_sim = %kind, command = %command, "simulating");
        let captured = command.run(timeout).map_err(|source| RunError::Spawn {
            target: kind,
            program: command.program().to_path_buf(),
            source,
        })?;
        let result = ExecutionResult::from_capture(kind, &command, captured, self.encoding);
        if result.timed_out() {
            info!(target_sim = %kind, binary = %binary.display(), "simulator timed out");
        }
        Ok(result)
    }
}
