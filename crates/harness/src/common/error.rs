//! Error taxonomy for the harness.
//!
//! This module separates failures by how far they reach:
//! 1. **Setup errors:** Missing tools, bad configuration, unreadable catalog. Fatal to the whole run.
//! 2. **Compile errors:** Toolchain failures. Fatal to one test case.
//! 3. **Run errors:** A simulator could not be started for one case.
//! 4. **Layout errors:** A memory map that is invalid or not expressible for a simulator.
//! 5. **Decode errors:** Captured output that is not valid text; stored, never raised.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use super::process::ExitState;
use crate::sim::{SimulatorKind, TextEncoding};

/// A required tool or directory that preflight could not find.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingPath {
    /// What the path is used for (e.g. "compiler", "runtime file").
    pub role: &'static str,
    /// The path as configured.
    pub path: PathBuf,
}

impl fmt::Display for MissingPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.role, self.path.display())
    }
}

fn list_missing(missing: &[MissingPath]) -> String {
    missing
        .iter()
        .map(|entry| format!("\n  {entry}"))
        .collect()
}

/// Failures that abort the run before any test case executes.
#[derive(Debug, Error)]
pub enum SetupError {
    /// One or more required tools or directories do not exist.
    #[error("missing required tools or directories:{}", list_missing(.0))]
    MissingPaths(Vec<MissingPath>),

    /// The config file could not be read.
    #[error("could not read config file `{}`: {source}", .path.display())]
    ConfigRead {
        /// Config file path.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// The config file is not valid JSON for [`crate::Config`].
    #[error("invalid config file `{}`: {source}", .path.display())]
    ConfigParse {
        /// Config file path.
        path: PathBuf,
        /// Underlying parse error.
        source: serde_json::Error,
    },

    /// The configured memory layout is invalid.
    #[error("invalid memory layout: {0}")]
    Layout(#[from] LayoutError),

    /// The test filter is not a valid regular expression.
    #[error("invalid test filter `{pattern}`: {source}")]
    Filter {
        /// Pattern as given on the command line.
        pattern: String,
        /// Underlying regex error.
        source: regex::Error,
    },

    /// The programs directory or an expected-output file could not be read.
    #[error("could not read test catalog at `{}`: {source}", .path.display())]
    Catalog {
        /// Path that failed.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// A scratch directory could not be created.
    #[error("could not create scratch directory `{}`: {source}", .path.display())]
    Scratch {
        /// Directory that could not be created.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },
}

/// Failures of a single compilation.
#[derive(Debug, Error)]
pub enum CompileError {
    /// A source, runtime file, or linker script does not exist.
    #[error("{role} `{}` does not exist", .path.display())]
    MissingInput {
        /// What the input is (e.g. "source file", "linker script").
        role: &'static str,
        /// The missing path.
        path: PathBuf,
    },

    /// The output directory could not be prepared.
    #[error("could not prepare output `{}`: {source}", .path.display())]
    Output {
        /// Output path being prepared.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// The compiler could not be started.
    #[error("could not start compiler `{}`: {source}", .program.display())]
    Spawn {
        /// Compiler executable.
        program: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// The compiler exited unsuccessfully.
    #[error("compiler failed with {status}:\n{stderr}")]
    Failed {
        /// How the compiler exited.
        status: ExitState,
        /// Captured standard error.
        stderr: String,
    },

    /// The compiler did not finish in time and was killed.
    #[error("compiler did not finish within {:.1}s", .timeout.as_secs_f64())]
    TimedOut {
        /// The bound that was exceeded.
        timeout: Duration,
    },

    /// The compiler succeeded but its output is not a usable RISC-V executable.
    #[error("compiler output `{}` is not a 32-bit RISC-V executable: {reason}", .path.display())]
    InvalidOutput {
        /// Output path.
        path: PathBuf,
        /// Why the image was rejected.
        reason: String,
    },
}

/// Failures that prevent a simulator from producing an [`crate::ExecutionResult`].
#[derive(Debug, Error)]
pub enum RunError {
    /// The memory layout cannot be expressed in the simulator's syntax.
    #[error(transparent)]
    Layout(#[from] LayoutError),

    /// The simulator executable could not be started.
    #[error("could not start {target} `{}`: {source}", .program.display())]
    Spawn {
        /// Which simulator.
        target: SimulatorKind,
        /// Simulator executable.
        program: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },
}

/// Invalid or untranslatable memory layouts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayoutError {
    /// A layout must contain at least one region.
    #[error("memory layout has no regions")]
    Empty,

    /// A region of zero bytes.
    #[error("memory region at {base:#x} has zero size")]
    EmptyRegion {
        /// Region base.
        base: u64,
    },

    /// A region reaching past the 32-bit address space.
    #[error("memory region {base:#x}+{size:#x} exceeds the 32-bit address space")]
    OutOfRange {
        /// Region base.
        base: u64,
        /// Region size.
        size: u64,
    },

    /// Two regions share addresses.
    #[error("memory regions at {first:#x} and {second:#x} overlap")]
    Overlap {
        /// Lower region base.
        first: u64,
        /// Higher region base.
        second: u64,
    },

    /// The simulator accepts one contiguous region but the layout has holes.
    #[error("{simulator} accepts a single contiguous region, but the layout is {layout}")]
    Discontiguous {
        /// Which simulator.
        simulator: SimulatorKind,
        /// The layout as displayed.
        layout: String,
    },

    /// A memory argument could not be parsed back into a layout.
    #[error("could not parse memory argument `{text}`: {reason}")]
    Parse {
        /// The offending text.
        text: String,
        /// What was wrong with it.
        reason: String,
    },
}

/// Captured output that is not valid in the expected text encoding.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("output is not valid {encoding}: byte {byte:#04x} at offset {offset}")]
pub struct DecodeError {
    /// Encoding that was expected.
    pub encoding: TextEncoding,
    /// Offset of the first invalid byte.
    pub offset: usize,
    /// The first invalid byte.
    pub byte: u8,
}
