//! Differential test harness for the rvsim RISC-V simulator.
//!
//! This crate checks a simulator under test against a reference simulator (the oracle). It provides:
//! 1. **Toolchain:** Compiles bare-metal test programs plus a fixed runtime into a RISC-V ELF image.
//! 2. **Simulators:** Runs an image under either simulator with an equivalent memory map and bounded time.
//! 3. **Comparison:** Checks decoded stdout against a literal expectation or against the oracle's run.
//! 4. **Catalog:** Discovers test programs, drives each case through its stages, and aggregates a report.
//!
//! Configuration is an immutable [`Config`] record built once and passed by reference
//! into every component; nothing in this crate reads global state.

/// Shared types: memory layouts, error taxonomy, and bounded subprocess execution.
pub mod common;
/// Harness configuration (tool paths, target flags, limits) and preflight checks.
pub mod config;
/// Cross-compilation of test programs into ELF images.
pub mod toolchain;
/// Simulator identities, argument builders, and the simulator runner.
pub mod sim;
/// Output equivalence checking.
pub mod compare;
/// Test discovery, the per-case state machine, and reporting.
pub mod catalog;

/// Root configuration type; use `Config::default()` or load from JSON.
pub use crate::config::Config;
/// A discovered set of test cases.
pub use crate::catalog::{Catalog, Report, TestCase, TestOutcome, TestRunner};
/// Memory map handed to both simulators.
pub use crate::common::{MemoryLayout, MemoryRegion};
/// Simulator identity and captured execution result.
pub use crate::sim::{ExecutionResult, SimulatorKind, SimulatorRunner};
/// Toolchain invoker and its request type.
pub use crate::toolchain::{CompilationRequest, Toolchain};
