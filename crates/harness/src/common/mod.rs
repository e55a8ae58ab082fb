//! Common types used throughout the harness.
//!
//! This module provides the building blocks shared by the toolchain, the
//! simulator runner, and the catalog. It includes:
//! 1. **Memory Layout:** Validated address regions and their coalesced span.
//! 2. **Error Handling:** Setup, compile, run, layout, and decode errors.
//! 3. **Processes:** Command lines and bounded execution with captured output.

/// Error taxonomy for the harness.
pub mod error;

/// Memory regions and layouts.
pub mod layout;

/// Subprocess execution with timeouts.
pub mod process;

pub use error::{CompileError, DecodeError, LayoutError, MissingPath, RunError, SetupError};
pub use layout::{ADDRESS_SPACE_END, MemoryLayout, MemoryRegion};
pub use process::{Captured, CommandLine, ExitState};
