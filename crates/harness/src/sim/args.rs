//! Simulator command-line builders.
//!
//! The two simulators accept the same memory map in different shapes:
//! 1. **Oracle (Spike):** `--isa=RV32IM -m<base>:<size>,<base>:<size>` with hex numbers.
//! 2. **Under test (rvsim):** `--mem-base <bytes> --mem-size <bytes>` with decimal numbers,
//!    and only one contiguous region.
//!
//! Each builder can also parse its own options back into a [`MemoryLayout`], which is
//! how the harness proves both simulators were handed the same memory.

use std::ffi::OsString;
use std::fmt;
use std::path::Path;

use super::SimulatorKind;
use crate::common::layout::parse_number;
use crate::common::{LayoutError, MemoryLayout, MemoryRegion};

/// Translates the shared memory layout into one simulator's native options.
pub trait ArgumentBuilder: fmt::Debug + Send + Sync {
    /// The simulator this builder speaks for.
    fn kind(&self) -> SimulatorKind;

    /// Options placed before the binary path, including the memory map.
    fn options(&self, layout: &MemoryLayout) -> Result<Vec<String>, LayoutError>;

    /// Recovers the memory layout described by a list of options.
    fn parse_layout(&self, options: &[String]) -> Result<MemoryLayout, LayoutError>;

    /// Full argument list: options followed by the binary as the sole positional argument.
    fn arguments(&self, binary: &Path, layout: &MemoryLayout) -> Result<Vec<OsString>, LayoutError> {
        let mut args: Vec<OsString> = self
            .options(layout)?
            .into_iter()
            .map(OsString::from)
            .collect();
        args.push(binary.as_os_str().to_owned());
        Ok(args)
    }
}

/// Argument builder for the reference simulator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleArgs {
    isa: String,
}

impl OracleArgs {
    /// Prefix of the memory-map option.
    pub const MEMORY_FLAG: &'static str = "-m";

    /// Creates a builder selecting `isa` (e.g. `RV32IM`).
    pub fn new(isa: impl Into<String>) -> Self {
        Self { isa: isa.into() }
    }

    /// Encodes every region as `base:size`, comma separated, after `-m`.
    pub fn memory_option(layout: &MemoryLayout) -> String {
        let regions: Vec<String> = layout
            .regions()
            .iter()
            .map(|region| format!("{:#x}:{:#x}", region.base(), region.size()))
            .collect();
        format!("{}{}", Self::MEMORY_FLAG, regions.join(","))
    }
}

impl ArgumentBuilder for OracleArgs {
    fn kind(&self) -> SimulatorKind {
        SimulatorKind::Oracle
    }

    fn options(&self, layout: &MemoryLayout) -> Result<Vec<String>, LayoutError> {
        Ok(vec![
            format!("--isa={}", self.isa),
            Self::memory_option(layout),
        ])
    }

    fn parse_layout(&self, options: &[String]) -> Result<MemoryLayout, LayoutError> {
        let memory = options
            .iter()
            .filter(|option| !option.starts_with("--"))
            .find_map(|option| option.strip_prefix(Self::MEMORY_FLAG))
            .ok_or_else(|| LayoutError::Parse {
                text: options.join(" "),
                reason: format!("no {} option", Self::MEMORY_FLAG),
            })?;

        let regions = memory
            .split(',')
            .map(|pair| {
                let (base, size) = pair.split_once(':').ok_or_else(|| LayoutError::Parse {
                    text: pair.to_string(),
                    reason: "expected <base>:<size>".to_string(),
                })?;
                MemoryRegion::new(parse_number(base)?, parse_number(size)?)
            })
            .collect::<Result<Vec<_>, _>>()?;
        MemoryLayout::new(regions)
    }
}

/// Argument builder for the simulator under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UnderTestArgs {
    max_cycles: Option<u64>,
}

impl UnderTestArgs {
    /// Option carrying the memory base address in bytes.
    pub const BASE_FLAG: &'static str = "--mem-base";
    /// Option carrying the memory size in bytes.
    pub const SIZE_FLAG: &'static str = "--mem-size";
    /// Option bounding the number of simulated cycles.
    pub const MAX_CYCLES_FLAG: &'static str = "--max-cycles";

    /// Creates a builder; `max_cycles` of `None` lets the simulator run until the program exits.
    pub const fn new(max_cycles: Option<u64>) -> Self {
        Self { max_cycles }
    }

    fn value_of<'a>(options: &'a [String], flag: &str) -> Result<&'a str, LayoutError> {
        options
            .iter()
            .position(|option| option == flag)
            .and_then(|index| options.get(index + 1))
            .map(String::as_str)
            .ok_or_else(|| LayoutError::Parse {
                text: options.join(" "),
                reason: format!("no value for {flag}"),
            })
    }
}

impl ArgumentBuilder for UnderTestArgs {
    fn kind(&self) -> SimulatorKind {
        SimulatorKind::UnderTest
    }

    fn options(&self, layout: &MemoryLayout) -> Result<Vec<String>, LayoutError> {
        let span = layout.span().ok_or_else(|| LayoutError::Discontiguous {
            simulator: SimulatorKind::UnderTest,
            layout: layout.to_string(),
        })?;
        let mut options = vec![
            Self::BASE_FLAG.to_string(),
            span.base().to_string(),
            Self::SIZE_FLAG.to_string(),
            span.size().to_string(),
        ];
        if let Some(cycles) = self.max_cycles {
            options.push(Self::MAX_CYCLES_FLAG.to_string());
            options.push(cycles.to_string());
        }
        Ok(options)
    }

    fn parse_layout(&self, options: &[String]) -> Result<MemoryLayout, LayoutError> {
        let base = parse_number(Self::value_of(options, Self::BASE_FLAG)?)?;
        let size = parse_number(Self::value_of(options, Self::SIZE_FLAG)?)?;
        MemoryLayout::single(base, size)
    }
}
