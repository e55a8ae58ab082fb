//! Validation of compiled images.

use std::fs;
use std::path::{Path, PathBuf};

use object::elf::PT_LOAD;
use object::read::elf::{ElfFile32, ProgramHeader};
use object::{Architecture, Endianness, Object, ObjectKind};

use crate::common::{CompileError, MemoryLayout};

/// A loadable segment of an image, by physical address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoadSegment {
    /// Physical load address.
    pub address: u64,
    /// Size in memory, including zero-filled bytes.
    pub size: u64,
}

/// A compiled program known to be a 32-bit little-endian RISC-V executable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElfImage {
    path: PathBuf,
    entry: u64,
    segments: Vec<LoadSegment>,
}

impl ElfImage {
    /// Reads and validates the image at `path`.
    pub fn read(path: &Path) -> Result<Self, CompileError> {
        let data = fs::read(path).map_err(|source| CompileError::Output {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(path, &data)
    }

    /// Validates `data` as the image stored at `path`.
    ///
    /// Rejects anything that is not an ELF32 little-endian RISC-V executable with
    /// at least one non-empty loadable segment.
    pub fn parse(path: &Path, data: &[u8]) -> Result<Self, CompileError> {
        let invalid = |reason: String| CompileError::InvalidOutput {
            path: path.to_path_buf(),
            reason,
        };

        let file = ElfFile32::<Endianness>::parse(data).map_err(|err| invalid(err.to_string()))?;
        if file.architecture() != Architecture::Riscv32 {
            return Err(invalid(format!(
                "architecture is {:?}",
                file.architecture()
            )));
        }
        if !file.is_little_endian() {
            return Err(invalid("image is big-endian".to_string()));
        }
        if file.kind() != ObjectKind::Executable {
            return Err(invalid(format!("object kind is {:?}", file.kind())));
        }

        let endian = file.endian();
        let segments: Vec<LoadSegment> = file
            .elf_program_headers()
            .iter()
            .filter(|header| header.p_type(endian) == PT_LOAD)
            .map(|header| LoadSegment {
                address: u64::from(header.p_paddr(endian)),
                size: u64::from(header.p_memsz(endian)),
            })
            .filter(|segment| segment.size > 0)
            .collect();
        if segments.is_empty() {
            return Err(invalid("no loadable segments".to_string()));
        }

        Ok(Self {
            path: path.to_path_buf(),
            entry: file.entry(),
            segments,
        })
    }

    /// Where the image lives on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Entry point address.
    pub const fn entry(&self) -> u64 {
        self.entry
    }

    /// Non-empty loadable segments in program-header order.
    pub fn segments(&self) -> &[LoadSegment] {
        &self.segments
    }

    /// The first segment not fully backed by `layout`, if any.
    pub fn first_uncovered(&self, layout: &MemoryLayout) -> Option<LoadSegment> {
        self.segments
            .iter()
            .copied()
            .find(|segment| !layout.contains(segment.address, segment.size))
    }
}
