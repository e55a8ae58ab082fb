//! Memory regions and layouts.
//!
//! A [`MemoryLayout`] is the single description of addressable memory that both
//! simulators are given. Each simulator spells it differently on its command line,
//! so the layout is the value the argument builders translate from, never the
//! other way round.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::LayoutError;

/// Exclusive end of the 32-bit physical address space.
pub const ADDRESS_SPACE_END: u64 = 1 << 32;

/// A contiguous, non-empty range of physical memory.
///
/// Invariant: `size > 0` and `base + size <= ADDRESS_SPACE_END`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawRegion")]
pub struct MemoryRegion {
    base: u64,
    size: u64,
}

impl MemoryRegion {
    /// Creates a region, checking it is non-empty and fits in 32 bits.
    ///
    /// # Arguments
    ///
    /// * `base` - First byte address of the region.
    /// * `size` - Length of the region in bytes.
    ///
    /// # Returns
    ///
    /// The region, or a [`LayoutError`] if it is empty or overflows the address space.
    pub fn new(base: u64, size: u64) -> Result<Self, LayoutError> {
        if size == 0 {
            return Err(LayoutError::EmptyRegion { base });
        }
        match base.checked_add(size) {
            Some(end) if end <= ADDRESS_SPACE_END => Ok(Self { base, size }),
            _ => Err(LayoutError::OutOfRange { base, size }),
        }
    }

    /// First byte address of the region.
    #[inline]
    pub const fn base(&self) -> u64 {
        self.base
    }

    /// Length of the region in bytes.
    #[inline]
    pub const fn size(&self) -> u64 {
        self.size
    }

    /// Exclusive end address of the region.
    #[inline]
    pub const fn end(&self) -> u64 {
        self.base + self.size
    }

    /// Returns true if `[start, start + len)` lies entirely inside this region.
    pub const fn contains(&self, start: u64, len: u64) -> bool {
        match start.checked_add(len) {
            Some(end) => start >= self.base && end <= self.end(),
            None => false,
        }
    }
}

impl fmt::Display for MemoryRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:#x}, +{:#x})", self.base, self.size)
    }
}

/// Region as written in a config file; numbers may be integers or `0x` strings.
#[derive(Deserialize)]
struct RawRegion {
    base: RawNumber,
    size: RawNumber,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawNumber {
    Int(u64),
    Text(String),
}

impl RawNumber {
    fn value(&self) -> Result<u64, LayoutError> {
        match self {
            Self::Int(value) => Ok(*value),
            Self::Text(text) => parse_number(text),
        }
    }
}

impl TryFrom<RawRegion> for MemoryRegion {
    type Error = LayoutError;

    fn try_from(raw: RawRegion) -> Result<Self, Self::Error> {
        Self::new(raw.base.value()?, raw.size.value()?)
    }
}

/// Parses an address or size written either in decimal or as `0x`-prefixed hex.
///
/// # Arguments
///
/// * `text` - The number as it appears on a command line or in a config file.
///
/// # Returns
///
/// The parsed value, or [`LayoutError::Parse`] naming the offending text.
pub fn parse_number(text: &str) -> Result<u64, LayoutError> {
    let trimmed = text.trim();
    let parsed = match trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => trimmed.parse(),
    };
    parsed.map_err(|err| LayoutError::Parse {
        text: text.to_string(),
        reason: err.to_string(),
    })
}

/// An ordered set of non-overlapping memory regions.
///
/// Regions are kept sorted by base address. Adjacent regions are legal and are
/// merged by [`MemoryLayout::span`] for simulators that only accept one region.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<MemoryRegion>", into = "Vec<MemoryRegion>")]
pub struct MemoryLayout {
    regions: Vec<MemoryRegion>,
}

impl MemoryLayout {
    /// Creates a layout from regions in any order.
    ///
    /// # Arguments
    ///
    /// * `regions` - The regions to expose; must be non-empty and non-overlapping.
    ///
    /// # Returns
    ///
    /// The sorted layout, or a [`LayoutError`] if it is empty or two regions overlap.
    pub fn new(mut regions: Vec<MemoryRegion>) -> Result<Self, LayoutError> {
        if regions.is_empty() {
            return Err(LayoutError::Empty);
        }
        regions.sort_by_key(MemoryRegion::base);
        for pair in regions.windows(2) {
            if let [first, second] = pair {
                if first.end() > second.base() {
                    return Err(LayoutError::Overlap {
                        first: first.base(),
                        second: second.base(),
                    });
                }
            }
        }
        Ok(Self { regions })
    }

    /// Creates a layout with exactly one region.
    pub fn single(base: u64, size: u64) -> Result<Self, LayoutError> {
        Ok(Self {
            regions: vec![MemoryRegion::new(base, size)?],
        })
    }

    /// The regions in ascending base order.
    pub fn regions(&self) -> &[MemoryRegion] {
        &self.regions
    }

    /// Merges adjacent regions into maximal contiguous runs.
    pub fn coalesced(&self) -> Vec<MemoryRegion> {
        let mut runs: Vec<MemoryRegion> = Vec::with_capacity(self.regions.len());
        for region in &self.regions {
            match runs.last_mut() {
                Some(last) if last.end() == region.base() => last.size += region.size(),
                _ => runs.push(*region),
            }
        }
        runs
    }

    /// The single contiguous region covering the whole layout, if there are no holes.
    pub fn span(&self) -> Option<MemoryRegion> {
        match self.coalesced().as_slice() {
            [only] => Some(*only),
            _ => None,
        }
    }

    /// Returns true if `[start, start + len)` is fully backed by memory in this layout.
    pub fn contains(&self, start: u64, len: u64) -> bool {
        self.coalesced()
            .iter()
            .any(|run| run.contains(start, len))
    }
}

impl Default for MemoryLayout {
    /// The map the oracle has always been run with: a low region starting at the
    /// host-interface mailbox and a second 16 MiB region directly above it.
    fn default() -> Self {
        Self {
            regions: vec![
                MemoryRegion {
                    base: 0x0000_2000,
                    size: 0x00FF_E000,
                },
                MemoryRegion {
                    base: 0x0100_0000,
                    size: 0x0100_0000,
                },
            ],
        }
    }
}

impl TryFrom<Vec<MemoryRegion>> for MemoryLayout {
    type Error = LayoutError;

    fn try_from(regions: Vec<MemoryRegion>) -> Result<Self, Self::Error> {
        Self::new(regions)
    }
}

impl From<MemoryLayout> for Vec<MemoryRegion> {
    fn from(layout: MemoryLayout) -> Self {
        layout.regions
    }
}

impl fmt::Display for MemoryLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, region) in self.regions.iter().enumerate() {
            if index > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{region}")?;
        }
        Ok(())
    }
}
