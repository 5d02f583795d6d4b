//! Memory capability lookups. The stager only asks whether an address range is
//! readable or writable by the DMA engine; `MemoryMap` answers from a region
//! table, `HostMemory` treats all memory as DMA-capable.
use std::{collections::BTreeMap, ops::Range};

use bitflags::bitflags;

use crate::spi::bus::{SpiError, SpiResult};

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
    pub struct MemFlags: u32 {
        const DMA_READ  = 0b1;
        const DMA_WRITE = 0b10;
        const EXEC      = 0b100;
        const DMA       = Self::DMA_READ.bits() | Self::DMA_WRITE.bits();
    }
}

pub trait DmaCapability: Send + Sync {
    fn is_dma_accessible(&self, range: Range<usize>) -> bool;

    fn is_dma_writable(&self, range: Range<usize>) -> bool {
        self.is_dma_accessible(range)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct HostMemory;

impl DmaCapability for HostMemory {
    fn is_dma_accessible(&self, _range: Range<usize>) -> bool {
        true
    }
}

#[derive(Clone, Debug)]
struct Region {
    name: String,
    end: usize,
    flags: MemFlags,
}

/// Region table keyed by start address. Addresses outside every region get
/// the map's default flags.
#[derive(Clone, Debug)]
pub struct MemoryMap {
    regions: BTreeMap<usize, Region>,
    default: MemFlags,
}

impl Default for MemoryMap {
    fn default() -> Self {
        Self::new(MemFlags::DMA)
    }
}

impl MemoryMap {
    pub fn new(default: MemFlags) -> Self {
        Self {
            regions: BTreeMap::new(),
            default,
        }
    }

    pub fn map_region(
        &mut self,
        name: impl Into<String>,
        range: Range<usize>,
        flags: MemFlags,
    ) -> SpiResult<()> {
        let name = name.into();
        if range.is_empty() {
            return Err(SpiError::InvalidConfig {
                reason: "memory region is empty",
            });
        }
        if self.overlaps(&range) {
            return Err(SpiError::InvalidConfig {
                reason: "memory region overlaps an existing region",
            });
        }
        log::trace!(
            "memory region '{name}' 0x{:08X}..0x{:08X} {flags:?}",
            range.start,
            range.end
        );
        self.regions.insert(
            range.start,
            Region {
                name,
                end: range.end,
                flags,
            },
        );
        Ok(())
    }

    /// Registers the memory backing `bytes`.
    pub fn map_slice(
        &mut self,
        name: impl Into<String>,
        bytes: &[u8],
        flags: MemFlags,
    ) -> SpiResult<()> {
        let start = bytes.as_ptr() as usize;
        self.map_region(name, start..start + bytes.len(), flags)
    }

    pub fn region_name(&self, address: usize) -> Option<&str> {
        self.region_at(address).map(|(_, region)| region.name.as_str())
    }

    /// Flags every byte of `range` has in common.
    pub fn flags_for(&self, range: Range<usize>) -> MemFlags {
        if range.is_empty() {
            return self.default;
        }
        let mut flags = MemFlags::all();
        let mut cursor = range.start;
        while cursor < range.end {
            match self.region_at(cursor) {
                Some((_, region)) => {
                    flags &= region.flags;
                    cursor = region.end;
                }
                None => {
                    flags &= self.default;
                    cursor = self
                        .regions
                        .range(cursor..)
                        .next()
                        .map(|(start, _)| *start)
                        .unwrap_or(range.end);
                }
            }
        }
        flags
    }

    fn region_at(&self, address: usize) -> Option<(usize, &Region)> {
        self.regions
            .range(..=address)
            .next_back()
            .and_then(|(start, region)| {
                if address < region.end {
                    Some((*start, region))
                } else {
                    None
                }
            })
    }

    fn overlaps(&self, range: &Range<usize>) -> bool {
        if self.region_at(range.start).is_some() {
            return true;
        }
        self.regions.range(range.start..range.end).next().is_some()
    }
}

impl DmaCapability for MemoryMap {
    fn is_dma_accessible(&self, range: Range<usize>) -> bool {
        self.flags_for(range).contains(MemFlags::DMA_READ)
    }

    fn is_dma_writable(&self, range: Range<usize>) -> bool {
        self.flags_for(range).contains(MemFlags::DMA_WRITE)
    }
}
