//! Region bookkeeping: the types callers build an allocator out of, and the normaliser that turns
//! a possibly-overlapping, possibly-unsorted `Region` table into a clean partition.
//!
//! Grounded on `src/phallocators/allocators/Allocator.cpp`'s `DetermineMemoryRange` and
//! `FixOverlappingRegions` (original source) and spec.md §4.1.

use alloc::vec::Vec;
use serde::{Deserialize, Serialize};

/// The classification of a span of blocks, as reported by [`crate::BlockAllocator::get_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegionType {
    /// Available for allocation.
    Free,
    /// Claimed by the caller before the allocator took over (e.g. firmware-reserved memory).
    Reserved,
    /// Outside the managed address range entirely.
    Unmapped,
    /// Claimed by the engine itself for bookkeeping (bitmap, pool, buddy tree, ...).
    Allocator,
}

/// A caller-supplied span of physical memory, at byte granularity. Regions may be unsorted and
/// may overlap; [`normalize`] resolves that before any engine sees them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    /// Byte offset of the region's start, relative to an arbitrary common origin (not necessarily
    /// `0` -- the normaliser computes `mem_base` as the minimum over all regions).
    pub base: u64,
    /// Size of the region in bytes.
    pub size: u64,
    /// `Free` or `Reserved`. Other variants are not valid allocator input.
    pub region_type: RegionType,
}

impl Region {
    pub fn new(base: u64, size: u64, region_type: RegionType) -> Self {
        debug_assert!(
            matches!(region_type, RegionType::Free | RegionType::Reserved),
            "input regions must be Free or Reserved"
        );
        Region { base, size, region_type }
    }
}

/// A normalised, block-granularity run produced by [`normalize`]. `RegionBlocks` entries returned
/// from the same call are sorted ascending by `base` and never overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionBlocks {
    pub base: u64,
    pub size: u64,
    pub region_type: RegionType,
}

/// The memory range spanned by a set of input regions, computed by [`normalize`] as a side effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemRange {
    pub mem_base: u64,
    pub mem_size_bytes: u64,
}

/// Short tag used by every engine's `dump_impl` for the `type` field of a dumped run.
pub(crate) fn region_type_tag(t: RegionType) -> &'static str {
    match t {
        RegionType::Free => "free",
        RegionType::Reserved => "reserved",
        RegionType::Unmapped => "unmapped",
        RegionType::Allocator => "allocator",
    }
}

/// Computes the byte range spanned by `regions`: `mem_base` is the minimum base, `mem_size_bytes`
/// is `(maximum end) - mem_base`. Mirrors `Allocator::DetermineMemoryRange`.
pub fn determine_mem_range(regions: &[Region]) -> MemRange {
    let mem_base = regions.iter().map(|r| r.base).min().unwrap_or(0);
    let mem_end = regions.iter().map(|r| r.base + r.size).max().unwrap_or(0);
    MemRange { mem_base, mem_size_bytes: mem_end - mem_base }
}

/// Converts caller `Region`s (byte granularity, relative to `mem_base`) into a sorted,
/// non-overlapping `RegionBlocks` partition (block granularity).
///
/// Block-conversion rule (spec.md §4.1): reserved regions round outward (`floor` base,
/// `ceil` size) so they claim every block they touch; free regions round inward (`ceil` base,
/// `floor` size) so they only offer whole blocks fully inside them. Combined with
/// reserved-wins-over-free overlap resolution below, no block is ever both free and (partially)
/// reserved.
pub fn normalize(block_size: u64, mem_base: u64, regions: &[Region]) -> Vec<RegionBlocks> {
    debug_assert!(block_size > 0);

    let mut converted: Vec<RegionBlocks> = regions
        .iter()
        .map(|r| {
            let rel_base = r.base - mem_base;
            let (base, size) = match r.region_type {
                RegionType::Reserved => (rel_base / block_size, crate::math::div_round_up(r.size, block_size)),
                RegionType::Free => (crate::math::div_round_up(rel_base, block_size), r.size / block_size),
                _ => unreachable!("input regions are Free or Reserved"),
            };
            RegionBlocks { base, size, region_type: r.region_type }
        })
        .collect();

    // Sort by (base, size) ascending, same comparator as `RegionCompare` in the original source.
    converted.sort_by(|a, b| a.base.cmp(&b.base).then(a.size.cmp(&b.size)));

    fix_overlaps(&mut converted);
    converted
}

/// Sweeps a `(base, size)`-sorted run list, dropping zero-sized entries, merging adjacent
/// same-type runs that touch or overlap, and resolving different-type overlaps in favour of the
/// non-`Free` run. Mirrors `Allocator::FixOverlappingRegions`.
fn fix_overlaps(regions: &mut Vec<RegionBlocks>) {
    // Drop zero-sized entries first; the original interleaves this with the merge sweep via an
    // in-place array-delete, but doing it as a separate retain pass is equivalent and simpler.
    regions.retain(|r| r.size > 0);

    let mut i = 0;
    while i + 1 < regions.len() {
        let a = regions[i];
        let b = regions[i + 1];
        let a_end = a.base + a.size;

        if a.region_type == b.region_type && a_end >= b.base {
            let end = a_end.max(b.base + b.size);
            regions[i].size = end - a.base;
            regions.remove(i + 1);
            // Re-examine the merged entry against its new neighbour.
            continue;
        }

        if a.region_type != b.region_type && a_end > b.base {
            let overlap = a_end - b.base;

            if a.region_type != RegionType::Free {
                // Reserved (or Allocator) wins: shrink or remove the free run that follows.
                if overlap < b.size {
                    regions[i + 1].base += overlap;
                    regions[i + 1].size -= overlap;
                } else {
                    regions.remove(i + 1);
                    continue;
                }
            } else if overlap < a.size {
                regions[i].size -= overlap;
            } else {
                regions.remove(i);
                continue;
            }
        }

        i += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(base: u64, size: u64, t: RegionType) -> Region {
        Region::new(base, size, t)
    }

    #[test]
    fn reserved_rounds_outward_free_rounds_inward() {
        let block_size = 4096;
        let regions = [
            region(0x000000, 0x000500, RegionType::Reserved),
            region(0x000500, 0x07FB00, RegionType::Free),
        ];
        let range = determine_mem_range(&regions);
        let blocks = normalize(block_size, range.mem_base, &regions);

        // Reserved [0, 0x500) claims block 0 fully (touches the first block).
        assert_eq!(blocks[0].base, 0);
        assert_eq!(blocks[0].region_type, RegionType::Reserved);

        // Free region starts after a round-up, ends with a round-down -- never overlaps the
        // reserved block.
        assert!(blocks.iter().all(|b| b.region_type != RegionType::Free || b.base >= blocks[0].base + blocks[0].size));
    }

    #[test]
    fn overlap_resolves_in_favour_of_reserved() {
        let block_size = 4096;
        // deliberately disordered & overlapping, same shape as spec.md Scenario C
        let mem_size = 32 * 1024 * 1024u64;
        let regions = [
            region(0x100000, mem_size - 0x100000, RegionType::Free),
            region(0x080000, 0x075000, RegionType::Reserved),
            region(0x000000, 0x000500, RegionType::Reserved),
            region(0x0F0000, 0x010000, RegionType::Reserved),
            region(0x000200, 0x090000, RegionType::Free),
        ];
        let range = determine_mem_range(&regions);
        let blocks = normalize(block_size, range.mem_base, &regions);

        for w in blocks.windows(2) {
            assert!(w[0].base + w[0].size <= w[1].base, "overlap between {:?} and {:?}", w[0], w[1]);
        }
        // The reserved run starting at block 0 keeps its full extent; nothing Free covers it.
        let first = blocks[0];
        assert_eq!(first.base, 0);
        assert_eq!(first.region_type, RegionType::Reserved);
    }

    #[test]
    fn zero_sized_regions_are_dropped() {
        let block_size = 4096;
        let regions = [region(0, 0, RegionType::Free), region(4096, 4096, RegionType::Free)];
        let range = determine_mem_range(&regions);
        let blocks = normalize(block_size, range.mem_base, &regions);
        assert_eq!(blocks.len(), 1);
    }
}
