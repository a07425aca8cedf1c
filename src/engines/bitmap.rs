//! The bitmap engine family: one bit per block, four interchangeable search policies.
//!
//! Grounded on `src/phallocators/allocators/BitmapAllocator.cpp` (original source) and spec.md
//! §4.3. `BitmapCore` holds the state common to all four policies (`InitializeImpl`, `Allocate`,
//! `Free`, `GetState`, `DumpImpl` in the original); each policy only supplies `FindFreeRegion`.

use alloc::vec::Vec;

use crate::bitarray::BitArray;
use crate::engine::Engine;
use crate::math::div_round_up;
use crate::region::{RegionBlocks, RegionType};

/// State shared by every bitmap search policy.
struct BitmapCore {
    bits: BitArray,
    metadata_base: u64,
    metadata_blocks: u64,
}

impl BitmapCore {
    fn build(regions: &[RegionBlocks], mem_size_blocks: u64, block_size: u64) -> Option<Self> {
        let bitmap_bytes = div_round_up(mem_size_blocks, 8);
        let metadata_blocks = div_round_up(bitmap_bytes, block_size).max(1);

        // First free normalised region whose byte extent covers the bitmap (spec.md §4.3).
        let host = regions
            .iter()
            .find(|r| r.region_type == RegionType::Free && r.size >= metadata_blocks)?;
        let metadata_base = host.base;

        // Everything starts out used; free regions clear their bits, then non-free regions set
        // theirs again (in case of any residual overlap), then the bitmap's own footprint is set.
        let mut bits = BitArray::new_filled(mem_size_blocks);
        for r in regions {
            if r.region_type == RegionType::Free {
                bits.mark_run(r.base, r.size, false);
            }
        }
        for r in regions {
            if r.region_type != RegionType::Free {
                bits.mark_run(r.base, r.size, true);
            }
        }
        bits.mark_run(metadata_base, metadata_blocks, true);

        Some(BitmapCore { bits, metadata_base, metadata_blocks })
    }

    fn get_state(&self, block: u64) -> RegionType {
        if block >= self.metadata_base && block < self.metadata_base + self.metadata_blocks {
            return RegionType::Allocator;
        }
        if self.bits.get(block) {
            RegionType::Reserved
        } else {
            RegionType::Free
        }
    }

    fn dump_bitmap_string(&self) -> alloc::string::String {
        let mut s = alloc::string::String::with_capacity(self.bits.len() as usize);
        for i in 0..self.bits.len() {
            s.push(if self.bits.get(i) { '1' } else { '0' });
        }
        s
    }
}

/// A search policy over a [`BitArray`]: finds a free run of at least `n_blocks` and returns its
/// base block, without marking anything used (the caller does that once afterwards).
pub trait BitmapFind: Default {
    fn find(&mut self, bits: &BitArray, n_blocks: u64) -> Option<u64>;
}

/// Scans `[lo, hi)` left to right for the first free run of at least `n_blocks`, skipping whole
/// words that are fully used or fully free (spec.md §4.3's "performance-critical primitive").
/// A run never spans the `lo`/`hi` boundary -- used both for a plain first-fit sweep (`lo=0,
/// hi=len`) and for next-fit's two half-open passes around its cursor.
pub(crate) fn scan_first_fit(bits: &BitArray, lo: u64, hi: u64, n_blocks: u64) -> Option<u64> {
    const WORD_BITS: u64 = crate::bitarray::WORD_BITS;

    let mut i = lo;
    let mut region_start = lo;
    let mut region_size = 0u64;
    let mut reset = true;

    while i < hi {
        let at_word_boundary = i % WORD_BITS == 0;

        if at_word_boundary && i + WORD_BITS <= hi && bits.word_all_set(i) {
            reset = true;
            i += WORD_BITS;
            continue;
        }

        if at_word_boundary && i + WORD_BITS <= hi && bits.word_all_clear(i) {
            if reset {
                region_start = i;
                region_size = 0;
                reset = false;
            }
            region_size += WORD_BITS;
            i += WORD_BITS;
            if region_size >= n_blocks {
                return Some(region_start);
            }
            continue;
        }

        if bits.get(i) {
            reset = true;
        } else {
            if reset {
                region_start = i;
                region_size = 0;
                reset = false;
            }
            region_size += 1;
            if region_size >= n_blocks {
                return Some(region_start);
            }
        }
        i += 1;
    }

    None
}

/// Full sweep picking the smallest (`want_min = true`) or largest free run of at least
/// `n_blocks`, tie-breaking on lowest base. Preserves the original's `i <= len` sentinel loop
/// bound so the final run gets flushed (Design Notes §9, "half-open vs. closed loop bounds").
fn scan_best_or_worst(bits: &BitArray, n_blocks: u64, want_min: bool) -> Option<u64> {
    let len = bits.len();
    let mut region_start = 0u64;
    let mut region_type = if len > 0 { bits.get(0) } else { true };

    let mut picked_start: Option<u64> = None;
    let mut picked_size: u64 = 0;

    for i in 0..=len {
        let boundary = i == len || bits.get(i) != region_type;
        if boundary {
            let region_size = i - region_start;
            if !region_type && region_size >= n_blocks {
                let better = match picked_start {
                    None => true,
                    Some(_) => {
                        if want_min {
                            picked_size > region_size
                        } else {
                            picked_size < region_size
                        }
                    }
                };
                if better {
                    picked_start = Some(region_start);
                    picked_size = region_size;
                }
            }
            region_start = i;
            if i < len {
                region_type = bits.get(i);
            }
        }
    }

    picked_start
}

#[derive(Default)]
pub struct FirstFitStrategy;

impl BitmapFind for FirstFitStrategy {
    fn find(&mut self, bits: &BitArray, n_blocks: u64) -> Option<u64> {
        scan_first_fit(bits, 0, bits.len(), n_blocks)
    }
}

/// Next-fit cursor. Open Question 1 (spec.md §9): a free run never wraps across index 0 -- the
/// scan is two independent half-open passes, `[next, len)` then `[0, next)`.
#[derive(Default)]
pub struct NextFitStrategy {
    next: u64,
}

impl BitmapFind for NextFitStrategy {
    fn find(&mut self, bits: &BitArray, n_blocks: u64) -> Option<u64> {
        let len = bits.len();
        if len == 0 {
            return None;
        }

        // Next-fit only makes sense if the block before `next` is used; otherwise it degenerates
        // to first-fit on this window anyway, so just restart from 0.
        if self.next > 0 && !bits.get(self.next - 1) {
            self.next = 0;
        }

        let found = scan_first_fit(bits, self.next, len, n_blocks)
            .or_else(|| scan_first_fit(bits, 0, self.next, n_blocks))?;

        self.next = (found + 1) % len;
        Some(found)
    }
}

#[derive(Default)]
pub struct BestFitStrategy;

impl BitmapFind for BestFitStrategy {
    fn find(&mut self, bits: &BitArray, n_blocks: u64) -> Option<u64> {
        scan_best_or_worst(bits, n_blocks, true)
    }
}

#[derive(Default)]
pub struct WorstFitStrategy;

impl BitmapFind for WorstFitStrategy {
    fn find(&mut self, bits: &BitArray, n_blocks: u64) -> Option<u64> {
        scan_best_or_worst(bits, n_blocks, false)
    }
}

/// A bitmap-backed engine parameterised over its search policy.
pub struct BitmapEngine<S: BitmapFind> {
    core: Option<BitmapCore>,
    strategy: S,
}

impl<S: BitmapFind> Default for BitmapEngine<S> {
    fn default() -> Self {
        BitmapEngine { core: None, strategy: S::default() }
    }
}

impl<S: BitmapFind> Engine for BitmapEngine<S> {
    fn initialize_impl(&mut self, regions: &[RegionBlocks], mem_size_blocks: u64, block_size: u64) -> bool {
        self.core = BitmapCore::build(regions, mem_size_blocks, block_size);
        self.core.is_some()
    }

    fn allocate(&mut self, n_blocks: u32) -> Option<u64> {
        let core = self.core.as_mut()?;
        let base = self.strategy.find(&core.bits, n_blocks as u64)?;
        core.bits.mark_run(base, n_blocks as u64, true);
        Some(base)
    }

    fn free(&mut self, base_block: u64, n_blocks: u32) {
        let Some(core) = self.core.as_mut() else { return };
        if base_block >= core.bits.len() || n_blocks as u64 > core.bits.len() - base_block {
            return;
        }
        // Mis-frees are a silent no-op; freeing metadata blocks or an out-of-range span is
        // simply ignored rather than corrupting the bitmap.
        if base_block < core.metadata_base + core.metadata_blocks && base_block + n_blocks as u64 > core.metadata_base
        {
            return;
        }
        core.bits.mark_run(base_block, n_blocks as u64, false);
    }

    fn get_state(&self, block: u64) -> RegionType {
        match &self.core {
            Some(core) => core.get_state(block),
            None => RegionType::Unmapped,
        }
    }

    fn measure_wasted_memory(&self, _block_size: u64) -> u64 {
        self.core.as_ref().map_or(0, |c| c.metadata_blocks)
    }

    fn dump_impl(&self) -> Vec<(&'static str, serde_json::Value)> {
        let Some(core) = &self.core else { return Vec::new() };
        alloc::vec![
            ("bitmap_size".into(), core.metadata_blocks.into()),
            ("bitmap".into(), core.dump_bitmap_string().into()),
        ]
    }
}

pub type BitmapFirstFit = BitmapEngine<FirstFitStrategy>;
pub type BitmapNextFit = BitmapEngine<NextFitStrategy>;
pub type BitmapBestFit = BitmapEngine<BestFitStrategy>;
pub type BitmapWorstFit = BitmapEngine<WorstFitStrategy>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::RegionType as RT;

    fn regions() -> Vec<RegionBlocks> {
        alloc::vec![
            RegionBlocks { base: 0, size: 2, region_type: RT::Reserved },
            RegionBlocks { base: 2, size: 100, region_type: RT::Free },
        ]
    }

    #[test]
    fn first_fit_allocates_from_free_region() {
        let mut engine = BitmapFirstFit::default();
        assert!(engine.initialize_impl(&regions(), 102, 4096));
        let block = engine.allocate(5).expect("should find free space");
        assert!(block >= 2);
        assert_eq!(engine.get_state(block), RT::Reserved);
        engine.free(block, 5);
        assert_eq!(engine.get_state(block), RT::Free);
    }

    #[test]
    fn strategy_distinctiveness() {
        // Fragmented free list [10, 4, 20, 6, 15] blocks separated by 1-block reserved spacers.
        let mut base = 0u64;
        let mut regions = Vec::new();
        for &len in &[10u64, 4, 20, 6, 15] {
            regions.push(RegionBlocks { base, size: len, region_type: RT::Free });
            base += len;
            regions.push(RegionBlocks { base, size: 1, region_type: RT::Reserved });
            base += 1;
        }
        let mem_size_blocks = base;

        let mut first = BitmapFirstFit::default();
        first.initialize_impl(&regions, mem_size_blocks, 4096);
        assert_eq!(first.allocate(5), Some(0));

        let mut best = BitmapBestFit::default();
        best.initialize_impl(&regions, mem_size_blocks, 4096);
        // length-6 run starts right after the length-20 run and its spacer: 10+1+4+1+20+1 = 37
        assert_eq!(best.allocate(5), Some(37));

        let mut worst = BitmapWorstFit::default();
        worst.initialize_impl(&regions, mem_size_blocks, 4096);
        // length-20 run starts at 10+1+4+1 = 16
        assert_eq!(worst.allocate(5), Some(16));
    }

    #[test]
    fn unmapped_outside_range() {
        let mut engine = BitmapFirstFit::default();
        engine.initialize_impl(&regions(), 102, 4096);
        assert_eq!(engine.get_state(102), RT::Unmapped);
    }
}
