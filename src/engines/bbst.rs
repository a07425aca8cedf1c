//! The balanced single-map tree engine: the same contract as [`crate::engines::bst`], backed by
//! `alloc::collections::BTreeMap` instead of a hand-rolled tree, so insert/delete/predecessor/
//! successor are all `O(log n)` (spec.md §4.5, §5) without this crate having to implement its own
//! rebalancing.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use crate::engine::Engine;
use crate::region::{self, RegionBlocks, RegionType};

#[derive(Debug, Clone, Copy)]
struct Run {
    size: u64,
    region_type: RegionType,
}

struct BbstCore {
    map: BTreeMap<u64, Run>,
}

impl BbstCore {
    fn build(regions: &[RegionBlocks]) -> Self {
        let map = regions.iter().map(|r| (r.base, Run { size: r.size, region_type: r.region_type })).collect();
        BbstCore { map }
    }

    fn get_state(&self, block: u64) -> RegionType {
        match self.map.range(..=block).next_back() {
            Some((&base, run)) if block < base + run.size => run.region_type,
            _ => RegionType::Unmapped,
        }
    }

    /// Splits (or fully consumes) the free run based at `base`, mirroring `ListCore::reserve`.
    fn reserve(&mut self, base: u64, n_blocks: u64, region_type: RegionType) -> u64 {
        let size = self.map[&base].size;
        if size == n_blocks {
            self.map.get_mut(&base).unwrap().region_type = region_type;
        } else {
            self.map.remove(&base);
            self.map.insert(base, Run { size: n_blocks, region_type });
            self.map.insert(base + n_blocks, Run { size: size - n_blocks, region_type: RegionType::Free });
        }
        base
    }

    fn free(&mut self, base: u64) {
        let Some(run) = self.map.get(&base).copied() else { return };
        if run.region_type == RegionType::Free {
            return;
        }

        let mut new_base = base;
        let mut new_size = run.size;

        if let Some((&pred_base, pred)) = self.map.range(..base).next_back() {
            if pred.region_type == RegionType::Free {
                new_base = pred_base;
                new_size += pred.size;
                self.map.remove(&pred_base);
            }
        }

        if let Some((&succ_base, succ)) = self.map.range(base + 1..).next() {
            if succ.region_type == RegionType::Free {
                new_size += succ.size;
                self.map.remove(&succ_base);
            }
        }

        self.map.remove(&base);
        self.map.insert(new_base, Run { size: new_size, region_type: RegionType::Free });
    }

    fn dump_entries(&self) -> Vec<serde_json::Value> {
        self.map
            .iter()
            .map(|(&base, run)| {
                serde_json::json!({
                    "base": base,
                    "size": run.size,
                    "type": region::region_type_tag(run.region_type),
                })
            })
            .collect()
    }
}

/// A search policy over a [`BbstCore`]: finds a free run of at least `n_blocks`, returning its
/// base key.
pub trait BbstFind: Default {
    fn find(&mut self, core: &BbstCore, n_blocks: u64) -> Option<u64>;
    fn on_delete(&mut self, _base: u64) {}
}

#[derive(Default)]
pub struct FirstFitStrategy;

impl BbstFind for FirstFitStrategy {
    fn find(&mut self, core: &BbstCore, n_blocks: u64) -> Option<u64> {
        core.map.iter().find(|(_, r)| r.region_type == RegionType::Free && r.size >= n_blocks).map(|(&b, _)| b)
    }
}

/// Next-fit cursor keyed by base. Cleared whenever its key is deleted.
#[derive(Default)]
pub struct NextFitStrategy {
    next: Option<u64>,
}

impl BbstFind for NextFitStrategy {
    fn find(&mut self, core: &BbstCore, n_blocks: u64) -> Option<u64> {
        if core.map.is_empty() {
            return None;
        }
        let start = self.next.unwrap_or(*core.map.keys().next().unwrap());

        let tail = core.map.range(start..).find(|(_, r)| r.region_type == RegionType::Free && r.size >= n_blocks);
        let found = tail.or_else(|| {
            core.map.range(..start).find(|(_, r)| r.region_type == RegionType::Free && r.size >= n_blocks)
        });

        let (&base, _) = found?;
        self.next = Some(base);
        Some(base)
    }

    fn on_delete(&mut self, base: u64) {
        if self.next == Some(base) {
            self.next = None;
        }
    }
}

#[derive(Default)]
pub struct BestFitStrategy;

impl BbstFind for BestFitStrategy {
    fn find(&mut self, core: &BbstCore, n_blocks: u64) -> Option<u64> {
        core.map
            .iter()
            .filter(|(_, r)| r.region_type == RegionType::Free && r.size >= n_blocks)
            .min_by_key(|(&base, r)| (r.size, base))
            .map(|(&b, _)| b)
    }
}

#[derive(Default)]
pub struct WorstFitStrategy;

impl BbstFind for WorstFitStrategy {
    fn find(&mut self, core: &BbstCore, n_blocks: u64) -> Option<u64> {
        core.map
            .iter()
            .filter(|(_, r)| r.region_type == RegionType::Free && r.size >= n_blocks)
            .max_by_key(|(&base, r)| (r.size, core::cmp::Reverse(base)))
            .map(|(&b, _)| b)
    }
}

/// A `BTreeMap`-backed engine parameterised over its search policy.
pub struct BbstEngine<S: BbstFind> {
    core: Option<BbstCore>,
    strategy: S,
}

impl<S: BbstFind> Default for BbstEngine<S> {
    fn default() -> Self {
        BbstEngine { core: None, strategy: S::default() }
    }
}

impl<S: BbstFind> Engine for BbstEngine<S> {
    fn initialize_impl(&mut self, regions: &[RegionBlocks], _mem_size_blocks: u64, _block_size: u64) -> bool {
        self.core = Some(BbstCore::build(regions));
        true
    }

    fn allocate(&mut self, n_blocks: u32) -> Option<u64> {
        let core = self.core.as_mut()?;
        let base = self.strategy.find(core, n_blocks as u64)?;
        Some(core.reserve(base, n_blocks as u64, RegionType::Reserved))
    }

    fn free(&mut self, base_block: u64, _n_blocks: u32) {
        let Some(core) = self.core.as_mut() else { return };
        self.strategy.on_delete(base_block);
        core.free(base_block);
    }

    fn get_state(&self, block: u64) -> RegionType {
        self.core.as_ref().map_or(RegionType::Unmapped, |c| c.get_state(block))
    }

    fn measure_wasted_memory(&self, block_size: u64) -> u64 {
        let Some(core) = &self.core else { return 0 };
        let bytes = core.map.len() as u64 * (core::mem::size_of::<u64>() + core::mem::size_of::<Run>()) as u64;
        crate::math::div_round_up(bytes, block_size.max(1))
    }

    fn dump_impl(&self) -> Vec<(&'static str, serde_json::Value)> {
        let Some(core) = &self.core else { return Vec::new() };
        alloc::vec![("tree", serde_json::Value::Array(core.dump_entries()))]
    }
}

pub type BbstFirstFit = BbstEngine<FirstFitStrategy>;
pub type BbstNextFit = BbstEngine<NextFitStrategy>;
pub type BbstBestFit = BbstEngine<BestFitStrategy>;
pub type BbstWorstFit = BbstEngine<WorstFitStrategy>;
