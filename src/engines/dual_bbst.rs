//! The dual-map tree engine: two balanced maps keyed by base, `free_map` and `reserved_map`
//! (spec.md §4.5). Allocation only ever walks `free_map`, so its cost is independent of how many
//! reserved runs exist and of any search-strategy choice -- natural ascending iteration is
//! first-fit-in-base-order by construction, which is why this engine provides only that one
//! policy (spec.md: "this engine provides only first-fit-in-base-order semantics by design").

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use crate::engine::Engine;
use crate::region::{self, RegionBlocks, RegionType};

#[derive(Default)]
pub struct DualBbstEngine {
    free_map: BTreeMap<u64, u64>,
    reserved_map: BTreeMap<u64, u64>,
}

impl Engine for DualBbstEngine {
    fn initialize_impl(&mut self, regions: &[RegionBlocks], _mem_size_blocks: u64, _block_size: u64) -> bool {
        self.free_map.clear();
        self.reserved_map.clear();
        for r in regions {
            match r.region_type {
                RegionType::Free => {
                    self.free_map.insert(r.base, r.size);
                }
                _ => {
                    self.reserved_map.insert(r.base, r.size);
                }
            }
        }
        true
    }

    fn allocate(&mut self, n_blocks: u32) -> Option<u64> {
        if n_blocks == 0 {
            return None;
        }
        let n_blocks = n_blocks as u64;

        let (&base, &size) = self.free_map.iter().find(|(_, &size)| size >= n_blocks)?;
        self.free_map.remove(&base);
        if size > n_blocks {
            self.free_map.insert(base + n_blocks, size - n_blocks);
        }
        self.reserved_map.insert(base, n_blocks);
        Some(base)
    }

    fn free(&mut self, base_block: u64, _n_blocks: u32) {
        let Some(size) = self.reserved_map.remove(&base_block) else { return };

        let mut new_base = base_block;
        let mut new_size = size;

        if let Some((&pred_base, &pred_size)) = self.free_map.range(..base_block).next_back() {
            if pred_base + pred_size == base_block {
                new_base = pred_base;
                new_size += pred_size;
                self.free_map.remove(&pred_base);
            }
        }

        if let Some((&succ_base, &succ_size)) = self.free_map.range(new_base + new_size..).next() {
            if succ_base == new_base + new_size {
                new_size += succ_size;
                self.free_map.remove(&succ_base);
            }
        }

        self.free_map.insert(new_base, new_size);
    }

    fn get_state(&self, block: u64) -> RegionType {
        if let Some((&base, &size)) = self.free_map.range(..=block).next_back() {
            if block < base + size {
                return RegionType::Free;
            }
        }
        if let Some((&base, &size)) = self.reserved_map.range(..=block).next_back() {
            if block < base + size {
                return RegionType::Reserved;
            }
        }
        RegionType::Unmapped
    }

    fn measure_wasted_memory(&self, block_size: u64) -> u64 {
        let entries = (self.free_map.len() + self.reserved_map.len()) as u64;
        let bytes = entries * (core::mem::size_of::<u64>() * 2) as u64;
        crate::math::div_round_up(bytes, block_size.max(1))
    }

    fn dump_impl(&self) -> Vec<(&'static str, serde_json::Value)> {
        let dump_map = |map: &BTreeMap<u64, u64>, region_type: RegionType| -> Vec<serde_json::Value> {
            map.iter()
                .map(|(&base, &size)| {
                    serde_json::json!({
                        "base": base,
                        "size": size,
                        "type": region::region_type_tag(region_type),
                    })
                })
                .collect()
        };
        alloc::vec![
            ("free_map", serde_json::Value::Array(dump_map(&self.free_map, RegionType::Free))),
            ("reserved_map", serde_json::Value::Array(dump_map(&self.reserved_map, RegionType::Reserved))),
        ]
    }
}

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
    fn allocate_skips_reserved_runs_entirely() {
        let mut engine = DualBbstEngine::default();
        assert!(engine.initialize_impl(&regions(), 102, 4096));

        let base = engine.allocate(10).expect("space available");
        assert_eq!(base, 2);
        assert_eq!(engine.get_state(2), RT::Reserved);
        assert_eq!(engine.get_state(11), RT::Reserved);
        assert_eq!(engine.get_state(12), RT::Free);
    }

    #[test]
    fn free_moves_run_back_and_merges() {
        let mut engine = DualBbstEngine::default();
        engine.initialize_impl(&regions(), 102, 4096);

        let a = engine.allocate(5).unwrap();
        let b = engine.allocate(5).unwrap();
        engine.free(a, 5);
        engine.free(b, 5);

        assert_eq!(engine.free_map.len(), 1, "adjacent frees should merge into one run");
        assert_eq!(*engine.free_map.get(&2).unwrap(), 100);
        assert!(engine.reserved_map.is_empty());
    }

    #[test]
    fn first_fit_in_base_order_is_the_only_policy() {
        let mut engine = DualBbstEngine::default();
        let mut base = 0u64;
        let mut regions = Vec::new();
        for &len in &[10u64, 4, 20, 6, 15] {
            regions.push(RegionBlocks { base, size: len, region_type: RT::Free });
            base += len;
            regions.push(RegionBlocks { base, size: 1, region_type: RT::Reserved });
            base += 1;
        }
        engine.initialize_impl(&regions, base, 4096);

        // Ascending base order always wins, regardless of run length: the 10-block run is first.
        assert_eq!(engine.allocate(5), Some(0));
    }

    #[test]
    fn freeing_unknown_base_is_a_no_op() {
        let mut engine = DualBbstEngine::default();
        engine.initialize_impl(&regions(), 102, 4096);
        engine.free(99999, 1);
        assert_eq!(engine.get_state(2), RT::Free);
    }
}
