//! The single-map tree engine family: runs live keyed by `base` in an ordered associative
//! container, with four search policies mirroring the linked-list family (spec.md §4.5).
//!
//! `BstEngine` is the unbalanced variant: a plain arena-backed binary search tree with no
//! rebalancing, accepting the documented O(n) worst-case depth (spec.md §4.5, §5). `BbstEngine`
//! (engines/bbst.rs) is its balanced sibling, backed by `alloc::collections::BTreeMap` instead of
//! a hand-rolled tree.
//!
//! Design Notes §9's Open Question 3 (BST pool exhaustion before growth) is resolved the same way
//! the data model's "tree engines hold metadata externally" note already implies: the arena is an
//! ordinary heap-backed `Arena<Node>` that grows like a `Vec` (no static pool, no managed-range
//! carve-out), so exhaustion simply cannot happen short of the allocator itself running out of
//! heap memory.

use alloc::vec::Vec;

use crate::arena::{Arena, Handle};
use crate::engine::Engine;
use crate::region::{self, RegionBlocks, RegionType};

#[derive(Debug, Clone, Copy)]
struct Node {
    base: u64,
    size: u64,
    region_type: RegionType,
    parent: Option<Handle>,
    left: Option<Handle>,
    right: Option<Handle>,
}

struct BstCore {
    arena: Arena<Node>,
    root: Option<Handle>,
}

impl BstCore {
    fn new() -> Self {
        BstCore { arena: Arena::new(), root: None }
    }

    /// Inserts every normalised region in input order. No balancing is attempted -- an
    /// adversarial (already-sorted) input produces a degenerate chain, which is the accepted
    /// worst case for this variant (spec.md §4.5, §5).
    fn build(regions: &[RegionBlocks]) -> Self {
        let mut core = BstCore::new();
        for r in regions {
            core.insert(r.base, r.size, r.region_type);
        }
        core
    }

    fn insert(&mut self, base: u64, size: u64, region_type: RegionType) -> Handle {
        let handle = self.arena.insert(Node { base, size, region_type, parent: None, left: None, right: None });
        let Some(root) = self.root else {
            self.root = Some(handle);
            return handle;
        };

        let mut cur = root;
        loop {
            let cur_base = self.arena.get(cur).base;
            let side = if base < cur_base { self.arena.get(cur).left } else { self.arena.get(cur).right };
            match side {
                Some(next) => cur = next,
                None => {
                    if base < cur_base {
                        self.arena.get_mut(cur).left = Some(handle);
                    } else {
                        self.arena.get_mut(cur).right = Some(handle);
                    }
                    self.arena.get_mut(handle).parent = Some(cur);
                    return handle;
                }
            }
        }
    }

    fn find_by_base(&self, base: u64) -> Option<Handle> {
        let mut cur = self.root;
        while let Some(h) = cur {
            let n = self.arena.get(h);
            if n.base == base {
                return Some(h);
            }
            cur = if base < n.base { n.left } else { n.right };
        }
        None
    }

    fn leftmost(&self, mut h: Handle) -> Handle {
        while let Some(l) = self.arena.get(h).left {
            h = l;
        }
        h
    }

    fn rightmost(&self, mut h: Handle) -> Handle {
        while let Some(r) = self.arena.get(h).right {
            h = r;
        }
        h
    }

    fn first(&self) -> Option<Handle> {
        self.root.map(|r| self.leftmost(r))
    }

    /// In-order successor.
    fn successor(&self, h: Handle) -> Option<Handle> {
        if let Some(r) = self.arena.get(h).right {
            return Some(self.leftmost(r));
        }
        let mut cur = h;
        let mut parent = self.arena.get(cur).parent;
        while let Some(p) = parent {
            if self.arena.get(p).left == Some(cur) {
                return Some(p);
            }
            cur = p;
            parent = self.arena.get(p).parent;
        }
        None
    }

    /// In-order predecessor.
    fn predecessor(&self, h: Handle) -> Option<Handle> {
        if let Some(l) = self.arena.get(h).left {
            return Some(self.rightmost(l));
        }
        let mut cur = h;
        let mut parent = self.arena.get(cur).parent;
        while let Some(p) = parent {
            if self.arena.get(p).right == Some(cur) {
                return Some(p);
            }
            cur = p;
            parent = self.arena.get(p).parent;
        }
        None
    }

    fn replace_child(&mut self, parent: Option<Handle>, old: Handle, new: Option<Handle>) {
        match parent {
            None => self.root = new,
            Some(p) => {
                if self.arena.get(p).left == Some(old) {
                    self.arena.get_mut(p).left = new;
                } else {
                    self.arena.get_mut(p).right = new;
                }
            }
        }
        if let Some(n) = new {
            self.arena.get_mut(n).parent = parent;
        }
    }

    /// Standard unbalanced BST deletion: 0/1 children splice the sole child into the parent's
    /// slot; 2 children splice the in-order successor into `h`'s place.
    fn delete(&mut self, h: Handle) {
        let (left, right, parent) = {
            let n = self.arena.get(h);
            (n.left, n.right, n.parent)
        };

        match (left, right) {
            (None, None) => self.replace_child(parent, h, None),
            (Some(l), None) => self.replace_child(parent, h, Some(l)),
            (None, Some(r)) => self.replace_child(parent, h, Some(r)),
            (Some(l), Some(r)) => {
                let succ = self.leftmost(r);
                if succ != r {
                    let succ_parent = self.arena.get(succ).parent;
                    let succ_right = self.arena.get(succ).right;
                    self.replace_child(succ_parent, succ, succ_right);
                    self.arena.get_mut(succ).right = Some(r);
                    self.arena.get_mut(r).parent = Some(succ);
                }
                self.arena.get_mut(succ).left = Some(l);
                self.arena.get_mut(l).parent = Some(succ);
                self.replace_child(parent, h, Some(succ));
            }
        }
        self.arena.remove(h);
    }

    fn get_state(&self, block: u64) -> RegionType {
        let mut cur = self.root;
        while let Some(h) = cur {
            let n = self.arena.get(h);
            if block >= n.base && block < n.base + n.size {
                return n.region_type;
            }
            cur = if block < n.base { n.left } else { n.right };
        }
        RegionType::Unmapped
    }

    /// Splits (or fully consumes) the free run at `found`, mirroring `ListCore::reserve`.
    fn reserve(&mut self, found: Handle, n_blocks: u64, region_type: RegionType) -> u64 {
        let (base, size) = {
            let n = self.arena.get(found);
            (n.base, n.size)
        };
        if size == n_blocks {
            self.arena.get_mut(found).region_type = region_type;
        } else {
            self.arena.get_mut(found).base += n_blocks;
            self.arena.get_mut(found).size -= n_blocks;
            self.insert(base, n_blocks, region_type);
        }
        base
    }

    fn free(&mut self, base: u64) {
        let Some(handle) = self.find_by_base(base) else { return };
        if self.arena.get(handle).region_type == RegionType::Free {
            return;
        }
        self.arena.get_mut(handle).region_type = RegionType::Free;

        if let Some(pred) = self.predecessor(handle) {
            if self.arena.get(pred).region_type == RegionType::Free {
                let merged_size = self.arena.get(pred).size + self.arena.get(handle).size;
                self.delete(handle);
                self.arena.get_mut(pred).size = merged_size;
                self.merge_forward(pred);
                return;
            }
        }
        self.merge_forward(handle);
    }

    fn merge_forward(&mut self, handle: Handle) {
        if let Some(succ) = self.successor(handle) {
            if self.arena.get(succ).region_type == RegionType::Free {
                let merged_size = self.arena.get(handle).size + self.arena.get(succ).size;
                self.arena.get_mut(handle).size = merged_size;
                self.delete(succ);
            }
        }
    }

    fn dump_entries(&self) -> Vec<serde_json::Value> {
        let mut out = Vec::new();
        let mut cur = self.first();
        while let Some(h) = cur {
            let n = self.arena.get(h);
            out.push(serde_json::json!({
                "id": h.index(),
                "parent": n.parent.map(|p| p.index()),
                "left": n.left.map(|l| l.index()),
                "right": n.right.map(|r| r.index()),
                "base": n.base,
                "size": n.size,
                "type": region::region_type_tag(n.region_type),
            }));
            cur = self.successor(h);
        }
        out
    }
}

/// A search policy over a [`BstCore`]: finds a free run of at least `n_blocks`.
pub trait BstFind: Default {
    fn find(&mut self, core: &BstCore, n_blocks: u64) -> Option<Handle>;
    /// Called whenever a run is about to leave the tree, so a cursor-holding policy (next-fit)
    /// can drop a stale reference. No-op for stateless policies.
    fn on_delete(&mut self, _handle: Handle) {}
}

#[derive(Default)]
pub struct FirstFitStrategy;

impl BstFind for FirstFitStrategy {
    fn find(&mut self, core: &BstCore, n_blocks: u64) -> Option<Handle> {
        let mut cur = core.first();
        while let Some(h) = cur {
            let n = core.arena.get(h);
            if n.region_type == RegionType::Free && n.size >= n_blocks {
                return Some(h);
            }
            cur = core.successor(h);
        }
        None
    }
}

/// Next-fit cursor over in-order traversal. Cleared whenever its node is deleted.
#[derive(Default)]
pub struct NextFitStrategy {
    next: Option<Handle>,
}

impl BstFind for NextFitStrategy {
    fn find(&mut self, core: &BstCore, n_blocks: u64) -> Option<Handle> {
        let start = self.next.or_else(|| core.first())?;
        let mut cur = start;
        loop {
            let n = core.arena.get(cur);
            if n.region_type == RegionType::Free && n.size >= n_blocks {
                self.next = Some(cur);
                return Some(cur);
            }
            cur = core.successor(cur).or_else(|| core.first())?;
            if cur == start {
                return None;
            }
        }
    }

    fn on_delete(&mut self, handle: Handle) {
        if self.next == Some(handle) {
            self.next = None;
        }
    }
}

#[derive(Default)]
pub struct BestFitStrategy;

impl BstFind for BestFitStrategy {
    fn find(&mut self, core: &BstCore, n_blocks: u64) -> Option<Handle> {
        let mut found: Option<Handle> = None;
        let mut cur = core.first();
        while let Some(h) = cur {
            let n = core.arena.get(h);
            if n.region_type == RegionType::Free && n.size >= n_blocks {
                let better = match found {
                    None => true,
                    Some(f) => n.size < core.arena.get(f).size,
                };
                if better {
                    found = Some(h);
                }
            }
            cur = core.successor(h);
        }
        found
    }
}

#[derive(Default)]
pub struct WorstFitStrategy;

impl BstFind for WorstFitStrategy {
    fn find(&mut self, core: &BstCore, n_blocks: u64) -> Option<Handle> {
        let mut found: Option<Handle> = None;
        let mut cur = core.first();
        while let Some(h) = cur {
            let n = core.arena.get(h);
            if n.region_type == RegionType::Free && n.size >= n_blocks {
                let better = match found {
                    None => true,
                    Some(f) => n.size > core.arena.get(f).size,
                };
                if better {
                    found = Some(h);
                }
            }
            cur = core.successor(h);
        }
        found
    }
}

/// A BST-backed engine parameterised over its search policy.
pub struct BstEngine<S: BstFind> {
    core: Option<BstCore>,
    strategy: S,
}

impl<S: BstFind> Default for BstEngine<S> {
    fn default() -> Self {
        BstEngine { core: None, strategy: S::default() }
    }
}

impl<S: BstFind> Engine for BstEngine<S> {
    fn initialize_impl(&mut self, regions: &[RegionBlocks], _mem_size_blocks: u64, _block_size: u64) -> bool {
        self.core = Some(BstCore::build(regions));
        true
    }

    fn allocate(&mut self, n_blocks: u32) -> Option<u64> {
        let core = self.core.as_mut()?;
        let found = self.strategy.find(core, n_blocks as u64)?;
        Some(core.reserve(found, n_blocks as u64, RegionType::Reserved))
    }

    fn free(&mut self, base_block: u64, _n_blocks: u32) {
        let Some(core) = self.core.as_mut() else { return };
        if let Some(handle) = core.find_by_base(base_block) {
            self.strategy.on_delete(handle);
        }
        core.free(base_block);
    }

    fn get_state(&self, block: u64) -> RegionType {
        self.core.as_ref().map_or(RegionType::Unmapped, |c| c.get_state(block))
    }

    fn measure_wasted_memory(&self, block_size: u64) -> u64 {
        // The tree's own bookkeeping lives in ordinary heap memory, not the managed range (see
        // the module doc and spec.md §3 "Tree engines hold metadata externally"); this reports
        // an approximate block-equivalent of that heap footprint, as the original's
        // `measureWastedMemory` does for its own node pool.
        let Some(core) = &self.core else { return 0 };
        let bytes = core.arena.len() as u64 * core::mem::size_of::<Node>() as u64;
        crate::math::div_round_up(bytes, block_size.max(1))
    }

    fn dump_impl(&self) -> Vec<(&'static str, serde_json::Value)> {
        let Some(core) = &self.core else { return Vec::new() };
        alloc::vec![("tree", serde_json::Value::Array(core.dump_entries()))]
    }
}

pub type BstFirstFit = BstEngine<FirstFitStrategy>;
pub type BstNextFit = BstEngine<NextFitStrategy>;
pub type BstBestFit = BstEngine<BestFitStrategy>;
pub type BstWorstFit = BstEngine<WorstFitStrategy>;
