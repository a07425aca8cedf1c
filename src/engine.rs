//! The common engine contract every allocator backend implements.
//!
//! Design Notes §9 re-architects the original's virtual-dispatch base class
//! (`Allocator::InitializeImpl`/`DumpImpl` hooks) as "an engine-capability interface... place the
//! front-end's normalisation and `to_block`/`to_ptr` conversions in a concrete helper struct shared
//! by all engines (composition, not inheritance)". `Engine` is that interface; [`crate::BlockAllocator`]
//! is the concrete helper struct that owns it.

use alloc::vec::Vec;

use crate::region::{RegionBlocks, RegionType};

/// One interchangeable block-allocation backend (bitmap, linked-list, tree, buddy, ...).
///
/// All block indices are relative to the front-end's `mem_base`; an `Engine` never sees byte
/// addresses or the caller's `mem_base` itself.
pub trait Engine {
    /// Consumes the normalised, sorted, non-overlapping region partition and builds whatever
    /// internal state the engine needs. Returns `false` (leaving the engine uninitialised; no
    /// partial state should be observable) if the engine cannot satisfy the request -- most
    /// commonly "no free region is large enough to host this engine's own metadata".
    ///
    /// `block_size` is passed through (rather than only to `measure_wasted_memory`) because
    /// engines that place metadata inside managed memory (bitmap, linked-list pool, buddy) need
    /// it to convert their metadata's byte footprint into a block count.
    fn initialize_impl(&mut self, regions: &[RegionBlocks], mem_size_blocks: u64, block_size: u64) -> bool;

    /// Finds and reserves `n_blocks` contiguous, currently-free blocks per the engine's search
    /// policy, returning the base block index. `n_blocks == 0` and exhaustion both return `None`;
    /// neither mutates state.
    fn allocate(&mut self, n_blocks: u32) -> Option<u64>;

    /// Releases `n_blocks` blocks starting at `base_block`. A mis-free (unknown base, already
    /// free, or the engine simply has no record of it) is a silent no-op -- see spec.md §7.
    fn free(&mut self, base_block: u64, n_blocks: u32);

    /// Reports the state of a single block. `block` is guaranteed by the caller (the front-end)
    /// to be `< mem_size_blocks`.
    fn get_state(&self, block: u64) -> RegionType;

    /// Blocks consumed by the engine's own bookkeeping (bitmap storage, pool nodes, tree nodes),
    /// plus, for engines that round requests up, any power-of-two rounding overhead.
    fn measure_wasted_memory(&self, block_size: u64) -> u64;

    /// Builds the engine-specific portion of the `dump` payload (spec.md §6). The front-end adds
    /// the common `mem_base`/`mem_size_bytes`/`mem_size_blocks`/`block_size` fields around this.
    fn dump_impl(&self) -> Vec<(&'static str, serde_json::Value)>;
}
