//! The allocator front-end: owns the managed address range and block size, converts between byte
//! addresses and block indices, normalises the caller's region table, and delegates everything
//! else to an [`Engine`].
//!
//! Grounded on `src/phallocators/allocators/Allocator.cpp`/`.hpp` (original source) and spec.md
//! §4.2. The original's `ToBlock`/`ToBlockRoundUp`/`ToPtr` protected template methods become plain
//! inherent methods here since there's no base class to hide them behind (Design Notes §9).

use log::{debug, info, warn};

use crate::engine::Engine;
use crate::region::{self, Region, RegionType};

/// Owns an address range, a block size, and one allocator [`Engine`].
///
/// Byte addresses handed to and returned from the public API are `u64` offsets from an arbitrary
/// origin (matching the input `Region`s); the front-end never dereferences them.
pub struct BlockAllocator<E: Engine> {
    block_size: u64,
    mem_base: u64,
    mem_size_bytes: u64,
    mem_size_blocks: u64,
    engine: E,
    initialized: bool,
}

impl<E: Engine + Default> BlockAllocator<E> {
    /// Creates an uninitialized allocator. Every operation before [`Self::initialize`] succeeds
    /// is a no-op (allocate returns `None`, free is ignored, get_state reports `Unmapped`).
    pub fn new() -> Self {
        BlockAllocator {
            block_size: 0,
            mem_base: 0,
            mem_size_bytes: 0,
            mem_size_blocks: 0,
            engine: E::default(),
            initialized: false,
        }
    }
}

impl<E: Engine> BlockAllocator<E> {
    /// Creates an uninitialized allocator around a caller-constructed engine, for engines whose
    /// `Default` doesn't cover every useful configuration (e.g. [`crate::engines::buddy::BuddyEngine::with_layers`]).
    pub fn with_engine(engine: E) -> Self {
        BlockAllocator { block_size: 0, mem_base: 0, mem_size_bytes: 0, mem_size_blocks: 0, engine, initialized: false }
    }

    #[inline]
    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    #[inline]
    pub fn mem_base(&self) -> u64 {
        self.mem_base
    }

    #[inline]
    pub fn mem_size_bytes(&self) -> u64 {
        self.mem_size_bytes
    }

    #[inline]
    pub fn mem_size_blocks(&self) -> u64 {
        self.mem_size_blocks
    }

    #[inline]
    pub fn to_block(&self, ptr: u64) -> u64 {
        (ptr - self.mem_base) / self.block_size
    }

    #[inline]
    pub fn to_block_round_up(&self, ptr: u64) -> u64 {
        crate::math::div_round_up(ptr - self.mem_base, self.block_size)
    }

    #[inline]
    pub fn to_ptr(&self, block: u64) -> u64 {
        self.mem_base + block * self.block_size
    }

    /// Computes the managed range from `regions`, normalises them to block granularity, and hands
    /// the partition to the engine. Returns `false` (state left untouched) if the engine can't be
    /// built over this partition -- most commonly no free region big enough for its own metadata.
    ///
    /// Re-initialisation is not supported: calling this a second time on an already-initialized
    /// allocator is a programmer error (`debug_assert!`), matching spec.md §3's "created empty,
    /// initialised once... re-initialisation is not supported".
    pub fn initialize(&mut self, block_size: u64, regions: &[Region]) -> bool {
        debug_assert!(!self.initialized, "re-initialisation is not supported");
        debug_assert!(block_size > 0);

        let range = region::determine_mem_range(regions);
        let normalised = region::normalize(block_size, range.mem_base, regions);

        self.block_size = block_size;
        self.mem_base = range.mem_base;
        self.mem_size_bytes = range.mem_size_bytes;
        self.mem_size_blocks = range.mem_size_bytes / block_size;

        info!(
            "initializing allocator: mem_base={:#x} mem_size_bytes={:#x} mem_size_blocks={} block_size={}",
            self.mem_base, self.mem_size_bytes, self.mem_size_blocks, block_size
        );

        if self.engine.initialize_impl(&normalised, self.mem_size_blocks, block_size) {
            self.initialized = true;
            true
        } else {
            warn!("allocator initialization failed: engine rejected the region partition");
            false
        }
    }

    /// Allocates `n_blocks` contiguous blocks, returning the byte address of the first one.
    /// `n_blocks == 0` and exhaustion both return `None`.
    pub fn allocate(&mut self, n_blocks: u32) -> Option<u64> {
        if n_blocks == 0 {
            return None;
        }
        let block = self.engine.allocate(n_blocks)?;
        let ptr = self.to_ptr(block);
        debug!("allocated {} blocks at {:#x}", n_blocks, ptr);
        Some(ptr)
    }

    /// Releases `n_blocks` blocks starting at `ptr`. The caller must pass the same `n_blocks` that
    /// was returned by the corresponding [`Self::allocate`]. Freeing an unknown, already-free, or
    /// out-of-range pointer is a silent no-op.
    pub fn free(&mut self, ptr: u64, n_blocks: u32) {
        if n_blocks == 0 {
            return;
        }
        if ptr < self.mem_base {
            return;
        }
        let block = self.to_block(ptr);
        if block >= self.mem_size_blocks || n_blocks as u64 > self.mem_size_blocks - block {
            return;
        }
        debug!("freeing {} blocks at {:#x}", n_blocks, ptr);
        self.engine.free(block, n_blocks);
    }

    /// Reports the state of the block containing `addr`. Addresses outside the managed range
    /// report `Unmapped`.
    pub fn get_state(&self, addr: u64) -> RegionType {
        if addr < self.mem_base {
            return RegionType::Unmapped;
        }
        let block = self.to_block(addr);
        if block >= self.mem_size_blocks {
            return RegionType::Unmapped;
        }
        self.engine.get_state(block)
    }

    /// Blocks consumed by engine bookkeeping (and, for buddy, rounding overhead).
    pub fn measure_wasted_memory(&self) -> u64 {
        self.engine.measure_wasted_memory(self.block_size)
    }

    /// Builds the full dump payload: the common header fields plus whatever the engine adds.
    pub fn dump(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        map.insert("mem_base".into(), self.mem_base.into());
        map.insert("mem_size_bytes".into(), self.mem_size_bytes.into());
        map.insert("mem_size_blocks".into(), self.mem_size_blocks.into());
        map.insert("block_size".into(), self.block_size.into());
        for (key, value) in self.engine.dump_impl() {
            map.insert(key.into(), value);
        }
        serde_json::Value::Object(map)
    }

    /// Direct access to the underlying engine, for engine-specific inspection in tests.
    pub fn engine(&self) -> &E {
        &self.engine
    }
}
