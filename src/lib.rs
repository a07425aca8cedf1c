//! A library of physical-memory block allocator engines for use inside an OS kernel or similar
//! freestanding environment: declare a contiguous address range, partition it into reserved/free
//! regions, then request or release aligned, block-sized sub-ranges (spec.md §1).
//!
//! Every engine implements the same [`Engine`] contract and is driven through [`BlockAllocator`],
//! which owns the managed range and block size and handles byte<->block conversion and region
//! normalisation (spec.md §4.2). Pick a concrete engine type from [`engines`] at the call site:
//!
//! ```
//! use block_allocators::{BlockAllocator, Region, RegionType};
//! use block_allocators::engines::bitmap::BitmapFirstFit;
//!
//! let mut allocator = BlockAllocator::<BitmapFirstFit>::new();
//! allocator.initialize(4096, &[Region::new(0, 1 << 20, RegionType::Free)]);
//! let ptr = allocator.allocate(4).unwrap();
//! assert_eq!(allocator.get_state(ptr), RegionType::Reserved);
//! allocator.free(ptr, 4);
//! ```
#![no_std]

extern crate alloc;

mod arena;
mod bitarray;
pub mod config;
pub mod engine;
pub mod engines;
mod frontend;
pub mod math;
pub mod region;
pub mod strategy;

pub use config::Config;
pub use engine::Engine;
pub use frontend::BlockAllocator;
pub use region::{Region, RegionBlocks, RegionType};
pub use strategy::Strategy;
