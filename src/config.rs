//! Build/benchmark-time configuration, standing in for the `config`/`platypos_config` crates'
//! role in the teacher workspace. Unlike those crates, this one has no TOML file to codegen from
//! (`phf_codegen`) -- the benchmark/test harness that is this crate's only consumer constructs a
//! `Config` directly, matching spec.md §6's "provided by a configuration collaborator... baked in
//! at construction".

use crate::strategy::Strategy;

/// Parameters the allocator engines themselves treat as constants baked in at construction, but
/// that a benchmark/test harness (out of scope for this crate) needs to vary run to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Size in bytes of one block. Constant for the lifetime of an allocator instance.
    pub block_size: u64,
    /// Seed for the deterministic PRNG the stress-test harness uses (spec.md §8 scenario E).
    pub prng_seed: u64,
    /// Which of the four search policies a strategy-parameterised engine family should use.
    pub strategy: Strategy,
    /// Number of layers in a buddy engine's bitmap tree (`L` in spec.md §4.6).
    pub buddy_layers: u8,
}

impl Config {
    pub const fn new(block_size: u64, prng_seed: u64, strategy: Strategy, buddy_layers: u8) -> Self {
        Config { block_size, prng_seed, strategy, buddy_layers }
    }
}

impl Default for Config {
    /// `4096`-byte blocks, the reference implementation's stress-test seed, first-fit, and a
    /// 10-layer buddy tree (spec.md §8 scenario D).
    fn default() -> Self {
        Config::new(4096, 123_456, Strategy::FirstFit, 10)
    }
}
