//! End-to-end scenarios from spec.md §8, run against representative engines from each family.
//!
//! Every scenario uses `block_size = 4096`, `mem_size = 32 * 1024 * 1024` unless the scenario
//! says otherwise, matching the spec's stated parameters.

use block_allocators::engines::bbst::BbstFirstFit;
use block_allocators::engines::bitmap::{BitmapBestFit, BitmapFirstFit, BitmapNextFit, BitmapWorstFit};
use block_allocators::engines::bst::BstFirstFit;
use block_allocators::engines::buddy::BuddyEngine;
use block_allocators::engines::dual_bbst::DualBbstEngine;
use block_allocators::engines::linked_list::LinkedListFirstFit;
use block_allocators::{BlockAllocator, Engine, Region, RegionType};

const BLOCK_SIZE: u64 = 4096;
const MEM_SIZE: u64 = 32 * 1024 * 1024;

/// Routes `log` output through `env_logger` so `cargo test -- --nocapture` shows it; safe to call
/// more than once per process since later calls just find the global logger already set.
fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn scenario_a_regions() -> Vec<Region> {
    vec![
        Region::new(0x000000, 0x000500, RegionType::Reserved),
        Region::new(0x000500, 0x07FB00, RegionType::Free),
        Region::new(0x080000, 0x070000, RegionType::Reserved),
        Region::new(0x0F0000, 0x010000, RegionType::Reserved),
        Region::new(0x100000, MEM_SIZE - 0x100000, RegionType::Free),
    ]
}

/// Same partition as Scenario A, but disordered and deliberately overlapping (spec.md Scenario C).
fn scenario_c_regions() -> Vec<Region> {
    vec![
        Region::new(0x100000, MEM_SIZE - 0x100000, RegionType::Free),
        Region::new(0x080000, 0x075000, RegionType::Reserved),
        Region::new(0x000000, 0x000500, RegionType::Reserved),
        Region::new(0x0F0000, 0x010000, RegionType::Reserved),
        Region::new(0x000200, 0x090000, RegionType::Free),
    ]
}

fn assert_basic_partition<E: Engine>(alloc: &BlockAllocator<E>) {
    let base = alloc.mem_base();
    assert_eq!(alloc.get_state(base + 0x0000), RegionType::Reserved);
    assert_eq!(alloc.get_state(base + 0x0FFF), RegionType::Reserved);
    assert!(matches!(alloc.get_state(base + 0x1000), RegionType::Free | RegionType::Allocator));
    assert!(matches!(alloc.get_state(base + 0x7FFFF), RegionType::Free | RegionType::Allocator));
    assert_eq!(alloc.get_state(base + 0x80000), RegionType::Reserved);
    assert_eq!(alloc.get_state(base + 0xFFFFF), RegionType::Reserved);
    assert!(matches!(alloc.get_state(base + 0x100000), RegionType::Free | RegionType::Allocator));
    assert_eq!(alloc.get_state(base + MEM_SIZE), RegionType::Unmapped);
}

/// Scenario B: allocate/free round trip over a range of sizes, from the engine's current state.
fn run_scenario_b<E: Engine>(alloc: &mut BlockAllocator<E>) {
    let max_n = 3 * MEM_SIZE / (4 * BLOCK_SIZE);
    let mut n: u64 = 1;
    while n <= max_n {
        let p = alloc.allocate(n as u32).unwrap_or_else(|| panic!("allocate({n}) should succeed"));
        assert_eq!(alloc.get_state(p), RegionType::Reserved);
        assert_eq!(alloc.get_state(p + BLOCK_SIZE / 2), RegionType::Reserved);
        assert_eq!(alloc.get_state(p + n * BLOCK_SIZE - 1), RegionType::Reserved);

        alloc.free(p, n as u32);
        assert!(matches!(alloc.get_state(p), RegionType::Free | RegionType::Allocator));
        assert!(matches!(alloc.get_state(p + BLOCK_SIZE / 2), RegionType::Free | RegionType::Allocator));
        assert!(matches!(alloc.get_state(p + n * BLOCK_SIZE - 1), RegionType::Free | RegionType::Allocator));

        n += 1 + (n / 513).pow(2);
    }
}

macro_rules! scenario_abe_tests {
    ($name:ident, $engine:ty) => {
        mod $name {
            use super::*;

            #[test]
            fn scenario_a_basic_partition() {
                init_logging();
                let mut alloc = BlockAllocator::<$engine>::new();
                assert!(alloc.initialize(BLOCK_SIZE, &scenario_a_regions()));
                assert_basic_partition(&alloc);
            }

            #[test]
            fn scenario_b_allocate_free_round_trip() {
                init_logging();
                let mut alloc = BlockAllocator::<$engine>::new();
                assert!(alloc.initialize(BLOCK_SIZE, &scenario_a_regions()));
                run_scenario_b(&mut alloc);
            }

            #[test]
            fn scenario_c_overlap_normalisation_matches_scenario_a() {
                init_logging();
                let mut alloc = BlockAllocator::<$engine>::new();
                assert!(alloc.initialize(BLOCK_SIZE, &scenario_c_regions()));
                assert_basic_partition(&alloc);
            }
        }
    };
}

scenario_abe_tests!(bitmap_first_fit, BitmapFirstFit);
scenario_abe_tests!(bitmap_next_fit, BitmapNextFit);
scenario_abe_tests!(bitmap_best_fit, BitmapBestFit);
scenario_abe_tests!(bitmap_worst_fit, BitmapWorstFit);
scenario_abe_tests!(linked_list_first_fit, LinkedListFirstFit);
scenario_abe_tests!(bst_first_fit, BstFirstFit);
scenario_abe_tests!(bbst_first_fit, BbstFirstFit);
scenario_abe_tests!(dual_bbst, DualBbstEngine);
scenario_abe_tests!(buddy, BuddyEngine);

/// Reads bit `index` of layer `layer` out of `dump()`'s `bitmap` object (`'0'` free, `'1'`/`'2'`
/// used — `'2'` marks the most recently allocated cells, which still count as used here).
fn dump_bit(dump: &serde_json::Value, layer: u64, index: u64) -> bool {
    let key = layer.to_string();
    let row = dump["bitmap"][key.as_str()].as_str().expect("bitmap row should be a string");
    row.as_bytes()[index as usize] != b'0'
}

/// Asserts the bubble-up property (spec.md §3/§8 invariant 4) holds between every adjacent pair
/// of layers in `dump`'s bitmap: `used[l][i] == used[l+1][2i] || used[l+1][2i+1]`.
fn assert_bubble_up_holds(dump: &serde_json::Value, layers: u64) {
    for l in 0..layers - 1 {
        let row_len = dump["bitmap"][l.to_string()].as_str().unwrap().len() as u64;
        for i in 0..row_len {
            let expect = dump_bit(dump, l + 1, 2 * i) || dump_bit(dump, l + 1, 2 * i + 1);
            assert_eq!(dump_bit(dump, l, i), expect, "bubble-up violated at layer {l} cell {i}");
        }
    }
}

/// Scenario D: buddy bubble-up. `L = 10` (the `BuddyEngine` default); allocate one block, verify
/// the allocated cell's path to the root is `1` and the bubble-up formula holds everywhere; free
/// it and verify the formula still holds and the path bit has returned to `0`.
#[test]
fn scenario_d_buddy_bubble_up() {
    init_logging();
    let mut alloc = BlockAllocator::<BuddyEngine>::new();
    assert!(alloc.initialize(BLOCK_SIZE, &[Region::new(0, MEM_SIZE, RegionType::Free)]));

    let layers = alloc.dump()["bitmap"].as_object().expect("bitmap object").len() as u64;
    let deep = layers - 1;

    let p = alloc.allocate(1).expect("space available");
    let base_block = alloc.to_block(p);

    let dump = alloc.dump();
    assert_bubble_up_holds(&dump, layers);
    let mut index = base_block;
    for l in (0..=deep).rev() {
        assert!(dump_bit(&dump, l, index), "layer {l} cell {index} should be marked used");
        index /= 2;
    }

    alloc.free(p, 1);

    let dump = alloc.dump();
    assert_bubble_up_holds(&dump, layers);
    assert!(!dump_bit(&dump, deep, base_block), "leaf should be free again after free()");
}

/// Scenario E (scaled down from the spec's one-million-operation stress run for test runtime;
/// see DESIGN.md): mixed allocate/free driven by a deterministic xorshift64* PRNG seeded
/// `123456`, the same seed spec.md names. After freeing everything outstanding, every block in
/// `[0x1000, 0x80000) ∪ [0x100000, mem_size)` must be `Free` or `Allocator`.
struct Xorshift64Star(u64);

impl Xorshift64Star {
    fn new(seed: u64) -> Self {
        Xorshift64Star(seed)
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.0 = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    /// Uniform in `[0, bound)`. `bound` must be nonzero.
    fn next_below(&mut self, bound: u64) -> u64 {
        self.next_u64() % bound
    }

    /// `1` with probability 0.75, else geometric(0.05) (expressed via repeated coin flips).
    fn alloc_size(&mut self, max: u64) -> u64 {
        if max == 0 {
            return 0;
        }
        if self.next_below(100) < 75 {
            return 1.min(max);
        }
        let mut n = 1u64;
        while self.next_below(100) >= 5 && n < max {
            n += 1;
        }
        n.min(max)
    }
}

#[test]
fn scenario_e_stress_round_trip() {
    init_logging();
    let mut alloc = BlockAllocator::<BitmapFirstFit>::new();
    assert!(alloc.initialize(BLOCK_SIZE, &scenario_a_regions()));

    let mem_size_blocks = alloc.mem_size_blocks();
    let mut rng = Xorshift64Star::new(123_456);
    let mut outstanding: Vec<(u64, u32)> = Vec::new();

    // Scaled down from the spec's one million operations: enough to exercise repeated
    // alloc/free/fragment cycles without a multi-minute `cargo test`.
    const OPS: usize = 20_000;
    for _ in 0..OPS {
        let total_allocated: u64 = outstanding.iter().map(|&(_, n)| n as u64).sum();
        let should_allocate = if outstanding.is_empty() {
            true
        } else if total_allocated >= mem_size_blocks {
            false
        } else {
            rng.next_below(2) == 0
        };

        if should_allocate {
            let n = rng.alloc_size(mem_size_blocks / 4) as u32;
            if n == 0 {
                continue;
            }
            if let Some(p) = alloc.allocate(n) {
                outstanding.push((p, n));
            }
        } else if !outstanding.is_empty() {
            let idx = rng.next_below(outstanding.len() as u64) as usize;
            let (p, n) = outstanding.swap_remove(idx);
            alloc.free(p, n);
        }
    }

    for (p, n) in outstanding {
        alloc.free(p, n);
    }

    let base = alloc.mem_base();
    for addr in (base + 0x1000..base + 0x80000).step_by(BLOCK_SIZE as usize) {
        assert!(matches!(alloc.get_state(addr), RegionType::Free | RegionType::Allocator), "addr {addr:#x}");
    }
    for addr in (base + 0x100000..base + MEM_SIZE).step_by(BLOCK_SIZE as usize) {
        assert!(matches!(alloc.get_state(addr), RegionType::Free | RegionType::Allocator), "addr {addr:#x}");
    }
}

/// Scenario F: strategy distinctiveness. A fragmented free list `[10, 4, 20, 6, 15]` blocks
/// between 1-block reserved spacers; requesting 5 blocks, each strategy must pick the documented
/// run.
#[test]
fn scenario_f_strategy_distinctiveness() {
    init_logging();
    let mut regions = Vec::new();
    let mut base = 0u64;
    for &len in &[10u64, 4, 20, 6, 15] {
        regions.push(Region::new(base * BLOCK_SIZE, len * BLOCK_SIZE, RegionType::Free));
        base += len;
        regions.push(Region::new(base * BLOCK_SIZE, BLOCK_SIZE, RegionType::Reserved));
        base += 1;
    }

    let mut first = BlockAllocator::<BitmapFirstFit>::new();
    assert!(first.initialize(BLOCK_SIZE, &regions));
    let p = first.allocate(5).expect("first-fit should find a run");
    assert_eq!(first.to_block(p), 0, "first-fit picks the length-10 run at block 0");

    let mut best = BlockAllocator::<BitmapBestFit>::new();
    assert!(best.initialize(BLOCK_SIZE, &regions));
    let p = best.allocate(5).expect("best-fit should find a run");
    assert_eq!(best.to_block(p), 37, "best-fit picks the length-6 run");

    let mut worst = BlockAllocator::<BitmapWorstFit>::new();
    assert!(worst.initialize(BLOCK_SIZE, &regions));
    let p = worst.allocate(5).expect("worst-fit should find a run");
    assert_eq!(worst.to_block(p), 16, "worst-fit picks the length-20 run");

    let mut next = BlockAllocator::<BitmapNextFit>::new();
    assert!(next.initialize(BLOCK_SIZE, &regions));
    let p = next.allocate(5).expect("next-fit should find a run");
    assert_eq!(next.to_block(p), 0, "next-fit starts at the cursor (block 0) just like first-fit here");
}
