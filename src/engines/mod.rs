//! One module per backing representation (spec.md §4.3-§4.6). Each module exports a handful of
//! concrete `Engine` type aliases, one per search-policy/variant combination, so callers pick a
//! concrete type at the [`crate::BlockAllocator`] call site rather than through a runtime tag.

pub mod bbst;
pub mod bitmap;
pub mod bst;
pub mod buddy;
pub mod dual_bbst;
pub mod linked_list;
