//! The four search policies shared by the bitmap, linked-list and single-map tree engine
//! families (spec.md §4.3-§4.5). Each family implements a policy as a distinct engine type, so
//! this enum carries no behaviour of its own -- it only names a policy for code (benchmark
//! harnesses, dump metadata) that needs to talk about one without committing to a concrete engine
//! type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Strategy {
    FirstFit,
    NextFit,
    BestFit,
    WorstFit,
}
