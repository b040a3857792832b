//! Approximate nearest-neighbour indexes
//!
//! Indexes are an accelerator only. Every search can be answered by an
//! exhaustive scan in storage, and index-backed results are re-scored exactly,
//! so a missing or stale index changes latency and nothing else.

mod maintainer;
mod registry;
mod vector_index;

pub use crate::config::IndexTuning;
pub use maintainer::IndexMaintainer;
pub use registry::{
    live_coverage, Coverage, IndexInfo, IndexKey, IndexRegistry, IndexScope, IndexStatus,
    ReadyIndex,
};
pub use vector_index::VectorIndex;
