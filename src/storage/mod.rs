//! On-disk segments of the triple store.
//!
//! Every database lives in one partition file. Page 0 holds the
//! [`catalog`], the rest is a sequence of bulk-loaded B+-trees: six facts
//! trees (one per [`DataOrder`]), six aggregated trees, three fully
//! aggregated trees, the exact statistics and a predicate set blob.

use serde::Serialize;

pub mod aggregated;
pub mod blob;
pub mod btree;
pub mod catalog;
pub mod database;
pub mod exact_stats;
pub mod facts;
pub mod fully_aggregated;
pub mod order;
pub mod predicate_set;

pub use aggregated::{AggregatedEntry, AggregatedFactsSegment};
pub use database::{Database, DatabaseBuilder};
pub use exact_stats::ExactStatisticsSegment;
pub use facts::{FactsSegment, Triple};
pub use fully_aggregated::{FullyAggregatedEntry, FullyAggregatedFactsSegment};
pub use order::DataOrder;
pub use predicate_set::{PredicateSetOptions, PredicateSetSegment};

/// Size counters kept for every facts-like segment.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SegmentStats {
    /// Pages used by the tree.
    pub pages: u64,
    /// Distinct leading values.
    pub level1_groups: u64,
    /// Distinct `(v1, v2)` prefixes.
    pub level2_groups: u64,
    /// Triples covered.
    pub cardinality: u64,
}
