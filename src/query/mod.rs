#![forbid(unsafe_code)]

//! Join order optimization.
//!
//! Semantic analysis hands over a [`QueryGraph`]; [`PlanGen`] enumerates
//! join orders by dynamic programming over relation subsets and returns the
//! cheapest [`PlanTree`] under the [`CostModel`].

/// Relation subsets.
pub mod bitset;

/// Operator cost formulas.
pub mod costs;

/// Query graph data model and edge derivation.
pub mod graph;

/// Plan arena, explain output and fingerprints.
pub mod plan;

/// Dynamic programming plan generator.
pub mod plangen;

pub use bitset::BitSet;
pub use costs::CostModel;
pub use graph::{DuplicateHandling, Edge, Filter, Node, Order, QueryGraph, SubQuery, TableFunction};
pub use plan::{ExplainNode, Plan, PlanId, PlanOp, PlanTree};
pub use plangen::{PlanGen, PlannerConfig};

use crate::storage::DataOrder;
use crate::types::{Result, Slot};

/// Statistics the optimizer needs from a database.
pub trait StatisticsProvider {
    /// Estimated size of the pattern `(s, p, o)`; `None` is a wildcard.
    fn cardinality(&self, s: Option<u32>, p: Option<u32>, o: Option<u32>) -> Result<u64>;
    /// Estimated selectivity of joining two patterns on their shared variables.
    fn join_selectivity(&self, left: [Slot; 3], right: [Slot; 3]) -> Result<f64>;
    /// Pages of the facts tree in `order`.
    fn facts_pages(&self, order: DataOrder) -> u64;
    /// Triples stored in `order`.
    fn facts_cardinality(&self, order: DataOrder) -> u64;
    /// Pages of the aggregated tree in `order`.
    fn aggregated_pages(&self, order: DataOrder) -> u64;
    /// Pages of the fully aggregated tree led by the first component of `order`.
    fn fully_aggregated_pages(&self, order: DataOrder) -> u64;
}
