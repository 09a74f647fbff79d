//! Core of an RDF triple store: paged storage segments behind a latch-based
//! buffer manager, exact join statistics, and a dynamic-programming join
//! order optimizer that turns a query graph into a physical plan.

#![warn(missing_docs)]

pub mod config;
pub mod primitives;
pub mod query;
pub mod runtime;
pub mod storage;
pub mod types;

pub use config::StoreConfig;
pub use query::{PlanGen, PlannerConfig, QueryGraph};
pub use storage::{DataOrder, Database, DatabaseBuilder};
pub use types::{Result, TristoreError};
