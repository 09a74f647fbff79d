#![forbid(unsafe_code)]
//! Cost model for physical operators.
//!
//! Units are tenths of a millisecond on the reference hardware the
//! defaults were calibrated on. Every constant is configurable.

use serde::{Deserialize, Serialize};

/// Calibrated operator costs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostModel {
    /// Cost of one random page seek.
    pub seek: f64,
    /// Cost of one sequential page read.
    pub scan: f64,
    /// CPU operations per cost unit.
    pub cpu_speed: f64,
    /// Fixed cost of building a hash table.
    pub hash_build: f64,
    /// Divisor applied to the build side cardinality of a hash join.
    pub hash_left_divisor: f64,
    /// Divisor applied to the probe side cardinality of a hash join.
    pub hash_right_divisor: f64,
    /// Cost per input row of a table function.
    pub table_function_row: f64,
}

impl Default for CostModel {
    fn default() -> Self {
        Self {
            seek: 95.0,
            scan: 17.0,
            cpu_speed: 100_000.0,
            hash_build: 300_000.0,
            hash_left_divisor: 10.0,
            hash_right_divisor: 100.0,
            table_function_row: 10_000.0,
        }
    }
}

impl CostModel {
    /// Descending a B-tree of three levels.
    pub fn seek_btree(&self) -> f64 {
        3.0 * self.seek
    }

    /// Reading `pages` consecutive pages.
    pub fn scan(&self, pages: u64) -> f64 {
        pages as f64 * self.scan
    }

    /// Merging two sorted inputs.
    pub fn merge_join(&self, left_card: f64, right_card: f64) -> f64 {
        left_card / self.cpu_speed + right_card / self.cpu_speed
    }

    /// Building on `left_card` rows and probing with `right_card` rows.
    pub fn hash_join(&self, left_card: f64, right_card: f64) -> f64 {
        self.hash_build + left_card / self.hash_left_divisor + right_card / self.hash_right_divisor
    }

    /// Evaluating a filter predicate on `card` rows.
    pub fn filter(&self, card: f64) -> f64 {
        card / (self.cpu_speed / 3.0).floor()
    }

    /// Calling a table function once per input row.
    pub fn table_function(&self, left_card: f64) -> f64 {
        left_card * self.table_function_row
    }
}
