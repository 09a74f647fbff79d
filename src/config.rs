#![forbid(unsafe_code)]
//! TOML configuration grouping every tunable of the store.
//!
//! ```toml
//! [buffer]
//! buffer_size = 8192
//!
//! [planner]
//! max_relations = 32
//!
//! [planner.costs]
//! hash_build = 250000.0
//!
//! [scheduler]
//! threads = 4
//! ```
//!
//! Missing tables and keys keep their defaults.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::primitives::buffer::BufferOptions;
use crate::query::PlannerConfig;
use crate::runtime::SchedulerOptions;
use crate::storage::PredicateSetOptions;
use crate::types::{Result, TristoreError};

/// All settings of one store instance.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Buffer manager sizing.
    pub buffer: BufferOptions,
    /// Optimizer settings and cost constants.
    pub planner: PlannerConfig,
    /// Execution threads.
    pub scheduler: SchedulerOptions,
    /// Predicate set computation during bulk load.
    pub predicate_sets: PredicateSetOptions,
}

impl StoreConfig {
    /// Reads `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|err| TristoreError::Config(format!("reading {}: {err}", path.display())))?;
        let config = Self::from_toml(&text)?;
        debug!(path = %path.display(), "config.loaded");
        Ok(config)
    }

    /// Parses a TOML document.
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|err| TristoreError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Renders the configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|err| TristoreError::Config(err.to_string()))
    }

    fn validate(&self) -> Result<()> {
        if self.buffer.page_size < 1024 || !self.buffer.page_size.is_power_of_two() {
            return Err(TristoreError::Config(format!(
                "page_size must be a power of two of at least 1024, got {}",
                self.buffer.page_size
            )));
        }
        if self.buffer.buffer_size == 0 {
            return Err(TristoreError::Config("buffer_size must be positive".into()));
        }
        if self.planner.max_relations == 0 {
            return Err(TristoreError::Config("max_relations must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn empty_document_is_default() -> Result<()> {
        assert_eq!(StoreConfig::from_toml("")?, StoreConfig::default());
        Ok(())
    }

    #[test]
    fn nested_overrides() -> Result<()> {
        let config = StoreConfig::from_toml(
            "[buffer]\nbuffer_size = 64\n[planner]\nmax_relations = 8\n[planner.costs]\nseek = 10.0\n[scheduler]\nthreads = 4\n",
        )?;
        assert_eq!(config.buffer.buffer_size, 64);
        assert_eq!(config.buffer.flush_batch, 1024);
        assert_eq!(config.planner.max_relations, 8);
        assert_eq!(config.planner.costs.seek, 10.0);
        assert_eq!(config.planner.costs.scan, 17.0);
        assert_eq!(config.scheduler.worker_threads(), 4);
        assert_eq!(config.predicate_sets.max_sets, 10_000);
        Ok(())
    }

    #[test]
    fn load_round_trips_through_a_file() -> Result<()> {
        let mut config = StoreConfig::default();
        config.planner.disable_skipping = true;
        let mut file = NamedTempFile::new()?;
        file.write_all(config.to_toml()?.as_bytes())?;
        assert_eq!(StoreConfig::load(file.path())?, config);
        Ok(())
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            StoreConfig::from_toml("[buffer]\npage_size = 1000"),
            Err(TristoreError::Config(_))
        ));
        assert!(matches!(
            StoreConfig::from_toml("[planner]\nmax_relations = 0"),
            Err(TristoreError::Config(_))
        ));
        assert!(matches!(StoreConfig::from_toml("buffer = 3"), Err(TristoreError::Config(_))));
        assert!(matches!(
            StoreConfig::load("/definitely/missing/tristore.toml"),
            Err(TristoreError::Config(_))
        ));
    }
}
