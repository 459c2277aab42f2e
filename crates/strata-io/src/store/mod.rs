//! Persistence for versioned blueprints.
//!
//! - `fs`: one JSON file per version plus `metadata.json`, under
//!   `<root>/<schema>/`.
//! - `memory`: a map behind a mutex, for tests and simulations.
//!
//! Also exposes `RetryConfig` and a builder that picks the backend from the
//! configured root (`memory://` or a directory path).

mod fs;
mod memory;

pub use fs::FsBlueprintStore;
pub use memory::MemoryBlueprintStore;

use std::sync::Arc;
use std::time::Duration;

use strata_core::blueprint::{Blueprint, BlueprintMetadata};
use strata_core::config::StorageConfig;

use crate::error::Result;

/// Where committed blueprints live. Versions are write-once.
pub trait BlueprintStore: Send + Sync + std::fmt::Debug {
    fn read_metadata(&self, schema: &str) -> Result<Option<BlueprintMetadata>>;
    fn write_metadata(&self, schema: &str, metadata: &BlueprintMetadata) -> Result<()>;
    fn read_version(&self, schema: &str, version: u64) -> Result<Blueprint>;
    fn write_version(&self, schema: &str, version: u64, bp: &Blueprint) -> Result<()>;
    /// Stored versions in ascending order.
    fn list_versions(&self, schema: &str) -> Result<Vec<u64>>;
}

/// Retry/backoff for transient storage errors.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl From<&StorageConfig> for RetryConfig {
    fn from(cfg: &StorageConfig) -> Self {
        Self {
            max_retries: cfg.retry_max_retries,
            initial_backoff: Duration::from_millis(cfg.retry_initial_backoff_ms),
            max_backoff: Duration::from_millis(cfg.retry_max_backoff_ms),
        }
    }
}

pub const MEMORY_ROOT: &str = "memory://";

/// Build the store named by `cfg.root`.
pub fn build_store_from_config(cfg: &StorageConfig) -> Arc<dyn BlueprintStore> {
    if cfg.root.starts_with(MEMORY_ROOT) {
        Arc::new(MemoryBlueprintStore::new())
    } else {
        Arc::new(FsBlueprintStore::new(&cfg.root).with_retry(RetryConfig::from(cfg)))
    }
}
