#![forbid(unsafe_code)]
//! strata-io: everything strata reads from or writes to disk.
//!
//! - `store`: versioned blueprint persistence (filesystem and in-memory).
//! - `manager`: the commit/transition lifecycle on top of a store.
//! - `files`: workload and blueprint files (JSON or YAML).
//! - `metrics`: a JSONL-backed `MetricsSource`.
//! - `writers`: the JSONL query log.

pub mod error;
pub mod files;
pub mod manager;
pub mod metrics;
pub mod store;
pub mod writers;

pub use error::{Error, Result};
pub use files::{load_blueprint, load_workload, read_json_or_yaml};
pub use manager::BlueprintManager;
pub use metrics::JsonlMetricsSource;
pub use store::{
    build_store_from_config, BlueprintStore, FsBlueprintStore, MemoryBlueprintStore, RetryConfig,
};
pub use writers::{QueryLogRecord, QueryLogWriter};
