#![forbid(unsafe_code)]
//! strata-scoring: the numeric half of blueprint planning.
//!
//! Responsibilities:
//! - Bundle the inputs of one planning pass (`ScoringContext`).
//! - Predict latency and CPU on a candidate provisioning, per engine family
//!   (`transactional` for Aurora, `clustered` for Redshift).
//! - Enumerate nearby provisionings (`enumerate`).
//! - Price provisioning, storage, scans, and table movement (`cost`).
//!
//! Everything here is a pure function of its inputs. Predictors never fail;
//! they report NaN/inf and leave it to callers to treat those as infeasible.

pub mod clustered;
pub mod context;
pub mod cost;
pub mod enumerate;
pub mod metrics;
pub mod queuing;
pub mod transactional;
pub mod workload;

pub use clustered::ClusteredScore;
pub use context::ScoringContext;
pub use enumerate::ProvisioningEnumerator;
pub use metrics::{MetricsPoint, MetricsSnapshot, MetricsSource, TimeSeries};
pub use transactional::TransactionalScore;
pub use workload::{AnalyticalQuery, TxnStatement, Workload};
