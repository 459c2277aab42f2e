//! Convenient re-exports for downstream crates.

pub use crate::blueprint::{
    Blueprint, BlueprintMetadata, RoutingPolicy, RoutingSpec, TableDef, TransitionState,
};
pub use crate::config::{
    BackoffConfig, ComparatorConfig, FrontEndConfig, LatencyMetric, PlannerConfig,
    StorageConfig, StrataConfig, TxnModelCoefs,
};
pub use crate::engine::{Engine, EngineBitmap, EngineMap};
pub use crate::error::{Error, Result};
pub use crate::id::{CandidateSeq, SessionId};
pub use crate::manifest::{ManifestId, PlanManifest};
pub use crate::placement::TablePlacement;
pub use crate::provisioning::{InstanceSpec, Provisioning};
