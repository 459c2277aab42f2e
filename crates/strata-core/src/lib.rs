#![forbid(unsafe_code)]
//! strata-core: the shared vocabulary of the control plane.
//!
//! - `engine`: the closed set of backend engines and their placement bitmaps.
//! - `provisioning`: instance catalogs and the `Provisioning` value type.
//! - `placement`: table → engine-bitmap mapping.
//! - `blueprint`: the versioned, validated configuration the router consumes.
//! - `config`: planner, front-end, and storage configuration.
//!
//! Nothing in this crate performs I/O beyond reading config files on request.

pub mod blueprint;
pub mod config;
pub mod engine;
pub mod error;
pub mod hash;
pub mod id;
pub mod manifest;
pub mod placement;
pub mod prelude;
pub mod provisioning;

pub use blueprint::{
    Blueprint, BlueprintMetadata, RoutingPolicy, RoutingSpec, TableDef, TransitionState,
};
pub use engine::{Engine, EngineBitmap, EngineMap};
pub use error::{Error, Result};
pub use placement::TablePlacement;
pub use provisioning::{InstanceSpec, Provisioning};

/// Crate version, recorded in plan manifests for provenance.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
