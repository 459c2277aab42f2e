//! Plan manifest for audit: which inputs produced which blueprint.
//!
//! The planner emits one manifest per pass. Identical inputs and config yield
//! identical fingerprints, which makes re-planning results comparable.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::hash::Fingerprint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ManifestId(pub Uuid);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanManifest {
    pub id: ManifestId,

    /// Fingerprint of the blueprint planning started from.
    pub source_blueprint: Fingerprint,

    /// Fingerprint of the workload, metrics, and planner config used.
    pub inputs_digest: Fingerprint,

    /// Fingerprint of the proposed blueprint, once planning succeeds.
    pub output_blueprint: Option<Fingerprint>,

    /// Crate version string for provenance.
    pub planner_version: String,

    /// Milliseconds since Unix epoch (UTC).
    pub started_ms: u64,
    pub finished_ms: u64,
}

impl PlanManifest {
    pub fn new(source_blueprint: Fingerprint, inputs_digest: Fingerprint, started_ms: u64) -> Self {
        Self {
            id: ManifestId(Uuid::new_v4()),
            source_blueprint,
            inputs_digest,
            output_blueprint: None,
            planner_version: crate::VERSION.to_string(),
            started_ms,
            finished_ms: started_ms,
        }
    }

    pub fn finish(mut self, finished_ms: u64, output_blueprint: Option<Fingerprint>) -> Self {
        self.finished_ms = finished_ms;
        self.output_blueprint = output_blueprint;
        self
    }
}

/// Milliseconds since the Unix epoch; 0 if the clock is before it.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
