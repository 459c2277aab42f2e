//! Serializable breakdown of a candidate's score.
//!
//! The comparator collapses these numbers into one order; the summary keeps
//! the three axes apart so operators can see why a blueprint won.

use serde::{Deserialize, Serialize};

use strata_core::engine::EngineMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationalCost {
    pub provisioning_usd: f64,
    pub storage_usd: f64,
    pub workload_scan_usd: f64,
}

impl OperationalCost {
    pub fn total_usd(&self) -> f64 {
        self.provisioning_usd + self.storage_usd + self.workload_scan_usd
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransitionCost {
    pub movement_usd: f64,
    pub movement_time_s: f64,
    pub provisioning_change_time_s: f64,
}

impl TransitionCost {
    pub fn total_time_s(&self) -> f64 {
        self.movement_time_s + self.provisioning_change_time_s
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceScore {
    pub latency_geomean_s: f64,
    pub latency_p90_s: f64,
    pub latency_p99_s: f64,
    pub latency_max_s: f64,
    pub txn_p50_s: f64,
    pub txn_p90_s: f64,
    pub redshift_max_node_cpu_util: f64,
    pub aurora_analytics_cpu_util: f64,
    pub queries_per_engine: EngineMap<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreSummary {
    pub aurora: String,
    pub redshift: String,
    pub operational: OperationalCost,
    pub transition: TransitionCost,
    pub performance: PerformanceScore,
}

impl ScoreSummary {
    pub fn to_json_pretty(&self) -> strata_core::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
