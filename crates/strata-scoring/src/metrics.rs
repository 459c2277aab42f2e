//! Operational metrics consumed by the predictors.
//!
//! Collection and forecasting happen elsewhere; the planner only reads a
//! `MetricsSource` and condenses it into a `MetricsSnapshot` once per pass.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

pub const AURORA_WRITER_CPU_AVG: &str = "aurora_writer_cpu_avg";
pub const AURORA_READER_CPU_AVG: &str = "aurora_reader_cpu_avg";
pub const AURORA_WRITER_LOAD_MINUTE_AVG: &str = "aurora_writer_load_minute_avg";
pub const AURORA_READER_LOAD_MINUTE_AVG: &str = "aurora_reader_load_minute_avg";
pub const AURORA_WRITER_HIT_PCT_AVG: &str = "aurora_writer_buffer_hit_pct_avg";
pub const AURORA_READER_HIT_PCT_AVG: &str = "aurora_reader_buffer_hit_pct_avg";
/// Per-node Redshift CPU metrics are keyed `redshift_cpu_node_<i>`.
pub const REDSHIFT_CPU_NODE_PREFIX: &str = "redshift_cpu_node_";
pub const TXN_COMPLETIONS_PER_S: &str = "txn_completions_per_s";
pub const TXN_LAT_S_P50: &str = "txn_lat_s_p50";
pub const TXN_LAT_S_P90: &str = "txn_lat_s_p90";
/// Slowest analytical query the front ends saw in the epoch.
pub const QUERY_LAT_S_MAX: &str = "query_lat_s_max";
/// Athena scan spend in the epoch, extrapolated to USD per hour.
pub const SCAN_USD_PER_HOUR: &str = "scan_usd_per_hour";

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("metrics unavailable: {0}")]
    Unavailable(String),
    #[error("malformed metrics: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsPoint {
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    pub values: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    pub points: Vec<MetricsPoint>,
}

impl TimeSeries {
    /// Mean of one metric over the points that report it.
    pub fn mean(&self, key: &str) -> Option<f64> {
        let (sum, n) = self
            .points
            .iter()
            .filter_map(|p| p.values.get(key))
            .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
        (n > 0).then(|| sum / n as f64)
    }

    /// Keys present in any point, in order.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .points
            .iter()
            .flat_map(|p| p.values.keys().cloned())
            .collect();
        keys.sort();
        keys.dedup();
        keys
    }
}

/// Read-only access to observed and forecasted metrics.
pub trait MetricsSource {
    fn read_between_times(&self, start_ms: u64, end_ms: u64) -> Result<TimeSeries, MetricsError>;
    fn read_k_upcoming(&self, k: usize) -> Result<TimeSeries, MetricsError>;
}

/// Condensed metrics for one planning pass. CPU values are percentages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub aurora_writer_cpu_avg: f64,
    pub aurora_reader_cpu_avg: f64,
    pub aurora_writer_load_minute_avg: f64,
    pub aurora_reader_load_minute_avg: f64,
    pub aurora_writer_buffer_hit_pct_avg: f64,
    pub aurora_reader_buffer_hit_pct_avg: f64,
    /// One entry per Redshift node.
    pub redshift_cpu_list: Vec<f64>,
    pub txn_completions_per_s: f64,
    pub txn_lat_s_p50: f64,
    pub txn_lat_s_p90: f64,
    #[serde(default)]
    pub query_lat_s_max: f64,
}

impl Default for MetricsSnapshot {
    fn default() -> Self {
        Self {
            aurora_writer_cpu_avg: 0.0,
            aurora_reader_cpu_avg: 0.0,
            aurora_writer_load_minute_avg: 0.0,
            aurora_reader_load_minute_avg: 0.0,
            aurora_writer_buffer_hit_pct_avg: 100.0,
            aurora_reader_buffer_hit_pct_avg: 100.0,
            redshift_cpu_list: Vec::new(),
            txn_completions_per_s: 0.0,
            txn_lat_s_p50: 0.0,
            txn_lat_s_p90: 0.0,
            query_lat_s_max: 0.0,
        }
    }
}

impl MetricsSnapshot {
    /// Averages the next `k` forecasted points. Missing metrics keep their
    /// defaults; per-node Redshift CPU is collected in node order.
    pub fn from_source(source: &dyn MetricsSource, k: usize) -> Result<Self, MetricsError> {
        let series = source.read_k_upcoming(k)?;
        if series.points.is_empty() {
            return Err(MetricsError::Unavailable(
                "metrics source returned no points".into(),
            ));
        }
        Ok(Self::from_series(&series))
    }

    pub fn from_series(series: &TimeSeries) -> Self {
        let mut snap = Self::default();
        let mut set = |key: &str, slot: &mut f64| {
            if let Some(v) = series.mean(key) {
                *slot = v;
            }
        };
        set(AURORA_WRITER_CPU_AVG, &mut snap.aurora_writer_cpu_avg);
        set(AURORA_READER_CPU_AVG, &mut snap.aurora_reader_cpu_avg);
        set(
            AURORA_WRITER_LOAD_MINUTE_AVG,
            &mut snap.aurora_writer_load_minute_avg,
        );
        set(
            AURORA_READER_LOAD_MINUTE_AVG,
            &mut snap.aurora_reader_load_minute_avg,
        );
        set(
            AURORA_WRITER_HIT_PCT_AVG,
            &mut snap.aurora_writer_buffer_hit_pct_avg,
        );
        set(
            AURORA_READER_HIT_PCT_AVG,
            &mut snap.aurora_reader_buffer_hit_pct_avg,
        );
        set(TXN_COMPLETIONS_PER_S, &mut snap.txn_completions_per_s);
        set(TXN_LAT_S_P50, &mut snap.txn_lat_s_p50);
        set(TXN_LAT_S_P90, &mut snap.txn_lat_s_p90);
        set(QUERY_LAT_S_MAX, &mut snap.query_lat_s_max);

        let mut nodes: Vec<(usize, f64)> = series
            .keys()
            .into_iter()
            .filter_map(|key| {
                let idx = key.strip_prefix(REDSHIFT_CPU_NODE_PREFIX)?.parse().ok()?;
                Some((idx, series.mean(&key)?))
            })
            .collect();
        nodes.sort_by_key(|(idx, _)| *idx);
        snap.redshift_cpu_list = nodes.into_iter().map(|(_, v)| v).collect();
        snap
    }
}
