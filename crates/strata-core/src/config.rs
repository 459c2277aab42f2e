//! Configuration that downstream crates can serialize/deserialize.
//!
//! Every config has a `Default`, can be read from YAML, and accepts a few
//! `STRATA_*` environment overrides for the knobs operators touch most.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::engine::EngineMap;
use crate::error::{Error, Result};

/// Latency statistic the comparator ranks analytical performance by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LatencyMetric {
    Geomean,
    Max,
    P99,
    P90,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum ComparatorConfig {
    /// Ceilings first, then monetary cost, transition penalty, performance.
    /// Values within `significance_ratio` of each other compare equal.
    CostUnderCeilings {
        latency_metric: LatencyMetric,
        query_latency_ceiling_s: f64,
        txn_p90_ceiling_s: f64,
        significance_ratio: f64,
    },
    WeightedSum {
        latency_metric: LatencyMetric,
        perf_weight: f64,
        cost_weight: f64,
        transition_weight: f64,
    },
}

impl Default for ComparatorConfig {
    fn default() -> Self {
        ComparatorConfig::CostUnderCeilings {
            latency_metric: LatencyMetric::P90,
            query_latency_ceiling_s: 30.0,
            txn_p90_ceiling_s: 0.030,
            significance_ratio: 1.1,
        }
    }
}

/// Which search the planner runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlannerStrategy {
    /// Assign queries to engines one at a time.
    #[default]
    QueryBased,
    /// Assign groups of co-accessed tables to engine sets one at a time.
    TableBased,
}

impl FromStr for PlannerStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "query_based" | "query" => Ok(PlannerStrategy::QueryBased),
            "table_based" | "table" => Ok(PlannerStrategy::TableBased),
            other => Err(Error::Config(format!("unknown planner strategy '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatencyCeilingConfig {
    pub ceiling_s: f64,
    /// Consecutive epochs the ceiling must be exceeded for.
    pub sustained_epochs: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentChangeConfig {
    /// Epochs to wait after a provisioning change before replanning.
    pub delay_epochs: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VariableCostsConfig {
    /// Fractional change in hourly scan cost, in either direction.
    pub threshold: f64,
}

/// Replanning triggers. A trigger set to `null` is disabled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    pub enabled: bool,
    pub epoch_length_s: u64,
    /// Epochs to ignore after a new blueprint or a replan.
    pub observe_delay_epochs: u32,
    pub query_latency_ceiling: Option<LatencyCeilingConfig>,
    pub txn_latency_ceiling: Option<LatencyCeilingConfig>,
    pub recent_change: Option<RecentChangeConfig>,
    pub variable_costs: Option<VariableCostsConfig>,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            epoch_length_s: 300,
            observe_delay_epochs: 0,
            query_latency_ceiling: Some(LatencyCeilingConfig {
                ceiling_s: 30.0,
                sustained_epochs: 3,
            }),
            txn_latency_ceiling: Some(LatencyCeilingConfig {
                ceiling_s: 0.030,
                sustained_epochs: 3,
            }),
            recent_change: Some(RecentChangeConfig { delay_epochs: 5 }),
            variable_costs: Some(VariableCostsConfig { threshold: 0.2 }),
        }
    }
}

impl TriggerConfig {
    pub fn epoch_length(&self) -> Duration {
        Duration::from_secs(self.epoch_length_s)
    }

    pub fn validate(&self) -> Result<()> {
        if self.epoch_length_s == 0 {
            return Err(Error::Config("triggers.epoch_length_s must be positive".into()));
        }
        let ceilings = [
            ("query_latency_ceiling", self.query_latency_ceiling),
            ("txn_latency_ceiling", self.txn_latency_ceiling),
        ];
        for (name, c) in ceilings.iter().filter_map(|(n, c)| c.map(|c| (n, c))) {
            if c.ceiling_s.is_nan() || c.ceiling_s <= 0.0 || c.sustained_epochs == 0 {
                return Err(Error::Config(format!(
                    "triggers.{name} needs a positive ceiling and at least one epoch"
                )));
            }
        }
        if let Some(v) = self.variable_costs {
            if v.threshold.is_nan() || v.threshold <= 0.0 {
                return Err(Error::Config(
                    "triggers.variable_costs.threshold must be positive".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Per-schema transactional model: piecewise CPU fit (`c_1`, `c_2`) and the
/// queuing-latency fit `Q(u) = a / (k - u) + b`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TxnModelCoefs {
    pub c_1: f64,
    pub c_2: f64,
    pub k: f64,
    pub b_p50: f64,
    pub b_p90: f64,
}

impl Default for TxnModelCoefs {
    fn default() -> Self {
        Self {
            c_1: 0.0025,
            c_2: 0.0035,
            k: 1.05,
            b_p50: 0.002,
            b_p90: 0.004,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    pub strategy: PlannerStrategy,
    pub beam_size: usize,
    /// Most engines one table may be kept on by the table-based search.
    pub max_table_copies: u32,
    /// Upper bound on how far (as a capacity ratio) a provisioning may move.
    pub max_provisioning_multiplier: f64,
    /// CPU ceiling in percent; at or above it a provisioning is infeasible.
    pub max_feasible_cpu: f64,

    pub athena_usd_per_mb_scanned: f64,
    pub athena_min_mb_per_query: f64,
    pub aurora_usd_per_million_ios: f64,
    pub aurora_storage_usd_per_mb_per_month: f64,
    pub s3_usd_per_mb_per_month: f64,

    pub extract_rate_mb_per_s: EngineMap<f64>,
    pub load_rate_mb_per_s: EngineMap<f64>,
    pub aurora_provisioning_change_time_s: f64,
    pub redshift_provisioning_change_time_s: f64,

    /// Coefficients over the squared basis `[load*r, load, r, 1]`.
    pub aurora_scaling_coefs: [f64; 4],
    /// Coefficients over `[R/(cpus*nodes), 1]`.
    pub redshift_scaling_coefs: [f64; 2],
    pub aurora_prov_to_peak_cpu_denorm: f64,
    pub aurora_initialize_load_fraction: f64,
    pub redshift_initialize_load_fraction: f64,
    pub aurora_min_load_removal_fraction: f64,
    pub redshift_min_load_removal_fraction: f64,
    pub redshift_peak_load_threshold_pct: f64,
    pub redshift_peak_load_multiplier: f64,

    /// Keyed by schema name; `"default"` is the fallback entry.
    pub aurora_txns: BTreeMap<String, TxnModelCoefs>,
    pub comparator: ComparatorConfig,
    pub triggers: TriggerConfig,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        let mut aurora_txns = BTreeMap::new();
        aurora_txns.insert("default".to_string(), TxnModelCoefs::default());
        Self {
            strategy: PlannerStrategy::QueryBased,
            beam_size: 100,
            max_table_copies: 3,
            max_provisioning_multiplier: 2.5,
            max_feasible_cpu: 85.0,
            athena_usd_per_mb_scanned: 5.0 / 1_000_000.0,
            athena_min_mb_per_query: 10.0,
            aurora_usd_per_million_ios: 0.20,
            aurora_storage_usd_per_mb_per_month: 0.10 / 1_000.0,
            s3_usd_per_mb_per_month: 0.023 / 1_000.0,
            extract_rate_mb_per_s: EngineMap {
                aurora: 10.0,
                redshift: 10.0,
                athena: 10.0,
            },
            load_rate_mb_per_s: EngineMap {
                aurora: 10.0,
                redshift: 10.0,
                athena: 10.0,
            },
            aurora_provisioning_change_time_s: 600.0,
            redshift_provisioning_change_time_s: 900.0,
            aurora_scaling_coefs: [0.0, 0.01, 0.5, 0.5],
            redshift_scaling_coefs: [0.5, 0.5],
            aurora_prov_to_peak_cpu_denorm: 0.85,
            aurora_initialize_load_fraction: 0.25,
            redshift_initialize_load_fraction: 0.25,
            aurora_min_load_removal_fraction: 0.75,
            redshift_min_load_removal_fraction: 0.75,
            redshift_peak_load_threshold_pct: 95.0,
            redshift_peak_load_multiplier: 1.5,
            aurora_txns,
            comparator: ComparatorConfig::default(),
            triggers: TriggerConfig::default(),
        }
    }
}

impl PlannerConfig {
    /// Transactional model for `schema`, falling back to `"default"`.
    pub fn txn_coefs(&self, schema: &str) -> TxnModelCoefs {
        self.aurora_txns
            .get(schema)
            .or_else(|| self.aurora_txns.get("default"))
            .copied()
            .unwrap_or_default()
    }

    pub fn validate(&self) -> Result<()> {
        if self.beam_size == 0 {
            return Err(Error::Config("beam_size must be at least 1".into()));
        }
        if !(1..=3).contains(&self.max_table_copies) {
            return Err(Error::Config("max_table_copies must be 1, 2, or 3".into()));
        }
        if self.max_provisioning_multiplier < 1.0 {
            return Err(Error::Config(
                "max_provisioning_multiplier must be >= 1".into(),
            ));
        }
        if !(0.0..=100.0).contains(&self.max_feasible_cpu) {
            return Err(Error::Config(
                "max_feasible_cpu is a percentage in [0, 100]".into(),
            ));
        }
        for (engine, rate) in self
            .extract_rate_mb_per_s
            .iter()
            .chain(self.load_rate_mb_per_s.iter())
        {
            if *rate <= 0.0 {
                return Err(Error::Config(format!(
                    "movement rate for {engine} must be positive"
                )));
            }
        }
        self.triggers.validate()
    }

    /// Create a config from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - `STRATA_PLANNER_STRATEGY`: `query_based` or `table_based`
    /// - `STRATA_BEAM_SIZE`: beam width
    /// - `STRATA_MAX_PROVISIONING_MULTIPLIER`: provisioning neighborhood bound
    /// - `STRATA_MAX_FEASIBLE_CPU`: CPU ceiling in percent
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.apply_env();
        cfg
    }

    pub fn apply_env(&mut self) {
        if let Some(v) = env_parse("STRATA_PLANNER_STRATEGY") {
            self.strategy = v;
        }
        if let Some(v) = env_parse("STRATA_BEAM_SIZE") {
            self.beam_size = v;
        }
        if let Some(v) = env_parse("STRATA_MAX_PROVISIONING_MULTIPLIER") {
            self.max_provisioning_multiplier = v;
        }
        if let Some(v) = env_parse("STRATA_MAX_FEASIBLE_CPU") {
            self.max_feasible_cpu = v;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl BackoffConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrontEndConfig {
    pub reconnect: BackoffConfig,
    pub session_start: BackoffConfig,
    /// Probability that a transactional statement is written to the query log.
    pub txn_log_prob: f64,
    pub query_log_path: Option<String>,
    pub internal_command_prefix: String,
    pub sketch_relative_accuracy: f64,
}

impl Default for FrontEndConfig {
    fn default() -> Self {
        Self {
            reconnect: BackoffConfig {
                max_retries: 100,
                base_delay_ms: 1_000,
                max_delay_ms: 60_000,
            },
            session_start: BackoffConfig {
                max_retries: 20,
                base_delay_ms: 500,
                max_delay_ms: 10_000,
            },
            txn_log_prob: 0.01,
            query_log_path: None,
            internal_command_prefix: "STRATA_".to_string(),
            sketch_relative_accuracy: 0.01,
        }
    }
}

impl FrontEndConfig {
    /// Environment variables:
    /// - `STRATA_TXN_LOG_PROB`
    /// - `STRATA_QUERY_LOG`: path of the JSONL query log
    /// - `STRATA_RECONNECT_MAX_RETRIES`, `STRATA_RECONNECT_BASE_MS`, `STRATA_RECONNECT_MAX_MS`
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.apply_env();
        cfg
    }

    pub fn apply_env(&mut self) {
        if let Some(v) = env_parse("STRATA_TXN_LOG_PROB") {
            self.txn_log_prob = v;
        }
        if let Ok(s) = std::env::var("STRATA_QUERY_LOG") {
            self.query_log_path = Some(s);
        }
        if let Some(v) = env_parse("STRATA_RECONNECT_MAX_RETRIES") {
            self.reconnect.max_retries = v;
        }
        if let Some(v) = env_parse("STRATA_RECONNECT_BASE_MS") {
            self.reconnect.base_delay_ms = v;
        }
        if let Some(v) = env_parse("STRATA_RECONNECT_MAX_MS") {
            self.reconnect.max_delay_ms = v;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory for versioned blueprints.
    pub root: String,
    pub retry_max_retries: usize,
    pub retry_initial_backoff_ms: u64,
    pub retry_max_backoff_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: "/tmp/strata-blueprints".to_string(),
            retry_max_retries: 3,
            retry_initial_backoff_ms: 200,
            retry_max_backoff_ms: 5_000,
        }
    }
}

impl StorageConfig {
    /// Environment variables: `STRATA_BLUEPRINT_ROOT`.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.apply_env();
        cfg
    }

    pub fn apply_env(&mut self) {
        if let Ok(s) = std::env::var("STRATA_BLUEPRINT_ROOT") {
            self.root = s;
        }
    }
}

/// Everything a deployment configures, as laid out in one YAML file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrataConfig {
    pub planner: PlannerConfig,
    pub front_end: FrontEndConfig,
    pub storage: StorageConfig,
}

impl StrataConfig {
    pub fn from_yaml_str(s: &str) -> Result<Self> {
        let cfg: StrataConfig = serde_yaml::from_str(s)?;
        cfg.planner.validate()?;
        Ok(cfg)
    }

    /// Reads a YAML file, then applies `STRATA_*` environment overrides.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Read(format!("{}: {e}", path.display())))?;
        let mut cfg = Self::from_yaml_str(&text)?;
        cfg.apply_env();
        cfg.planner.validate()?;
        Ok(cfg)
    }

    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.apply_env();
        cfg
    }

    fn apply_env(&mut self) {
        self.planner.apply_env();
        self.front_end.apply_env();
        self.storage.apply_env();
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse::<T>().ok())
}
