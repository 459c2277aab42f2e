//! The predicted next workload, as handed over by the cost-prediction models.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use strata_core::engine::{Engine, EngineMap};
use strata_core::error::{Error, Result};

/// A read-only query with per-engine predictions.
///
/// `predicted_latency_s` is the model's estimate on each engine's reference
/// provisioning; predictors rescale it for the provisioning under test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticalQuery {
    pub sql: String,
    #[serde(default)]
    pub tables: Vec<String>,
    /// Expected executions over the workload period.
    pub arrival_count: f64,
    pub predicted_latency_s: EngineMap<f64>,
    /// Bytes Athena would scan for this query over the period.
    #[serde(default)]
    pub athena_bytes: u64,
    /// Pages Aurora would read for this query over the period.
    #[serde(default)]
    pub aurora_pages: u64,
}

impl AnalyticalQuery {
    pub fn base_latency(&self, engine: Engine) -> f64 {
        self.predicted_latency_s[engine]
    }

    /// How much the choice of engine matters for this query: the spread of
    /// predicted latencies, weighted by how often it runs.
    pub fn gain(&self) -> f64 {
        let lats = [
            self.predicted_latency_s.aurora,
            self.predicted_latency_s.redshift,
            self.predicted_latency_s.athena,
        ];
        let max = lats.iter().copied().fold(f64::MIN, f64::max);
        let min = lats.iter().copied().fold(f64::MAX, f64::min);
        self.arrival_count * (max - min)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxnStatement {
    pub sql: String,
    #[serde(default)]
    pub tables: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workload {
    /// Length of the period the arrival counts cover.
    pub period_s: f64,
    pub analytical: Vec<AnalyticalQuery>,
    #[serde(default)]
    pub transactional: Vec<TxnStatement>,
    #[serde(default)]
    pub table_sizes_mb: BTreeMap<String, f64>,
}

impl Workload {
    pub fn period_hours(&self) -> f64 {
        self.period_s / 3600.0
    }

    pub fn table_size_mb(&self, table: &str) -> f64 {
        self.table_sizes_mb.get(table).copied().unwrap_or(0.0)
    }

    pub fn arrival_counts(&self, indices: &[usize]) -> Vec<f64> {
        indices
            .iter()
            .map(|&i| self.analytical[i].arrival_count)
            .collect()
    }

    /// Fills in table lists the workload file left empty.
    pub fn fill_missing_tables(&mut self, mut extract: impl FnMut(&str) -> Vec<String>) {
        for q in &mut self.analytical {
            if q.tables.is_empty() {
                q.tables = extract(&q.sql);
            }
        }
        for t in &mut self.transactional {
            if t.tables.is_empty() {
                t.tables = extract(&t.sql);
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.period_s > 0.0) {
            return Err(Error::Config(format!(
                "workload period must be positive, got {}",
                self.period_s
            )));
        }
        for (idx, q) in self.analytical.iter().enumerate() {
            if !q.arrival_count.is_finite() || q.arrival_count < 0.0 {
                return Err(Error::Config(format!(
                    "query {idx} has an invalid arrival count"
                )));
            }
            for (engine, lat) in q.predicted_latency_s.iter() {
                if lat.is_nan() || *lat < 0.0 {
                    return Err(Error::Config(format!(
                        "query {idx} has an invalid {engine} latency prediction"
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(a: f64, r: f64, at: f64, count: f64) -> AnalyticalQuery {
        AnalyticalQuery {
            sql: "SELECT 1".into(),
            tables: vec![],
            arrival_count: count,
            predicted_latency_s: EngineMap {
                aurora: a,
                redshift: r,
                athena: at,
            },
            athena_bytes: 0,
            aurora_pages: 0,
        }
    }

    #[test]
    fn gain_is_weighted_spread() {
        assert_eq!(query(1.0, 4.0, 2.0, 2.0).gain(), 6.0);
    }

    #[test]
    fn rejects_non_positive_period() {
        let w = Workload {
            period_s: 0.0,
            analytical: vec![],
            transactional: vec![],
            table_sizes_mb: BTreeMap::new(),
        };
        assert!(w.validate().is_err());
    }
}
