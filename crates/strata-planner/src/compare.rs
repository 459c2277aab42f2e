//! Ranking candidates.
//!
//! Both policies are strict total orders: every comparison ends with the
//! creation sequence, so the beam never depends on container iteration order.

use std::cmp::Ordering;

use strata_core::config::{ComparatorConfig, LatencyMetric};
use strata_core::id::CandidateSeq;

/// What the comparator reads from a candidate.
pub trait Rankable {
    fn seq(&self) -> CandidateSeq;
    fn latency_stats(&self) -> LatencyStats;
    /// Predicted `[p50, p90]` transaction latency; NaN when unknown.
    fn txn_latencies(&self) -> [f64; 2];
    fn monetary_cost(&self) -> f64;
    fn transition_time_s(&self) -> f64;
    fn transition_cost(&self) -> f64;

    fn transition_penalty(&self) -> f64 {
        ((1.0 + self.transition_time_s()) * (1.0 + self.transition_cost())).sqrt()
    }
}

/// Summary statistics over predicted analytical latencies. Non-finite
/// latencies count as infinitely slow.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencyStats {
    pub geomean: f64,
    pub max: f64,
    pub p99: f64,
    pub p90: f64,
}

impl LatencyStats {
    pub fn from_latencies(latencies: &[f64]) -> Self {
        if latencies.is_empty() {
            return Self {
                geomean: 0.0,
                max: 0.0,
                p99: 0.0,
                p90: 0.0,
            };
        }
        let mut sorted: Vec<f64> = latencies
            .iter()
            .map(|&l| if l.is_finite() { l } else { f64::INFINITY })
            .collect();
        sorted.sort_by(f64::total_cmp);

        let n = sorted.len() as f64;
        let geomean = (sorted.iter().map(|l| l.ln()).sum::<f64>() / n).exp();
        Self {
            geomean: if geomean.is_nan() { f64::INFINITY } else { geomean },
            max: sorted[sorted.len() - 1],
            p99: lower_quantile(&sorted, 0.99),
            p90: lower_quantile(&sorted, 0.90),
        }
    }

    pub fn get(&self, metric: LatencyMetric) -> f64 {
        match metric {
            LatencyMetric::Geomean => self.geomean,
            LatencyMetric::Max => self.max,
            LatencyMetric::P99 => self.p99,
            LatencyMetric::P90 => self.p90,
        }
    }
}

/// The sample at or just below the requested rank; never interpolates.
fn lower_quantile(sorted: &[f64], q: f64) -> f64 {
    let idx = (q * (sorted.len() - 1) as f64).floor() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

#[derive(Debug, Clone)]
pub struct Comparator {
    config: ComparatorConfig,
}

impl Comparator {
    pub fn new(config: ComparatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ComparatorConfig {
        &self.config
    }

    pub fn is_better_than<C: Rankable>(&self, a: &C, b: &C) -> bool {
        self.compare(a, b) == Ordering::Less
    }

    /// `Less` means `a` ranks ahead of `b`.
    pub fn compare<C: Rankable>(&self, a: &C, b: &C) -> Ordering {
        let by_score = match &self.config {
            ComparatorConfig::CostUnderCeilings {
                latency_metric,
                query_latency_ceiling_s,
                txn_p90_ceiling_s,
                significance_ratio,
            } => {
                let key = |c: &C| {
                    CeilingKey::of(
                        c,
                        *latency_metric,
                        *query_latency_ceiling_s,
                        *txn_p90_ceiling_s,
                        *significance_ratio,
                    )
                };
                key(a).cmp(&key(b))
            }
            ComparatorConfig::WeightedSum {
                latency_metric,
                perf_weight,
                cost_weight,
                transition_weight,
            } => {
                let score = |c: &C| {
                    let s = perf_weight * c.latency_stats().get(*latency_metric)
                        + cost_weight * c.monetary_cost()
                        + transition_weight * c.transition_penalty();
                    if s.is_nan() {
                        f64::INFINITY
                    } else {
                        s
                    }
                };
                score(a).total_cmp(&score(b))
            }
        };
        by_score.then_with(|| a.seq().cmp(&b.seq()))
    }
}

/// Lexicographic key for the ceiling policy. Over-ceiling amounts only take
/// part when the ceiling is exceeded.
#[derive(Debug)]
struct CeilingKey {
    txn_over: bool,
    txn_p90: f64,
    query_over: bool,
    perf: f64,
    monetary_bucket: i64,
    penalty_bucket: i64,
    perf_bucket: i64,
}

impl CeilingKey {
    fn of<C: Rankable>(
        c: &C,
        metric: LatencyMetric,
        query_ceiling: f64,
        txn_ceiling: f64,
        ratio: f64,
    ) -> Self {
        let txn_p90 = c.txn_latencies()[1];
        let txn_over = txn_p90 > txn_ceiling;
        let perf = c.latency_stats().get(metric);
        let query_over = !(perf <= query_ceiling);
        Self {
            txn_over,
            txn_p90: if txn_over { txn_p90 } else { 0.0 },
            query_over,
            perf: if query_over { perf } else { 0.0 },
            monetary_bucket: bucket(c.monetary_cost(), ratio),
            penalty_bucket: bucket(c.transition_penalty(), ratio),
            perf_bucket: bucket(perf, ratio),
        }
    }

    fn cmp(&self, other: &Self) -> Ordering {
        self.txn_over
            .cmp(&other.txn_over)
            .then_with(|| self.txn_p90.total_cmp(&other.txn_p90))
            .then_with(|| self.query_over.cmp(&other.query_over))
            .then_with(|| self.perf.total_cmp(&other.perf))
            .then_with(|| self.monetary_bucket.cmp(&other.monetary_bucket))
            .then_with(|| self.penalty_bucket.cmp(&other.penalty_bucket))
            .then_with(|| self.perf_bucket.cmp(&other.perf_bucket))
    }
}

/// Values within `ratio` of each other usually share a bucket. Bucketing a
/// value (instead of comparing ratios pairwise) keeps the order transitive.
fn bucket(x: f64, ratio: f64) -> i64 {
    if x.is_nan() || x == f64::INFINITY {
        return i64::MAX;
    }
    if x <= 0.0 {
        return i64::MIN;
    }
    (x.ln() / ratio.ln()).floor() as i64
}
