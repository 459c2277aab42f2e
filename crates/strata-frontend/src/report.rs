//! Latency and throughput figures a front end reports to the control plane.

use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::sketch::LatencySketch;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Percentiles {
    pub p50: Option<f64>,
    pub p90: Option<f64>,
    pub p99: Option<f64>,
}

impl Percentiles {
    fn of(sketch: &LatencySketch) -> Self {
        Self {
            p50: sketch.quantile(0.5),
            p90: sketch.quantile(0.9),
            p99: sketch.quantile(0.99),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsReport {
    pub txn_completions_per_s: f64,
    pub txn_latency_s: Percentiles,
    pub analytical_latency_s: Percentiles,
    pub txn_samples: u64,
    pub analytical_samples: u64,
}

/// Accumulates between reports.
#[derive(Debug)]
pub(crate) struct Reporting {
    txn: LatencySketch,
    analytical: LatencySketch,
    txn_completions: u64,
    since: Instant,
}

impl Reporting {
    pub(crate) fn new(relative_accuracy: f64) -> Self {
        Self {
            txn: LatencySketch::new(relative_accuracy),
            analytical: LatencySketch::new(relative_accuracy),
            txn_completions: 0,
            since: Instant::now(),
        }
    }

    pub(crate) fn record(&mut self, transactional: bool, latency_s: f64) {
        if transactional {
            self.txn.add(latency_s);
        } else {
            self.analytical.add(latency_s);
        }
    }

    pub(crate) fn transaction_completed(&mut self) {
        self.txn_completions += 1;
    }

    pub(crate) fn snapshot(&self) -> MetricsReport {
        let elapsed = self.since.elapsed().as_secs_f64();
        let rate = if elapsed > 0.0 {
            self.txn_completions as f64 / elapsed
        } else {
            0.0
        };
        MetricsReport {
            txn_completions_per_s: rate,
            txn_latency_s: Percentiles::of(&self.txn),
            analytical_latency_s: Percentiles::of(&self.analytical),
            txn_samples: self.txn.count(),
            analytical_samples: self.analytical.count(),
        }
    }

    pub(crate) fn take(&mut self) -> MetricsReport {
        let report = self.snapshot();
        self.txn.clear();
        self.analytical.clear();
        self.txn_completions = 0;
        self.since = Instant::now();
        report
    }
}
