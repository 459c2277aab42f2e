//! Inputs of one planning pass, bundled and frozen.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use strata_core::blueprint::Blueprint;
use strata_core::config::PlannerConfig;
use strata_core::engine::{Engine, EngineMap};
use strata_core::error::{Error, Result};

use crate::clustered::ClusteredScore;
use crate::metrics::MetricsSnapshot;
use crate::workload::Workload;

/// Everything the predictors and candidates read while scoring.
///
/// Built once per pass and shared by reference; nothing inside changes after
/// construction except the one-shot warning latch.
#[derive(Debug)]
pub struct ScoringContext {
    pub current_blueprint: Arc<Blueprint>,
    pub workload: Workload,
    pub metrics: MetricsSnapshot,
    pub config: PlannerConfig,
    /// Indices into `workload.analytical`, grouped by the engine the current
    /// blueprint routes them to.
    pub current_query_locations: EngineMap<Vec<usize>>,
    latency_norm_factor: EngineMap<Option<f64>>,
    cpu_skew_adjustment: f64,
    txn_warning_logged: AtomicBool,
}

impl ScoringContext {
    pub fn new(
        current_blueprint: Arc<Blueprint>,
        workload: Workload,
        metrics: MetricsSnapshot,
        config: PlannerConfig,
        current_query_locations: EngineMap<Vec<usize>>,
    ) -> Result<Self> {
        workload.validate()?;
        config.validate()?;
        let n = workload.analytical.len();
        for (engine, indices) in current_query_locations.iter() {
            if let Some(bad) = indices.iter().find(|&&i| i >= n) {
                return Err(Error::Config(format!(
                    "query index {bad} routed to {engine} is out of range ({n} queries)"
                )));
            }
        }

        let latency_norm_factor = compute_norm_factors(
            &current_blueprint,
            &workload,
            &config,
            &current_query_locations,
        );

        let mut cpu_utils: Vec<f64> = metrics
            .redshift_cpu_list
            .iter()
            .map(|u| u / 100.0)
            .collect();
        cpu_utils.sort_by(f64::total_cmp);
        let cpu_skew_adjustment = ClusteredScore::skew_adjustment(&cpu_utils);

        tracing::debug!(
            schema = current_blueprint.schema_name(),
            queries = n,
            aurora_norm = ?latency_norm_factor.aurora,
            redshift_norm = ?latency_norm_factor.redshift,
            skew = cpu_skew_adjustment,
            "scoring context ready"
        );

        Ok(Self {
            current_blueprint,
            workload,
            metrics,
            config,
            current_query_locations,
            latency_norm_factor,
            cpu_skew_adjustment,
            txn_warning_logged: AtomicBool::new(false),
        })
    }

    pub fn schema_name(&self) -> &str {
        self.current_blueprint.schema_name()
    }

    /// Weighted latency the current routing sends to `engine`. `None` when the
    /// engine receives no queries today, so load cannot be reweighed.
    pub fn latency_norm_factor(&self, engine: Engine) -> Option<f64> {
        self.latency_norm_factor[engine]
    }

    /// 1.0 means even CPU across Redshift nodes; towards 0 means one hot node.
    pub fn cpu_skew_adjustment(&self) -> f64 {
        self.cpu_skew_adjustment
    }

    pub fn current_aurora_has_replicas(&self) -> bool {
        self.current_blueprint.aurora().read_replicas() > 0
    }

    /// Returns true the first time it is called on this context.
    pub(crate) fn take_txn_warning(&self) -> bool {
        !self.txn_warning_logged.swap(true, Ordering::Relaxed)
    }
}

fn compute_norm_factors(
    bp: &Blueprint,
    workload: &Workload,
    config: &PlannerConfig,
    locations: &EngineMap<Vec<usize>>,
) -> EngineMap<Option<f64>> {
    let weighted = |engine: Engine, lats: &[f64]| -> Option<f64> {
        let counts = workload.arrival_counts(&locations[engine]);
        let total: f64 = lats.iter().zip(&counts).map(|(l, c)| l * c).sum();
        (total != 0.0).then_some(total)
    };

    let mut out = EngineMap::default();
    if !locations.aurora.is_empty() {
        let base: Vec<f64> = locations
            .aurora
            .iter()
            .map(|&i| workload.analytical[i].base_latency(Engine::Aurora))
            .collect();
        out.aurora = weighted(Engine::Aurora, &base);
    }
    if !locations.redshift.is_empty() {
        let base: Vec<f64> = locations
            .redshift
            .iter()
            .map(|&i| workload.analytical[i].base_latency(Engine::Redshift))
            .collect();
        let scaled = ClusteredScore::scale_for_resources(&base, bp.redshift(), config);
        out.redshift = weighted(Engine::Redshift, &scaled);
    }
    out
}

#[cfg(test)]
pub(crate) mod testing {
    //! Fixtures shared by the predictor tests.

    use super::*;
    use std::collections::BTreeMap;
    use strata_core::blueprint::{RoutingPolicy, RoutingSpec, TableDef};
    use strata_core::engine::EngineBitmap;
    use strata_core::placement::TablePlacement;
    use strata_core::provisioning::Provisioning;

    use crate::workload::AnalyticalQuery;

    pub fn blueprint(aurora: Provisioning, redshift: Provisioning) -> Arc<Blueprint> {
        let mut placement = TablePlacement::new();
        placement.set("t", EngineBitmap::of(Engine::Aurora));
        Arc::new(Blueprint::new(
            "test",
            vec![TableDef::new("t")],
            placement,
            aurora,
            redshift,
            RoutingSpec::definite(RoutingPolicy::RuleBased),
        ))
    }

    pub fn query(lat: f64, count: f64) -> AnalyticalQuery {
        AnalyticalQuery {
            sql: format!("SELECT {lat} FROM t"),
            tables: vec!["t".into()],
            arrival_count: count,
            predicted_latency_s: EngineMap {
                aurora: lat,
                redshift: lat,
                athena: lat,
            },
            athena_bytes: 0,
            aurora_pages: 0,
        }
    }

    pub fn context(
        bp: Arc<Blueprint>,
        queries: Vec<AnalyticalQuery>,
        metrics: MetricsSnapshot,
        locations: EngineMap<Vec<usize>>,
    ) -> ScoringContext {
        let workload = Workload {
            period_s: 3600.0,
            analytical: queries,
            transactional: vec![],
            table_sizes_mb: BTreeMap::new(),
        };
        ScoringContext::new(bp, workload, metrics, PlannerConfig::default(), locations)
            .unwrap()
    }
}
