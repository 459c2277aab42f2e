//! Redshift: predicted max-node CPU and query latency on a provisioning.

use strata_core::config::PlannerConfig;
use strata_core::engine::Engine;
use strata_core::provisioning::Provisioning;

use crate::context::ScoringContext;
use crate::queuing::mm1_wait_time;

/// Total vCPUs of the provisioning the latency model was trained on
/// (`dc2.large x2`).
const REFERENCE_TOTAL_CPUS: f64 = 4.0;

#[derive(Debug, Clone, PartialEq)]
pub struct ClusteredScore {
    pub scaled_latencies: Vec<f64>,
    /// Predicted utilization of the busiest node, in `[0, 1]`.
    pub max_node_cpu_util: f64,
    pub query_factor: Option<f64>,
}

impl ClusteredScore {
    pub fn compute(
        base_latencies: &[f64],
        arrival_counts: &[f64],
        curr: &Provisioning,
        next: &Provisioning,
        ctx: &ScoringContext,
    ) -> Self {
        let query_factor = Self::query_movement_factor(base_latencies, arrival_counts, ctx);
        let util = Self::predict_max_node_cpu_util(curr, next, query_factor, ctx);

        if !next.is_on() {
            return Self {
                scaled_latencies: vec![f64::INFINITY; base_latencies.len()],
                max_node_cpu_util: 0.0,
                query_factor,
            };
        }

        let scaled = Self::scale_for_resources(base_latencies, next, &ctx.config);
        let scaled_latencies = if scaled.is_empty() {
            scaled
        } else {
            let mean = scaled.iter().sum::<f64>() / scaled.len() as f64;
            let wait = mm1_wait_time(mean, util, 0.9);
            scaled.into_iter().map(|l| l + wait).collect()
        };
        Self {
            scaled_latencies,
            max_node_cpu_util: util,
            query_factor,
        }
    }

    /// `lat * (c0 * R / (cpus * nodes) + c1)`.
    pub fn scale_for_resources(
        base_latencies: &[f64],
        to: &Provisioning,
        config: &PlannerConfig,
    ) -> Vec<f64> {
        let resource_factor = REFERENCE_TOTAL_CPUS / (to.vcpus() * to.num_nodes as f64);
        let [c0, c1] = config.redshift_scaling_coefs;
        let k = c0 * resource_factor + c1;
        base_latencies.iter().map(|l| l * k).collect()
    }

    /// Ratio of next to current weighted latency on Redshift, both measured
    /// on the current provisioning.
    pub fn query_movement_factor(
        base_latencies: &[f64],
        arrival_counts: &[f64],
        ctx: &ScoringContext,
    ) -> Option<f64> {
        let norm = ctx.latency_norm_factor(Engine::Redshift)?;
        let on_current =
            Self::scale_for_resources(base_latencies, ctx.current_blueprint.redshift(), &ctx.config);
        let total: f64 = on_current
            .iter()
            .zip(arrival_counts)
            .map(|(l, c)| l * c)
            .sum();
        Some(total / norm)
    }

    pub fn predict_max_node_cpu_util(
        curr: &Provisioning,
        next: &Provisioning,
        query_factor: Option<f64>,
        ctx: &ScoringContext,
    ) -> f64 {
        let cfg = &ctx.config;
        match (curr.is_on(), next.is_on()) {
            (_, false) => 0.0,
            // Nothing observed to reweigh; prime with a fixed fraction.
            (false, true) => cfg.redshift_initialize_load_fraction,
            (true, true) => {
                let primed = query_factor.is_none()
                    && !ctx.current_query_locations.redshift.is_empty();
                if primed || ctx.metrics.redshift_cpu_list.is_empty() {
                    return cfg.redshift_initialize_load_fraction;
                }

                let mut utils: Vec<f64> = ctx
                    .metrics
                    .redshift_cpu_list
                    .iter()
                    .map(|u| u / 100.0)
                    .collect();
                utils.sort_by(f64::total_cmp);
                let curr_cpus = curr.vcpus();
                let denorm: Vec<f64> = utils.iter().map(|u| u * curr_cpus).collect();
                let max_util = utils.last().copied().unwrap_or(0.0);
                let mut max_denorm = max_util * curr_cpus;
                if max_util > cfg.redshift_peak_load_threshold_pct / 100.0 {
                    max_denorm *= cfg.redshift_peak_load_multiplier;
                }

                let (curr_nodes, next_nodes) = (curr.num_nodes, next.num_nodes);
                let skew = ctx.cpu_skew_adjustment();
                let next_max_denorm = if next_nodes > curr_nodes {
                    // A hot node stays hot when load is skewed.
                    if skew < 0.5 {
                        max_denorm
                    } else {
                        max_denorm * (curr_nodes as f64 / next_nodes as f64).powf(skew)
                    }
                } else if next_nodes < curr_nodes {
                    let removed = (curr_nodes - next_nodes) as usize;
                    let redistributed: f64 = denorm.iter().take(removed).sum();
                    max_denorm + redistributed / next_nodes as f64
                } else {
                    max_denorm
                };

                let factor = clean_query_factor(query_factor, cfg.redshift_min_load_removal_fraction);
                let next_util = factor * next_max_denorm / next.vcpus();
                if next_util.is_nan() {
                    return next_util;
                }
                next_util.clamp(0.0, 1.0)
            }
        }
    }

    /// `1 - sqrt(mean((u_i - u_max)^2))` over the non-max entries of a
    /// sorted utilization list.
    pub fn skew_adjustment(sorted_utils: &[f64]) -> f64 {
        let Some((&max, rest)) = sorted_utils.split_last() else {
            return 1.0;
        };
        if rest.is_empty() {
            return 1.0;
        }
        let mse = rest.iter().map(|u| (u - max).powi(2)).sum::<f64>() / rest.len() as f64;
        1.0 - mse.sqrt()
    }
}

/// Load removal is clamped so moving queries away never looks cheaper than
/// `min_removal`; growth passes through unchanged.
pub(crate) fn clean_query_factor(factor: Option<f64>, min_removal: f64) -> f64 {
    match factor {
        None => 1.0,
        Some(f) if f >= 1.0 => f,
        Some(f) => f.max(min_removal),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing::*;
    use crate::metrics::MetricsSnapshot;
    use strata_core::engine::EngineMap;

    fn metrics(cpus: &[f64]) -> MetricsSnapshot {
        MetricsSnapshot {
            redshift_cpu_list: cpus.to_vec(),
            ..MetricsSnapshot::default()
        }
    }

    fn on_redshift(indices: Vec<usize>) -> EngineMap<Vec<usize>> {
        EngineMap {
            aurora: vec![],
            redshift: indices,
            athena: vec![],
        }
    }

    #[test]
    fn reference_provisioning_is_identity_scaled() {
        let cfg = PlannerConfig::default();
        let out = ClusteredScore::scale_for_resources(
            &[2.0],
            &Provisioning::new("dc2.large", 2),
            &cfg,
        );
        assert!((out[0] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn turning_off_yields_infinite_latency() {
        let bp = blueprint(
            Provisioning::new("db.r6g.xlarge", 1),
            Provisioning::new("dc2.large", 2),
        );
        let ctx = context(bp, vec![query(1.0, 1.0)], metrics(&[40.0, 40.0]), on_redshift(vec![0]));
        let score = ClusteredScore::compute(
            &[1.0, 2.0],
            &[1.0, 1.0],
            &Provisioning::new("dc2.large", 2),
            &Provisioning::new("dc2.large", 0),
            &ctx,
        );
        assert_eq!(score.max_node_cpu_util, 0.0);
        assert!(score.scaled_latencies.iter().all(|l| l.is_infinite()));
    }

    #[test]
    fn turning_on_primes_load() {
        let bp = blueprint(
            Provisioning::new("db.r6g.xlarge", 1),
            Provisioning::new("dc2.large", 0),
        );
        let ctx = context(bp, vec![], MetricsSnapshot::default(), EngineMap::default());
        let util = ClusteredScore::predict_max_node_cpu_util(
            &Provisioning::new("dc2.large", 0),
            &Provisioning::new("dc2.large", 2),
            None,
            &ctx,
        );
        assert_eq!(util, ctx.config.redshift_initialize_load_fraction);
    }

    #[test]
    fn removing_nodes_redistributes_the_lightest() {
        let bp = blueprint(
            Provisioning::new("db.r6g.xlarge", 1),
            Provisioning::new("dc2.large", 4),
        );
        let ctx = context(
            bp,
            vec![query(1.0, 1.0)],
            metrics(&[40.0, 10.0, 40.0, 20.0]),
            on_redshift(vec![0]),
        );
        let util = ClusteredScore::predict_max_node_cpu_util(
            &Provisioning::new("dc2.large", 4),
            &Provisioning::new("dc2.large", 2),
            Some(1.0),
            &ctx,
        );
        // max 0.4*2 = 0.8 denorm, plus (0.2 + 0.4) / 2 = 0.3, over 2 cpus.
        assert!((util - 0.55).abs() < 1e-12);
    }

    #[test]
    fn skewed_cluster_does_not_benefit_from_more_nodes() {
        let bp = blueprint(
            Provisioning::new("db.r6g.xlarge", 1),
            Provisioning::new("dc2.large", 2),
        );
        let ctx = context(bp, vec![query(1.0, 1.0)], metrics(&[90.0, 0.0]), on_redshift(vec![0]));
        assert!(ctx.cpu_skew_adjustment() < 0.5);
        let util = ClusteredScore::predict_max_node_cpu_util(
            &Provisioning::new("dc2.large", 2),
            &Provisioning::new("dc2.large", 4),
            Some(1.0),
            &ctx,
        );
        assert!((util - 0.9).abs() < 1e-12);
    }

    #[test]
    fn factor_clamp_is_asymmetric() {
        assert_eq!(clean_query_factor(Some(0.1), 0.75), 0.75);
        assert_eq!(clean_query_factor(Some(0.9), 0.75), 0.9);
        assert_eq!(clean_query_factor(Some(3.0), 0.75), 3.0);
        assert_eq!(clean_query_factor(None, 0.75), 1.0);
    }

    #[test]
    fn skew_of_uniform_load_is_one() {
        assert_eq!(ClusteredScore::skew_adjustment(&[0.3, 0.3, 0.3]), 1.0);
        assert_eq!(ClusteredScore::skew_adjustment(&[0.7]), 1.0);
        assert_eq!(ClusteredScore::skew_adjustment(&[]), 1.0);
    }
}
