//! Aurora: transactional and analytical load on a writer plus read replicas.
//!
//! Transactions always run on the writer. Analytical queries run on the
//! replicas when there are any, otherwise they share the writer with the
//! transactions. Read replicas relieve load but do not speed queries up.

use strata_core::config::PlannerConfig;
use strata_core::engine::Engine;
use strata_core::provisioning::Provisioning;

use crate::clustered::clean_query_factor;
use crate::context::ScoringContext;
use crate::queuing::mm1_wait_time;

/// vCPUs of `db.r6g.xlarge`, the provisioning latencies are predicted on.
const REFERENCE_CPUS: f64 = 4.0;

#[derive(Debug, Clone, PartialEq)]
pub struct TransactionalScore {
    pub scaled_latencies: Vec<f64>,
    /// Predicted `[p50, p90]` transaction latency in seconds.
    pub scaled_txn_lats: [f64; 2],
    pub analytics_per_machine_load: f64,
    pub analytics_per_machine_cpu_denorm: f64,
    pub txn_cpu_denorm: f64,
    pub peak_cpu_denorm: f64,
    pub next_cpus: f64,
    pub query_factor: Option<f64>,
}

impl TransactionalScore {
    pub fn compute(
        base_latencies: &[f64],
        arrival_counts: &[f64],
        curr: &Provisioning,
        next: &Provisioning,
        ctx: &ScoringContext,
    ) -> Self {
        let cfg = &ctx.config;
        let m = &ctx.metrics;
        let curr_cpus = curr.vcpus();
        let next_cpus = next.vcpus();

        if !next.is_on() {
            return Self {
                scaled_latencies: vec![f64::INFINITY; base_latencies.len()],
                scaled_txn_lats: [f64::NAN; 2],
                analytics_per_machine_load: 0.0,
                analytics_per_machine_cpu_denorm: 0.0,
                txn_cpu_denorm: 0.0,
                peak_cpu_denorm: 0.0,
                next_cpus,
                query_factor: None,
            };
        }

        let curr_has_replicas = curr.read_replicas() > 0;
        let no_queries_today = ctx.current_query_locations.aurora.is_empty();
        let writer_load = m.aurora_writer_load_minute_avg;
        let writer_cpu_denorm = m.aurora_writer_cpu_avg / 100.0 * curr_cpus;

        // 1. Transactional share of the writer.
        let (txn_load, txn_cpu_denorm) = if curr_has_replicas || no_queries_today {
            (writer_load, writer_cpu_denorm)
        } else {
            let model = cfg.txn_coefs(ctx.schema_name());
            let thpt = m.txn_completions_per_s;
            let limit = curr_cpus / 2.0;
            let mut cpu = model.c_1 * thpt;
            // The fit has a knee at half the cores.
            if cpu > limit {
                cpu = model.c_2 * (thpt - limit / model.c_1) + limit;
            }
            if (cpu > writer_load || cpu > writer_cpu_denorm) && ctx.take_txn_warning() {
                tracing::warn!(
                    writer_load,
                    writer_cpu_denorm,
                    txn_thpt = thpt,
                    predicted_txn_cpu = cpu,
                    "predicted transactional load exceeds the observed writer load"
                );
            }
            (cpu, cpu)
        };

        // 2. Query movement.
        let query_factor = ctx.latency_norm_factor(Engine::Aurora).map(|norm| {
            let total: f64 = base_latencies
                .iter()
                .zip(arrival_counts)
                .map(|(l, c)| l * c)
                .sum();
            total / norm
        });
        let factor = clean_query_factor(query_factor, cfg.aurora_min_load_removal_fraction);

        // 3. Analytical share, observed then reweighed.
        let (mut analytics_load, mut analytics_cpu_denorm) = if curr_has_replicas {
            let replicas = curr.read_replicas() as f64;
            (
                m.aurora_reader_load_minute_avg * replicas,
                m.aurora_reader_cpu_avg / 100.0 * curr_cpus * replicas,
            )
        } else if no_queries_today {
            (0.0, 0.0)
        } else {
            let eps = if base_latencies.is_empty() { 0.0 } else { 1e-3 };
            (
                (writer_load - txn_load).max(eps),
                (writer_cpu_denorm - txn_cpu_denorm).max(eps),
            )
        };
        analytics_load *= factor;
        analytics_cpu_denorm *= factor;

        // 4. Spread onto the next provisioning.
        let (per_machine_load, per_machine_cpu, txn_affected_cpu) = if next.read_replicas() > 0 {
            let replicas = next.read_replicas() as f64;
            if no_queries_today && !base_latencies.is_empty() {
                let current = ctx.current_blueprint.aurora();
                analytics_load = cfg.aurora_initialize_load_fraction
                    * current.vcpus()
                    * current.num_nodes as f64;
                analytics_cpu_denorm = analytics_load;
            }
            (
                analytics_load / replicas,
                analytics_cpu_denorm / replicas,
                txn_cpu_denorm,
            )
        } else {
            let cpu = analytics_cpu_denorm + txn_cpu_denorm;
            (analytics_load + txn_load, cpu, cpu)
        };

        // 5. Analytical latency under load.
        let mut scaled = Self::scale_for_load_resources(base_latencies, next, per_machine_load, cfg);
        if !scaled.is_empty() {
            let mean = scaled.iter().sum::<f64>() / scaled.len() as f64;
            let wait = mm1_wait_time(mean, per_machine_cpu / next_cpus, 0.9);
            for l in &mut scaled {
                *l += wait;
            }
        }

        // 6, 7. Peak capacity and transaction latency.
        let peak_cpu_denorm = next_cpus * cfg.aurora_prov_to_peak_cpu_denorm;
        let scaled_txn_lats =
            Self::scale_txn_latency(writer_cpu_denorm, txn_affected_cpu, curr_cpus, next_cpus, ctx);

        Self {
            scaled_latencies: scaled,
            scaled_txn_lats,
            analytics_per_machine_load: per_machine_load,
            analytics_per_machine_cpu_denorm: per_machine_cpu,
            txn_cpu_denorm: txn_affected_cpu,
            peak_cpu_denorm,
            next_cpus,
            query_factor,
        }
    }

    /// Analytical CPU utilization of one machine serving queries.
    pub fn analytics_utilization(&self) -> f64 {
        if self.next_cpus == 0.0 {
            return 0.0;
        }
        self.analytics_per_machine_cpu_denorm / self.next_cpus
    }

    /// `lat * (coefs . [l*r, l, r, 1]^2)` with `r = reference / cpus(to)`.
    pub fn scale_for_load_resources(
        base_latencies: &[f64],
        to: &Provisioning,
        load: f64,
        config: &PlannerConfig,
    ) -> Vec<f64> {
        let cpus = to.vcpus();
        if load == 0.0 && cpus == REFERENCE_CPUS {
            return base_latencies.to_vec();
        }
        let r = REFERENCE_CPUS / cpus;
        let basis = [load * r, load, r, 1.0];
        let k: f64 = config
            .aurora_scaling_coefs
            .iter()
            .zip(basis)
            .map(|(c, b)| c * b * b)
            .sum();
        base_latencies.iter().map(|l| l * k).collect()
    }

    /// `Q(u') = (K - u) / (K - u') * max(Q(u) - b, 0) + b`.
    fn scale_txn_latency(
        curr_cpu_denorm: f64,
        next_cpu_denorm: f64,
        curr_cpus: f64,
        next_cpus: f64,
        ctx: &ScoringContext,
    ) -> [f64; 2] {
        let model = ctx.config.txn_coefs(ctx.schema_name());
        let observed = [ctx.metrics.txn_lat_s_p50, ctx.metrics.txn_lat_s_p90];
        let base = [model.b_p50, model.b_p90];
        let u = (curr_cpu_denorm / curr_cpus).min(1.0);
        let u_next = (next_cpu_denorm / next_cpus).min(1.0);
        let sf = (model.k - u) / (model.k - u_next).max(1e-6);

        let mut out = [0.0; 2];
        for i in 0..2 {
            out[i] = if observed[i] == 0.0 || !observed[i].is_finite() {
                f64::NAN
            } else {
                (observed[i] - base[i]).max(0.0) * sf + base[i]
            };
        }
        out
    }
}
