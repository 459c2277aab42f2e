//! Beam search over query-to-engine assignments.
//!
//! Queries are assigned one at a time, most consequential first. Each step
//! extends every beam member with every engine choice and keeps the
//! `beam_size` best results. A final step turns the survivors into real
//! blueprints by routing the whole workload through the actual router.

use std::cmp::Ordering;
use std::sync::Arc;

use strata_core::blueprint::Blueprint;
use strata_core::config::{PlannerConfig, PlannerStrategy};
use strata_core::engine::{Engine, EngineMap};
use strata_core::hash::Fingerprint;
use strata_core::id::CandidateSeq;
use strata_core::manifest::{now_ms, PlanManifest};
use strata_router::{QueryRep, RouterFactory};
use strata_scoring::{MetricsSnapshot, ScoringContext, Workload};

use crate::candidate::{BlueprintCandidate, Feasibility};
use crate::compare::Comparator;
use crate::error::{PlanError, Result};
use crate::score::ScoreSummary;
use crate::table_beam::TableBeamPlanner;

#[derive(Debug, Clone)]
pub struct PlanOutcome {
    pub blueprint: Blueprint,
    pub score: ScoreSummary,
    pub manifest: PlanManifest,
}

#[derive(Debug, Clone)]
pub struct BeamPlanner {
    beam_size: usize,
    comparator: Comparator,
}

/// Hands out candidate creation sequences, the comparator's last tiebreak.
#[derive(Default)]
pub(crate) struct SeqGen(u64);

impl SeqGen {
    pub(crate) fn next(&mut self) -> CandidateSeq {
        let s = CandidateSeq::new(self.0);
        self.0 += 1;
        s
    }
}

impl BeamPlanner {
    pub fn new(config: &PlannerConfig) -> Self {
        Self {
            beam_size: config.beam_size.max(1),
            comparator: Comparator::new(config.comparator.clone()),
        }
    }

    pub fn comparator(&self) -> &Comparator {
        &self.comparator
    }

    pub fn plan(&self, ctx: &ScoringContext, factory: &RouterFactory) -> Result<PlanOutcome> {
        let started = now_ms();
        let span = tracing::info_span!(
            "plan",
            schema = ctx.schema_name(),
            queries = ctx.workload.analytical.len(),
            beam_size = self.beam_size
        );
        let _enter = span.enter();

        let source = Arc::clone(&ctx.current_blueprint);
        let order = query_order(&ctx.workload);
        let mut seqs = SeqGen::default();

        let mut beam = self.seed(&source, &order, ctx, &mut seqs);
        if beam.is_empty() {
            tracing::warn!(step = 0, "every seed candidate is infeasible");
            return Err(PlanError::NoFeasibleBlueprint);
        }
        tracing::debug!(step = 0, beam = beam.len(), "seeded beam");

        for (step, &idx) in order.iter().enumerate().skip(1) {
            let query = &ctx.workload.analytical[idx];
            let mut next: Vec<BlueprintCandidate> = Vec::with_capacity(self.beam_size);
            let mut generated = 0usize;
            for member in &beam {
                for engine in Engine::ALL {
                    generated += 1;
                    let mut c = member.fork(seqs.next());
                    c.add_query(idx, query, engine, query.base_latency(engine), ctx);
                    c.try_to_make_feasible_if_needed(ctx, &self.comparator);
                    if c.feasibility() == Feasibility::Infeasible {
                        continue;
                    }
                    insert_bounded(&mut next, c, self.beam_size, &self.comparator);
                }
            }
            let dropped = generated - next.len();
            if next.is_empty() {
                tracing::warn!(step, query = idx, generated, "beam emptied");
                return Err(PlanError::NoFeasibleBlueprint);
            }
            tracing::debug!(step, query = idx, beam = next.len(), dropped, "beam step");
            beam = next;
        }

        let best = self.final_step(beam, ctx, factory)?;
        finish(&best, ctx, started)
    }

    fn seed(
        &self,
        source: &Arc<Blueprint>,
        order: &[usize],
        ctx: &ScoringContext,
        seqs: &mut SeqGen,
    ) -> Vec<BlueprintCandidate> {
        let mut beam = Vec::with_capacity(Engine::ALL.len());
        let Some(&first) = order.first() else {
            let mut c = BlueprintCandidate::based_on(source, seqs.next());
            c.add_transactional_tables(ctx);
            c.try_to_make_feasible_if_needed(ctx, &self.comparator);
            if c.feasibility() == Feasibility::Feasible {
                beam.push(c);
            }
            return beam;
        };

        let query = &ctx.workload.analytical[first];
        for engine in Engine::ALL {
            let mut c = BlueprintCandidate::based_on(source, seqs.next());
            c.add_transactional_tables(ctx);
            c.add_query(first, query, engine, query.base_latency(engine), ctx);
            c.try_to_make_feasible_if_needed(ctx, &self.comparator);
            if c.feasibility() == Feasibility::Feasible {
                insert_bounded(&mut beam, c, self.beam_size, &self.comparator);
            }
        }
        beam
    }

    /// Touch-up, re-route with the real router, prune, refine provisioning,
    /// and keep the single best.
    fn final_step(
        &self,
        beam: Vec<BlueprintCandidate>,
        ctx: &ScoringContext,
        factory: &RouterFactory,
    ) -> Result<BlueprintCandidate> {
        let definite = &ctx.current_blueprint.routing().definite;
        let considered = beam.len();
        let mut best: Option<BlueprintCandidate> = None;

        for mut c in beam {
            c.place_unplaced_on_athena(ctx);
            let router = factory.for_placement(c.placement().clone(), definite)?;

            c.reset_routing();
            let mut routed = true;
            for (idx, query) in ctx.workload.analytical.iter().enumerate() {
                let result = router
                    .engine_for(&QueryRep::new(&query.sql))
                    .map_err(PlanError::from)
                    .and_then(|engine| {
                        c.add_query_last_step(idx, query, engine, query.base_latency(engine), ctx)
                    });
                if let Err(err) = result {
                    tracing::debug!(
                        seq = c.seq().get(),
                        %err,
                        "dropping candidate after re-routing"
                    );
                    routed = false;
                    break;
                }
            }
            if !routed || !c.is_structurally_feasible() {
                continue;
            }

            c.refine_provisioning(ctx, &self.comparator);
            if c.feasibility() != Feasibility::Feasible {
                continue;
            }
            let better = match &best {
                None => true,
                Some(b) => self.comparator.is_better_than(&c, b),
            };
            if better {
                best = Some(c);
            }
        }

        match best {
            Some(b) => {
                tracing::debug!(considered, seq = b.seq().get(), "final candidate chosen");
                Ok(b)
            }
            None => {
                tracing::warn!(considered, "no candidate survived the final step");
                Err(PlanError::NoFeasibleBlueprint)
            }
        }
    }

}

/// Inserts `c` in comparator order after any equal members, keeping at most
/// `beam_size`.
pub(crate) fn insert_bounded(
    beam: &mut Vec<BlueprintCandidate>,
    c: BlueprintCandidate,
    beam_size: usize,
    comparator: &Comparator,
) {
    let pos = beam.partition_point(|m| comparator.compare(m, &c) != Ordering::Greater);
    if pos >= beam_size {
        return;
    }
    beam.insert(pos, c);
    beam.truncate(beam_size);
}

/// Turns the winning candidate into a blueprint with its score and manifest.
pub(crate) fn finish(
    best: &BlueprintCandidate,
    ctx: &ScoringContext,
    started: u64,
) -> Result<PlanOutcome> {
    let blueprint = best.to_blueprint(ctx)?;
    let score = best.score();

    let inputs = Fingerprint::of(&(&ctx.workload, &ctx.metrics, &ctx.config))?;
    let manifest = PlanManifest::new(ctx.current_blueprint.fingerprint()?, inputs, started)
        .finish(now_ms(), Some(blueprint.fingerprint()?));

    tracing::info!(
        aurora = %blueprint.aurora(),
        redshift = %blueprint.redshift(),
        operational_usd = score.operational.total_usd(),
        transition_s = score.transition.total_time_s(),
        manifest = %manifest.inputs_digest.short(),
        "planned blueprint"
    );
    Ok(PlanOutcome {
        blueprint,
        score,
        manifest,
    })
}

/// Analytical query indices by descending gain; ties by index.
pub fn query_order(workload: &Workload) -> Vec<usize> {
    let gains: Vec<f64> = workload.analytical.iter().map(|q| q.gain()).collect();
    let mut order: Vec<usize> = (0..gains.len()).collect();
    order.sort_by(|&a, &b| gains[b].total_cmp(&gains[a]).then(a.cmp(&b)));
    order
}

/// Where the current blueprint sends each analytical query. Queries its
/// router cannot place are left out.
pub fn current_query_locations(
    workload: &Workload,
    current: &Blueprint,
    factory: &RouterFactory,
) -> Result<EngineMap<Vec<usize>>> {
    let router = factory.for_blueprint(current)?;
    let mut out: EngineMap<Vec<usize>> = EngineMap::default();
    for (idx, q) in workload.analytical.iter().enumerate() {
        match router.engine_for(&QueryRep::new(&q.sql)) {
            Ok(engine) => out[engine].push(idx),
            Err(err) => tracing::warn!(query = idx, %err, "current blueprint cannot route query"),
        }
    }
    Ok(out)
}

/// Builds the scoring context for `current` and runs one planning pass with
/// the configured search.
pub fn plan_next_blueprint(
    current: Arc<Blueprint>,
    workload: Workload,
    metrics: MetricsSnapshot,
    config: PlannerConfig,
    factory: &RouterFactory,
) -> Result<PlanOutcome> {
    let locations = current_query_locations(&workload, &current, factory)?;
    let strategy = config.strategy;
    match strategy {
        PlannerStrategy::QueryBased => {
            let planner = BeamPlanner::new(&config);
            let ctx = ScoringContext::new(current, workload, metrics, config, locations)?;
            planner.plan(&ctx, factory)
        }
        PlannerStrategy::TableBased => {
            let planner = TableBeamPlanner::new(&config);
            let ctx = ScoringContext::new(current, workload, metrics, config, locations)?;
            planner.plan(&ctx, factory)
        }
    }
}
