//! Beam search over table placements.
//!
//! Queries are grouped by the set of known tables they read. Groups are
//! placed one at a time, most consequential first: every beam member gives
//! the group's tables each allowed engine set, the group's queries are routed
//! over the resulting placement, and the `beam_size` best candidates survive.
//! Placements only ever gain engines, so tables transactions write stay on
//! Aurora.

use std::collections::BTreeMap;
use std::sync::Arc;

use strata_core::blueprint::Blueprint;
use strata_core::config::PlannerConfig;
use strata_core::engine::EngineBitmap;
use strata_core::manifest::now_ms;
use strata_router::RouterFactory;
use strata_scoring::{ScoringContext, Workload};

use crate::beam::{finish, insert_bounded, PlanOutcome, SeqGen};
use crate::candidate::{BlueprintCandidate, Feasibility};
use crate::compare::Comparator;
use crate::error::{PlanError, Result};

/// Queries that read the same set of known tables.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryCluster {
    /// Sorted and deduplicated.
    pub tables: Vec<String>,
    pub queries: Vec<usize>,
    pub gain: f64,
}

#[derive(Debug, Clone)]
pub struct TableBeamPlanner {
    beam_size: usize,
    max_copies: u32,
    comparator: Comparator,
}

impl TableBeamPlanner {
    pub fn new(config: &PlannerConfig) -> Self {
        Self {
            beam_size: config.beam_size.max(1),
            max_copies: config.max_table_copies.clamp(1, 3),
            comparator: Comparator::new(config.comparator.clone()),
        }
    }

    pub fn comparator(&self) -> &Comparator {
        &self.comparator
    }

    /// Engine sets a cluster's tables may be given.
    pub fn placement_options(&self) -> Vec<EngineBitmap> {
        placement_options(self.max_copies)
    }

    pub fn plan(&self, ctx: &ScoringContext, factory: &RouterFactory) -> Result<PlanOutcome> {
        let started = now_ms();
        let clusters = query_clusters(&ctx.workload, &ctx.current_blueprint);
        let span = tracing::info_span!(
            "plan_tables",
            schema = ctx.schema_name(),
            clusters = clusters.len(),
            beam_size = self.beam_size
        );
        let _enter = span.enter();

        let source = Arc::clone(&ctx.current_blueprint);
        let mut seqs = SeqGen::default();
        let mut beam = self.seed(&source, clusters.first(), ctx, factory, &mut seqs)?;
        if beam.is_empty() {
            tracing::warn!(step = 0, "every seed candidate is infeasible");
            return Err(PlanError::NoFeasibleBlueprint);
        }
        tracing::debug!(step = 0, beam = beam.len(), "seeded beam");

        for (step, cluster) in clusters.iter().enumerate().skip(1) {
            let next = self.expand(&beam, cluster, ctx, factory, &mut seqs)?;
            if next.is_empty() {
                tracing::warn!(step, tables = ?cluster.tables, "beam emptied");
                return Err(PlanError::NoFeasibleBlueprint);
            }
            tracing::debug!(step, tables = ?cluster.tables, beam = next.len(), "beam step");
            beam = next;
        }

        let best = self.final_step(beam, ctx)?;
        finish(&best, ctx, started)
    }

    fn seed(
        &self,
        source: &Arc<Blueprint>,
        first: Option<&QueryCluster>,
        ctx: &ScoringContext,
        factory: &RouterFactory,
        seqs: &mut SeqGen,
    ) -> Result<Vec<BlueprintCandidate>> {
        let mut beam = Vec::new();
        let Some(cluster) = first else {
            let mut c = BlueprintCandidate::based_on(source, seqs.next());
            c.add_transactional_tables(ctx);
            c.try_to_make_feasible_if_needed(ctx, &self.comparator);
            if c.feasibility() == Feasibility::Feasible {
                beam.push(c);
            }
            return Ok(beam);
        };

        for engines in self.placement_options() {
            let mut c = BlueprintCandidate::based_on(source, seqs.next());
            c.add_transactional_tables(ctx);
            c.add_placement(engines, &cluster.tables, ctx);
            if let Some(c) = self.route_and_check(c, cluster, false, ctx, factory)? {
                insert_bounded(&mut beam, c, self.beam_size, &self.comparator);
            }
        }
        Ok(beam)
    }

    /// Every successor of every beam member for one more cluster. A member
    /// whose placement already covers an option yields that unchanged
    /// successor once, not once per covered option.
    pub(crate) fn expand(
        &self,
        beam: &[BlueprintCandidate],
        cluster: &QueryCluster,
        ctx: &ScoringContext,
        factory: &RouterFactory,
        seqs: &mut SeqGen,
    ) -> Result<Vec<BlueprintCandidate>> {
        let mut next: Vec<BlueprintCandidate> = Vec::with_capacity(self.beam_size);
        for member in beam {
            let mut unchanged_seen = false;
            for engines in self.placement_options() {
                let mut c = member.fork(seqs.next());
                let changed = c.add_placement(engines, &cluster.tables, ctx);
                if !changed {
                    if unchanged_seen {
                        continue;
                    }
                    unchanged_seen = true;
                }
                if let Some(c) = self.route_and_check(c, cluster, changed, ctx, factory)? {
                    insert_bounded(&mut next, c, self.beam_size, &self.comparator);
                }
            }
        }
        Ok(next)
    }

    /// Drops candidates that break the copy limit, cannot route the cluster,
    /// or have no feasible provisioning.
    fn route_and_check(
        &self,
        mut c: BlueprintCandidate,
        cluster: &QueryCluster,
        reroute_previous: bool,
        ctx: &ScoringContext,
        factory: &RouterFactory,
    ) -> Result<Option<BlueprintCandidate>> {
        if !c.within_copy_limit(&cluster.tables, self.max_copies) {
            tracing::trace!(seq = c.seq().get(), "over the copy limit");
            return Ok(None);
        }
        let definite = &ctx.current_blueprint.routing().definite;
        let router = factory.for_placement(c.placement().clone(), definite)?;
        if let Err(err) = c.route_queries(&router, &cluster.queries, reroute_previous, ctx) {
            tracing::trace!(seq = c.seq().get(), %err, "cluster does not route");
            return Ok(None);
        }
        c.try_to_make_feasible_if_needed(ctx, &self.comparator);
        if c.feasibility() == Feasibility::Infeasible {
            return Ok(None);
        }
        Ok(Some(c))
    }

    fn final_step(
        &self,
        beam: Vec<BlueprintCandidate>,
        ctx: &ScoringContext,
    ) -> Result<BlueprintCandidate> {
        let considered = beam.len();
        let mut best: Option<BlueprintCandidate> = None;
        for mut c in beam {
            c.place_unplaced_on_athena(ctx);
            if !c.is_structurally_feasible() {
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
        best.ok_or_else(|| {
            tracing::warn!(considered, "no candidate survived the final step");
            PlanError::NoFeasibleBlueprint
        })
    }
}

/// Non-empty engine sets of at most `max_copies` engines, by bit value.
pub fn placement_options(max_copies: u32) -> Vec<EngineBitmap> {
    (1..=EngineBitmap::ALL.bits())
        .map(EngineBitmap::from_bits)
        .filter(|bm| bm.len() <= max_copies as usize)
        .collect()
}

/// Groups analytical queries by the known tables they read, by descending
/// summed gain; ties go to the group whose first query comes first. Names
/// `current` does not know (CTEs) are ignored.
pub fn query_clusters(workload: &Workload, current: &Blueprint) -> Vec<QueryCluster> {
    let mut groups: BTreeMap<Vec<String>, (usize, QueryCluster)> = BTreeMap::new();
    for (idx, query) in workload.analytical.iter().enumerate() {
        let mut tables: Vec<String> = query
            .tables
            .iter()
            .filter(|t| current.placement().contains_table(t))
            .cloned()
            .collect();
        tables.sort();
        tables.dedup();
        let (_, cluster) = groups.entry(tables.clone()).or_insert_with(|| {
            (
                idx,
                QueryCluster {
                    tables,
                    queries: Vec::new(),
                    gain: 0.0,
                },
            )
        });
        cluster.queries.push(idx);
        cluster.gain += query.gain();
    }

    let mut out: Vec<(usize, QueryCluster)> = groups.into_values().collect();
    out.sort_by(|(ia, a), (ib, b)| b.gain.total_cmp(&a.gain).then(ia.cmp(ib)));
    out.into_iter().map(|(_, c)| c).collect()
}
