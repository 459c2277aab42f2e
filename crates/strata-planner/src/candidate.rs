//! A partially built blueprint, scored incrementally as queries are assigned.
//!
//! Candidates start from the current blueprint with every table unplaced.
//! Assigning a query to an engine places the query's tables there and pays
//! for the storage and data movement that implies. Provisioning is chosen
//! separately, by searching the neighborhood of the current provisioning.

use std::cell::OnceCell;
use std::sync::Arc;

use strata_core::blueprint::{Blueprint, RoutingSpec};
use strata_core::engine::{Engine, EngineBitmap, EngineMap};
use strata_core::error::Error;
use strata_core::id::CandidateSeq;
use strata_core::placement::TablePlacement;
use strata_core::provisioning::Provisioning;
use strata_router::{clean_sql, QueryRep, Router};
use strata_scoring::cost;
use strata_scoring::{
    AnalyticalQuery, ClusteredScore, ProvisioningEnumerator, ScoringContext, TransactionalScore,
};

use crate::compare::{Comparator, LatencyStats, Rankable};
use crate::error::Result;
use crate::score::{OperationalCost, PerformanceScore, ScoreSummary, TransitionCost};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feasibility {
    Unchecked,
    Feasible,
    Infeasible,
}

#[derive(Debug, Clone)]
pub struct BlueprintCandidate {
    source: Arc<Blueprint>,
    seq: CandidateSeq,

    placement: TablePlacement,
    aurora: Provisioning,
    redshift: Provisioning,

    /// Indices into the workload's analytical queries, per engine.
    query_locations: EngineMap<Vec<usize>>,
    /// Parallel to `query_locations`.
    base_latencies: EngineMap<Vec<f64>>,
    aurora_score: Option<TransactionalScore>,
    redshift_score: Option<ClusteredScore>,

    athena_scanned_bytes: f64,
    aurora_accessed_pages: f64,
    workload_scan_cost: f64,
    storage_cost: f64,
    provisioning_cost: f64,
    table_movement_cost: f64,
    table_movement_time_s: f64,
    provisioning_trans_time_s: f64,

    feasibility: Feasibility,
    explored_provisionings: bool,
    stats: OnceCell<LatencyStats>,
}

impl BlueprintCandidate {
    pub fn based_on(source: &Arc<Blueprint>, seq: CandidateSeq) -> Self {
        let placement =
            TablePlacement::empty_for(source.tables().iter().map(|t| t.name.as_str()));
        Self {
            source: Arc::clone(source),
            seq,
            placement,
            aurora: source.aurora().clone(),
            redshift: source.redshift().clone(),
            query_locations: EngineMap::default(),
            base_latencies: EngineMap::default(),
            aurora_score: None,
            redshift_score: None,
            athena_scanned_bytes: 0.0,
            aurora_accessed_pages: 0.0,
            workload_scan_cost: 0.0,
            storage_cost: 0.0,
            provisioning_cost: 0.0,
            table_movement_cost: 0.0,
            table_movement_time_s: 0.0,
            provisioning_trans_time_s: 0.0,
            feasibility: Feasibility::Unchecked,
            explored_provisionings: false,
            stats: OnceCell::new(),
        }
    }

    /// Copy with a fresh creation sequence.
    pub fn fork(&self, seq: CandidateSeq) -> Self {
        let mut c = self.clone();
        c.seq = seq;
        c
    }

    /// Routes query `idx` to `engine`, placing its known tables there.
    pub fn add_query(
        &mut self,
        idx: usize,
        query: &AnalyticalQuery,
        engine: Engine,
        base_latency: f64,
        ctx: &ScoringContext,
    ) {
        self.push_query(idx, query, engine, base_latency, ctx);
        for table in &query.tables {
            let Some(before) = self.placement.add_engine(table, engine) else {
                continue;
            };
            let next = before | EngineBitmap::of(engine);
            if next != before {
                self.charge_placement_change(table, before, next, ctx);
            }
        }
        self.invalidate();
        self.explored_provisionings = false;
    }

    /// Places every table transactions touch on Aurora.
    pub fn add_transactional_tables(&mut self, ctx: &ScoringContext) {
        for stmt in &ctx.workload.transactional {
            for table in &stmt.tables {
                let Some(before) = self.placement.add_engine(table, Engine::Aurora) else {
                    continue;
                };
                if !before.contains(Engine::Aurora) {
                    let next = before | EngineBitmap::of(Engine::Aurora);
                    self.charge_placement_change(table, before, next, ctx);
                }
            }
        }
        self.invalidate();
        self.explored_provisionings = false;
    }

    /// Adds `engines` to every known table in `tables`. Returns whether any
    /// table's placement changed; storage and movement are charged for the
    /// new copies only.
    pub fn add_placement(
        &mut self,
        engines: EngineBitmap,
        tables: &[String],
        ctx: &ScoringContext,
    ) -> bool {
        let mut changed = false;
        for table in tables {
            let Some(before) = self.placement.get(table) else {
                continue;
            };
            let next = before | engines;
            if next == before {
                continue;
            }
            self.placement.set(table.as_str(), next);
            self.charge_placement_change(table, before, next, ctx);
            changed = true;
        }
        if changed {
            self.invalidate();
            self.explored_provisionings = false;
        }
        changed
    }

    /// Whether every table in `tables` is kept on at most `max_copies` engines.
    pub fn within_copy_limit(&self, tables: &[String], max_copies: u32) -> bool {
        tables.iter().all(|t| {
            self.placement
                .get(t)
                .map_or(true, |bm| bm.len() <= max_copies as usize)
        })
    }

    /// Routes the queries `indices` with `router`, which must have been built
    /// over this candidate's placement. With `reroute_previous`, queries
    /// routed earlier are routed again first, since a placement change can
    /// change their best engine.
    pub fn route_queries(
        &mut self,
        router: &Router,
        indices: &[usize],
        reroute_previous: bool,
        ctx: &ScoringContext,
    ) -> Result<()> {
        let mut all: Vec<usize> = Vec::new();
        if reroute_previous {
            all = self.query_locations.iter().flat_map(|(_, v)| v.iter().copied()).collect();
            all.sort_unstable();
            self.reset_routing();
        }
        all.extend_from_slice(indices);
        for idx in all {
            let query = &ctx.workload.analytical[idx];
            let engine = router.engine_for(&QueryRep::new(&query.sql))?;
            self.add_query_last_step(idx, query, engine, query.base_latency(engine), ctx)?;
        }
        Ok(())
    }

    /// Forgets query assignments and scan costs; placement, storage, and
    /// movement are kept.
    pub fn reset_routing(&mut self) {
        self.query_locations = EngineMap::default();
        self.base_latencies = EngineMap::default();
        self.aurora_score = None;
        self.redshift_score = None;
        self.athena_scanned_bytes = 0.0;
        self.aurora_accessed_pages = 0.0;
        self.workload_scan_cost = 0.0;
        self.invalidate();
    }

    /// Like [`add_query`](Self::add_query) but never changes placement.
    pub fn add_query_last_step(
        &mut self,
        idx: usize,
        query: &AnalyticalQuery,
        engine: Engine,
        base_latency: f64,
        ctx: &ScoringContext,
    ) -> Result<()> {
        for table in &query.tables {
            if let Some(bm) = self.placement.get(table) {
                if !bm.contains(engine) {
                    return Err(Error::Invariant(format!(
                        "query {idx} routed to {engine} but table '{table}' is on {bm}"
                    ))
                    .into());
                }
            }
        }
        self.push_query(idx, query, engine, base_latency, ctx);
        self.invalidate();
        Ok(())
    }

    /// Puts tables no query claimed on Athena, the cheapest place to keep them.
    pub fn place_unplaced_on_athena(&mut self, ctx: &ScoringContext) {
        let unplaced: Vec<String> = self.placement.unplaced().map(str::to_string).collect();
        if unplaced.is_empty() {
            return;
        }
        for table in &unplaced {
            self.placement.set(table.as_str(), EngineBitmap::of(Engine::Athena));
            self.charge_placement_change(
                table,
                EngineBitmap::EMPTY,
                EngineBitmap::of(Engine::Athena),
                ctx,
            );
        }
        self.invalidate();
    }

    /// Leaves the candidate Feasible or Infeasible.
    pub fn try_to_make_feasible_if_needed(&mut self, ctx: &ScoringContext, cmp: &Comparator) {
        if self.feasibility != Feasibility::Unchecked {
            return;
        }
        if !self.is_structurally_feasible() {
            self.find_best_provisioning(ctx, cmp);
            if self.feasibility == Feasibility::Unchecked {
                self.feasibility = Feasibility::Infeasible;
            }
            return;
        }
        self.recompute_provisioning_dependent_scoring(ctx);
        self.compute_runtime_feasibility(ctx);
        if self.feasibility == Feasibility::Infeasible {
            self.find_best_provisioning(ctx, cmp);
        }
    }

    /// Searches provisionings near the current blueprint's for the best
    /// feasible one. Runs at most once between placement changes.
    pub fn find_best_provisioning(&mut self, ctx: &ScoringContext, cmp: &Comparator) {
        if self.explored_provisionings {
            return;
        }
        let current = &ctx.current_blueprint;
        let multiplier = ctx.config.max_provisioning_multiplier;

        let aurora_enum = ProvisioningEnumerator::aurora()
            .with_off_allowed(ctx.workload.transactional.is_empty());
        let redshift_enum = ProvisioningEnumerator::redshift();
        let aurora_dist = aurora_enum.scaling_to_distance(current.aurora(), multiplier);
        let redshift_dist = redshift_enum.scaling_to_distance(current.redshift(), multiplier);
        let redshift_options: Vec<Provisioning> = redshift_enum
            .enumerate_nearby(current.redshift(), redshift_dist)
            .collect();

        let mut working = self.clone();
        let mut best: Option<BlueprintCandidate> = None;
        let mut tried = 0usize;
        for aurora in aurora_enum.enumerate_nearby(current.aurora(), aurora_dist) {
            for redshift in &redshift_options {
                working.update_aurora_provisioning(aurora.clone());
                working.update_redshift_provisioning(redshift.clone());
                if !working.is_structurally_feasible() {
                    continue;
                }
                tried += 1;
                working.recompute_provisioning_dependent_scoring(ctx);
                working.compute_runtime_feasibility(ctx);
                if working.feasibility == Feasibility::Infeasible {
                    continue;
                }
                let better = match &best {
                    None => true,
                    Some(b) => cmp.is_better_than(&working, b),
                };
                if better {
                    best = Some(working.clone());
                }
            }
        }

        match best {
            Some(b) => {
                tracing::trace!(
                    seq = self.seq.get(),
                    tried,
                    aurora = %b.aurora,
                    redshift = %b.redshift,
                    "picked provisioning"
                );
                *self = b;
            }
            None => {
                tracing::trace!(seq = self.seq.get(), tried, "no feasible provisioning");
                self.feasibility = Feasibility::Infeasible;
            }
        }
        self.explored_provisionings = true;
    }

    /// Searches provisionings again even if this placement was explored.
    pub fn refine_provisioning(&mut self, ctx: &ScoringContext, cmp: &Comparator) {
        self.explored_provisionings = false;
        self.find_best_provisioning(ctx, cmp);
    }

    /// Engines that serve queries or hold tables must have nodes.
    pub fn is_structurally_feasible(&self) -> bool {
        let in_use = self.placement.engines_in_use();
        let needed =
            |e: Engine| !self.query_locations[e].is_empty() || in_use.contains(e);
        (!needed(Engine::Aurora) || self.aurora.is_on())
            && (!needed(Engine::Redshift) || self.redshift.is_on())
    }

    pub fn recompute_provisioning_dependent_scoring(&mut self, ctx: &ScoringContext) {
        let current = &ctx.current_blueprint;
        let cfg = &ctx.config;

        self.provisioning_cost = cost::provisioning_cost(
            &self.aurora,
            &self.redshift,
            ctx.workload.period_hours(),
        );
        self.provisioning_trans_time_s = 0.0;
        if &self.aurora != current.aurora() {
            self.provisioning_trans_time_s += cfg.aurora_provisioning_change_time_s;
        }
        if &self.redshift != current.redshift() {
            self.provisioning_trans_time_s += cfg.redshift_provisioning_change_time_s;
        }

        let counts = ctx.workload.arrival_counts(&self.query_locations.aurora);
        self.aurora_score = Some(TransactionalScore::compute(
            &self.base_latencies.aurora,
            &counts,
            current.aurora(),
            &self.aurora,
            ctx,
        ));
        let counts = ctx.workload.arrival_counts(&self.query_locations.redshift);
        self.redshift_score = Some(ClusteredScore::compute(
            &self.base_latencies.redshift,
            &counts,
            current.redshift(),
            &self.redshift,
            ctx,
        ));
        self.stats = OnceCell::new();
    }

    pub fn compute_runtime_feasibility(&mut self, ctx: &ScoringContext) {
        if self.feasibility != Feasibility::Unchecked {
            return;
        }
        if self.aurora_score.is_none() || self.redshift_score.is_none() {
            self.recompute_provisioning_dependent_scoring(ctx);
        }
        let limit = ctx.config.max_feasible_cpu / 100.0;
        let infeasible = match (&self.aurora_score, &self.redshift_score) {
            (Some(aurora), Some(redshift)) => {
                let util = redshift.max_node_cpu_util;
                let analytics = aurora.analytics_utilization();
                !util.is_finite()
                    || util >= limit
                    || !analytics.is_finite()
                    || analytics >= limit
                    || aurora.txn_cpu_denorm > aurora.peak_cpu_denorm
            }
            _ => true,
        };
        self.feasibility = if infeasible {
            Feasibility::Infeasible
        } else {
            Feasibility::Feasible
        };
    }

    pub fn update_aurora_provisioning(&mut self, p: Provisioning) {
        self.aurora = p;
        self.invalidate();
    }

    pub fn update_redshift_provisioning(&mut self, p: Provisioning) {
        self.redshift = p;
        self.invalidate();
    }

    pub fn seq(&self) -> CandidateSeq {
        self.seq
    }

    pub fn feasibility(&self) -> Feasibility {
        self.feasibility
    }

    pub fn placement(&self) -> &TablePlacement {
        &self.placement
    }

    pub fn aurora(&self) -> &Provisioning {
        &self.aurora
    }

    pub fn redshift(&self) -> &Provisioning {
        &self.redshift
    }

    pub fn query_locations(&self) -> &EngineMap<Vec<usize>> {
        &self.query_locations
    }

    /// Billed Athena bytes of the queries routed to Athena.
    pub fn athena_scanned_bytes(&self) -> f64 {
        self.athena_scanned_bytes
    }

    pub fn aurora_accessed_pages(&self) -> f64 {
        self.aurora_accessed_pages
    }

    /// Aurora scaled, then Redshift scaled, then Athena as predicted.
    pub fn predicted_analytical_latencies(&self) -> Vec<f64> {
        let aurora = match &self.aurora_score {
            Some(s) => &s.scaled_latencies,
            None => &self.base_latencies.aurora,
        };
        let redshift = match &self.redshift_score {
            Some(s) => &s.scaled_latencies,
            None => &self.base_latencies.redshift,
        };
        aurora
            .iter()
            .chain(redshift)
            .chain(&self.base_latencies.athena)
            .copied()
            .collect()
    }

    pub fn predicted_txn_latencies(&self) -> [f64; 2] {
        self.aurora_score
            .as_ref()
            .map(|s| s.scaled_txn_lats)
            .unwrap_or([f64::NAN; 2])
    }

    pub fn operational_monetary_cost(&self) -> f64 {
        self.provisioning_cost + self.storage_cost + self.workload_scan_cost
    }

    pub fn transition_cost(&self) -> f64 {
        self.table_movement_cost
    }

    pub fn transition_time_s(&self) -> f64 {
        self.table_movement_time_s + self.provisioning_trans_time_s
    }

    /// The candidate as a blueprint: planner decisions become cached routes in
    /// front of the source blueprint's definite policy.
    pub fn to_blueprint(&self, ctx: &ScoringContext) -> Result<Blueprint> {
        let mut routing = RoutingSpec::definite(self.source.routing().definite.clone());
        for (engine, indices) in self.query_locations.iter() {
            for &i in indices {
                let sql = clean_sql(&ctx.workload.analytical[i].sql);
                routing.cached.insert(sql.to_string(), engine);
            }
        }
        let bp = Blueprint::new(
            self.source.schema_name(),
            self.source.tables().to_vec(),
            self.placement.clone(),
            self.aurora.clone(),
            self.redshift.clone(),
            routing,
        );
        bp.validate()?;
        Ok(bp)
    }

    pub fn score(&self) -> ScoreSummary {
        let stats = self.latency_stats();
        let [txn_p50_s, txn_p90_s] = self.predicted_txn_latencies();
        ScoreSummary {
            aurora: self.aurora.to_string(),
            redshift: self.redshift.to_string(),
            operational: OperationalCost {
                provisioning_usd: self.provisioning_cost,
                storage_usd: self.storage_cost,
                workload_scan_usd: self.workload_scan_cost,
            },
            transition: TransitionCost {
                movement_usd: self.table_movement_cost,
                movement_time_s: self.table_movement_time_s,
                provisioning_change_time_s: self.provisioning_trans_time_s,
            },
            performance: PerformanceScore {
                latency_geomean_s: stats.geomean,
                latency_p90_s: stats.p90,
                latency_p99_s: stats.p99,
                latency_max_s: stats.max,
                txn_p50_s,
                txn_p90_s,
                redshift_max_node_cpu_util: self
                    .redshift_score
                    .as_ref()
                    .map_or(0.0, |s| s.max_node_cpu_util),
                aurora_analytics_cpu_util: self
                    .aurora_score
                    .as_ref()
                    .map_or(0.0, TransactionalScore::analytics_utilization),
                queries_per_engine: EngineMap::from_fn(|e| self.query_locations[e].len()),
            },
        }
    }

    fn push_query(
        &mut self,
        idx: usize,
        query: &AnalyticalQuery,
        engine: Engine,
        base_latency: f64,
        ctx: &ScoringContext,
    ) {
        self.query_locations[engine].push(idx);
        self.base_latencies[engine].push(base_latency);
        match engine {
            Engine::Athena => {
                self.athena_scanned_bytes +=
                    cost::athena_billed_bytes(query.athena_bytes, &ctx.config);
            }
            Engine::Aurora => self.aurora_accessed_pages += query.aurora_pages as f64,
            Engine::Redshift => {}
        }
        self.recompute_scan_cost(ctx);
    }

    fn recompute_scan_cost(&mut self, ctx: &ScoringContext) {
        let m = &ctx.metrics;
        let hit_pct = if ctx.current_aurora_has_replicas() {
            m.aurora_reader_buffer_hit_pct_avg
        } else {
            m.aurora_writer_buffer_hit_pct_avg
        };
        self.workload_scan_cost = cost::athena_scan_cost(self.athena_scanned_bytes, &ctx.config)
            + cost::aurora_scan_cost(self.aurora_accessed_pages, hit_pct / 100.0, &ctx.config);
    }

    /// Storage for newly gained copies, plus movement for engines the table
    /// does not live on today. Movement already paid for `before` is not
    /// charged twice, so the total equals moving straight to the final bitmap.
    fn charge_placement_change(
        &mut self,
        table: &str,
        before: EngineBitmap,
        next: EngineBitmap,
        ctx: &ScoringContext,
    ) {
        let cfg = &ctx.config;
        let mb = ctx.workload.table_size_mb(table);
        let gained = next.difference(before);
        for engine in [Engine::Athena, Engine::Aurora] {
            if gained.contains(engine) {
                self.storage_cost +=
                    cost::table_storage_cost(engine, mb, ctx.workload.period_hours(), cfg);
            }
        }

        let current = ctx
            .current_blueprint
            .placement()
            .get(table)
            .unwrap_or(EngineBitmap::EMPTY);
        if next.difference(current | before).is_empty() {
            return;
        }
        let total = cost::table_movement(mb, current, next, cfg);
        let paid = cost::table_movement(mb, current, before, cfg);
        self.table_movement_cost += total.usd - paid.usd;
        self.table_movement_time_s += total.time_s - paid.time_s;
    }

    fn invalidate(&mut self) {
        self.feasibility = Feasibility::Unchecked;
        self.stats = OnceCell::new();
    }
}

impl Rankable for BlueprintCandidate {
    fn seq(&self) -> CandidateSeq {
        self.seq
    }

    fn latency_stats(&self) -> LatencyStats {
        *self
            .stats
            .get_or_init(|| LatencyStats::from_latencies(&self.predicted_analytical_latencies()))
    }

    fn txn_latencies(&self) -> [f64; 2] {
        self.predicted_txn_latencies()
    }

    fn monetary_cost(&self) -> f64 {
        self.operational_monetary_cost() + self.transition_cost()
    }

    fn transition_time_s(&self) -> f64 {
        BlueprintCandidate::transition_time_s(self)
    }

    fn transition_cost(&self) -> f64 {
        BlueprintCandidate::transition_cost(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use strata_core::blueprint::{RoutingPolicy, TableDef};
    use strata_core::config::PlannerConfig;
    use strata_scoring::{MetricsSnapshot, TxnStatement, Workload};

    fn source(tables: &[(&str, EngineBitmap)], redshift_nodes: u32) -> Arc<Blueprint> {
        let placement: TablePlacement =
            tables.iter().map(|(t, bm)| (t.to_string(), *bm)).collect();
        Arc::new(Blueprint::new(
            "test",
            tables.iter().map(|(t, _)| TableDef::new(*t)).collect(),
            placement,
            Provisioning::new("db.r6g.xlarge", 1),
            Provisioning::new("dc2.large", redshift_nodes),
            RoutingSpec::definite(RoutingPolicy::RuleBased),
        ))
    }

    fn query(tables: &[&str], lat: f64) -> AnalyticalQuery {
        AnalyticalQuery {
            sql: format!("SELECT * FROM {}", tables.join(", ")),
            tables: tables.iter().map(|t| t.to_string()).collect(),
            arrival_count: 1.0,
            predicted_latency_s: EngineMap {
                aurora: lat,
                redshift: lat,
                athena: lat,
            },
            athena_bytes: 0,
            aurora_pages: 0,
        }
    }

    fn ctx(
        bp: Arc<Blueprint>,
        queries: Vec<AnalyticalQuery>,
        txn: Vec<TxnStatement>,
    ) -> ScoringContext {
        let mut sizes = BTreeMap::new();
        for t in bp.tables() {
            sizes.insert(t.name.clone(), 100.0);
        }
        let workload = Workload {
            period_s: 3600.0,
            analytical: queries,
            transactional: txn,
            table_sizes_mb: sizes,
        };
        ScoringContext::new(
            bp,
            workload,
            MetricsSnapshot::default(),
            PlannerConfig::default(),
            EngineMap::default(),
        )
        .unwrap()
    }

    fn cmp() -> Comparator {
        Comparator::new(Default::default())
    }

    #[test]
    fn add_query_places_tables_and_charges_movement_once() {
        let bp = source(&[("a", EngineBitmap::of(Engine::Aurora))], 0);
        let ctx = ctx(bp.clone(), vec![query(&["a", "cte"], 1.0)], vec![]);
        let q = &ctx.workload.analytical[0];

        let mut c = BlueprintCandidate::based_on(&bp, CandidateSeq::new(0));
        c.add_query(0, q, Engine::Athena, 1.0, &ctx);
        assert_eq!(c.placement().get("a"), Some(EngineBitmap::of(Engine::Athena)));
        assert!(c.placement().get("cte").is_none());
        let one = c.transition_time_s();
        assert!(one > 0.0);

        c.add_query(0, q, Engine::Redshift, 1.0, &ctx);
        let both = EngineBitmap::from_engines([Engine::Athena, Engine::Redshift]);
        let direct =
            cost::table_movement(100.0, EngineBitmap::of(Engine::Aurora), both, &ctx.config);
        assert!((c.transition_time_s() - direct.time_s).abs() < 1e-9);
        assert_eq!(c.feasibility(), Feasibility::Unchecked);
    }

    #[test]
    fn staying_put_moves_nothing() {
        let bp = source(&[("a", EngineBitmap::of(Engine::Aurora))], 0);
        let ctx = ctx(bp.clone(), vec![query(&["a"], 1.0)], vec![]);
        let mut c = BlueprintCandidate::based_on(&bp, CandidateSeq::new(0));
        c.add_query(0, &ctx.workload.analytical[0], Engine::Aurora, 1.0, &ctx);
        assert_eq!(c.transition_cost(), 0.0);
        assert_eq!(c.transition_time_s(), 0.0);
        assert!(c.operational_monetary_cost() > 0.0);
    }

    #[test]
    fn transactional_tables_land_on_aurora() {
        let bp = source(
            &[
                ("a", EngineBitmap::of(Engine::Athena)),
                ("b", EngineBitmap::of(Engine::Aurora)),
            ],
            0,
        );
        let txn = vec![TxnStatement {
            sql: "UPDATE a SET x = 1".into(),
            tables: vec!["a".into(), "b".into()],
        }];
        let ctx = ctx(bp.clone(), vec![], txn);
        let mut c = BlueprintCandidate::based_on(&bp, CandidateSeq::new(0));
        c.add_transactional_tables(&ctx);
        assert!(c.placement().get("a").unwrap().contains(Engine::Aurora));
        assert!(c.placement().get("b").unwrap().contains(Engine::Aurora));
        // Only `a` moves.
        let only_a = cost::table_movement(
            100.0,
            EngineBitmap::of(Engine::Athena),
            EngineBitmap::from_engines([Engine::Athena, Engine::Aurora]),
            &ctx.config,
        );
        assert!((c.transition_time_s() - only_a.time_s).abs() < 1e-9);
    }

    #[test]
    fn redshift_queries_need_nodes() {
        let bp = source(&[("a", EngineBitmap::of(Engine::Aurora))], 0);
        let ctx = ctx(bp.clone(), vec![query(&["a"], 1.0)], vec![]);
        let mut c = BlueprintCandidate::based_on(&bp, CandidateSeq::new(0));
        c.add_query(0, &ctx.workload.analytical[0], Engine::Redshift, 1.0, &ctx);
        assert!(!c.is_structurally_feasible());

        c.try_to_make_feasible_if_needed(&ctx, &cmp());
        assert_ne!(c.feasibility(), Feasibility::Unchecked);
        if c.feasibility() == Feasibility::Feasible {
            assert!(c.redshift().is_on());
        }
    }

    #[test]
    fn making_feasible_is_idempotent() {
        let bp = source(&[("a", EngineBitmap::of(Engine::Aurora))], 2);
        let ctx = ctx(bp.clone(), vec![query(&["a"], 1.0)], vec![]);
        let mut c = BlueprintCandidate::based_on(&bp, CandidateSeq::new(0));
        c.add_query(0, &ctx.workload.analytical[0], Engine::Redshift, 1.0, &ctx);
        c.try_to_make_feasible_if_needed(&ctx, &cmp());
        let state = c.feasibility();
        let (aurora, redshift) = (c.aurora().clone(), c.redshift().clone());
        let cost = c.operational_monetary_cost();
        c.try_to_make_feasible_if_needed(&ctx, &cmp());
        assert_eq!(c.feasibility(), state);
        assert_eq!(c.aurora(), &aurora);
        assert_eq!(c.redshift(), &redshift);
        assert_eq!(c.operational_monetary_cost(), cost);
    }

    #[test]
    fn unknown_aurora_analytics_load_is_infeasible() {
        let bp = source(&[("a", EngineBitmap::of(Engine::Aurora))], 2);
        let ctx = ctx(bp.clone(), vec![query(&["a"], 1.0)], vec![]);
        let mut c = BlueprintCandidate::based_on(&bp, CandidateSeq::new(0));
        c.add_query(0, &ctx.workload.analytical[0], Engine::Aurora, 1.0, &ctx);
        c.recompute_provisioning_dependent_scoring(&ctx);
        c.compute_runtime_feasibility(&ctx);
        assert_eq!(c.feasibility(), Feasibility::Feasible);

        if let Some(s) = c.aurora_score.as_mut() {
            s.analytics_per_machine_cpu_denorm = f64::NAN;
        }
        c.invalidate();
        c.compute_runtime_feasibility(&ctx);
        assert_eq!(c.feasibility(), Feasibility::Infeasible);
    }

    #[test]
    fn last_step_rejects_unhosted_engine() {
        let bp = source(&[("a", EngineBitmap::of(Engine::Aurora))], 0);
        let ctx = ctx(bp.clone(), vec![query(&["a"], 1.0)], vec![]);
        let q = &ctx.workload.analytical[0];
        let mut c = BlueprintCandidate::based_on(&bp, CandidateSeq::new(0));
        c.add_query(0, q, Engine::Aurora, 1.0, &ctx);
        c.reset_routing();
        assert!(c.query_locations().aurora.is_empty());
        assert!(c.add_query_last_step(0, q, Engine::Athena, 1.0, &ctx).is_err());
        assert!(c.add_query_last_step(0, q, Engine::Aurora, 1.0, &ctx).is_ok());
        assert_eq!(c.placement().get("a"), Some(EngineBitmap::of(Engine::Aurora)));
    }

    #[test]
    fn unplaced_tables_go_to_athena() {
        let bp = source(
            &[
                ("a", EngineBitmap::of(Engine::Aurora)),
                ("b", EngineBitmap::of(Engine::Aurora)),
            ],
            0,
        );
        let ctx = ctx(bp.clone(), vec![query(&["a"], 1.0)], vec![]);
        let mut c = BlueprintCandidate::based_on(&bp, CandidateSeq::new(0));
        c.add_query(0, &ctx.workload.analytical[0], Engine::Aurora, 1.0, &ctx);
        c.place_unplaced_on_athena(&ctx);
        assert_eq!(c.placement().get("b"), Some(EngineBitmap::of(Engine::Athena)));
        assert!(c.transition_time_s() > 0.0);
        assert_eq!(c.placement().unplaced().count(), 0);
    }

    #[test]
    fn blueprint_caches_routes() {
        let bp = source(&[("a", EngineBitmap::of(Engine::Aurora))], 0);
        let ctx = ctx(bp.clone(), vec![query(&["a"], 1.0)], vec![]);
        let mut c = BlueprintCandidate::based_on(&bp, CandidateSeq::new(0));
        c.add_query(0, &ctx.workload.analytical[0], Engine::Aurora, 1.0, &ctx);
        c.try_to_make_feasible_if_needed(&ctx, &cmp());
        let out = c.to_blueprint(&ctx).unwrap();
        assert_eq!(out.routing().cached.get("SELECT * FROM a"), Some(&Engine::Aurora));
        assert_eq!(out.routing().definite, RoutingPolicy::RuleBased);
    }
}
