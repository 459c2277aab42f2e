//! End-to-end planning passes over small workloads.

use std::collections::BTreeMap;
use std::sync::Arc;

use strata_core::blueprint::{Blueprint, RoutingPolicy, RoutingSpec, TableDef};
use strata_core::config::{PlannerConfig, PlannerStrategy};
use strata_core::engine::{Engine, EngineBitmap, EngineMap};
use strata_core::id::CandidateSeq;
use strata_core::placement::TablePlacement;
use strata_core::provisioning::Provisioning;
use strata_planner::{plan_next_blueprint, BlueprintCandidate, Comparator, Feasibility};
use strata_router::RouterFactory;
use strata_scoring::{AnalyticalQuery, MetricsSnapshot, ScoringContext, TxnStatement, Workload};

fn current(redshift_nodes: u32) -> Arc<Blueprint> {
    shop("db.r6g.xlarge", redshift_nodes)
}

fn shop(aurora_instance: &str, redshift_nodes: u32) -> Arc<Blueprint> {
    let mut placement = TablePlacement::new();
    placement.set("orders", EngineBitmap::of(Engine::Aurora));
    placement.set("customers", EngineBitmap::of(Engine::Aurora));
    placement.set("events", EngineBitmap::of(Engine::Athena));
    Arc::new(Blueprint::new(
        "shop",
        vec![
            TableDef::new("orders"),
            TableDef::new("customers"),
            TableDef::new("events"),
        ],
        placement,
        Provisioning::new(aurora_instance, 1),
        Provisioning::new("dc2.large", redshift_nodes),
        RoutingSpec::definite(RoutingPolicy::RuleBased),
    ))
}

fn query(tables: &[&str], lat: [f64; 3], count: f64, athena_mb: u64) -> AnalyticalQuery {
    AnalyticalQuery {
        sql: format!("SELECT COUNT(*) FROM {}", tables.join(", ")),
        tables: tables.iter().map(|t| t.to_string()).collect(),
        arrival_count: count,
        predicted_latency_s: EngineMap {
            aurora: lat[0],
            redshift: lat[1],
            athena: lat[2],
        },
        athena_bytes: athena_mb * 1_000_000,
        aurora_pages: 1_000,
    }
}

fn workload() -> Workload {
    let mut sizes = BTreeMap::new();
    sizes.insert("orders".to_string(), 500.0);
    sizes.insert("customers".to_string(), 50.0);
    sizes.insert("events".to_string(), 2_000.0);
    Workload {
        period_s: 3600.0,
        analytical: vec![
            query(&["orders"], [0.2, 0.5, 2.0], 20.0, 10),
            query(&["events"], [8.0, 1.0, 3.0], 4.0, 200),
            query(&["orders", "customers"], [0.5, 0.6, 2.5], 10.0, 20),
        ],
        transactional: vec![TxnStatement {
            sql: "UPDATE orders SET status = 'shipped' WHERE id = 1".into(),
            tables: vec!["orders".into()],
        }],
        table_sizes_mb: sizes,
    }
}

fn context(bp: Arc<Blueprint>, w: Workload) -> ScoringContext {
    ScoringContext::new(
        bp,
        w,
        MetricsSnapshot::default(),
        PlannerConfig::default(),
        EngineMap::default(),
    )
    .unwrap()
}

#[test]
fn planning_produces_a_valid_deterministic_blueprint() {
    let factory = RouterFactory::default();
    let run = || {
        plan_next_blueprint(
            current(0),
            workload(),
            MetricsSnapshot::default(),
            PlannerConfig::default(),
            &factory,
        )
        .unwrap()
    };
    let a = run();
    let b = run();

    a.blueprint.validate().unwrap();
    assert_eq!(a.blueprint, b.blueprint);
    assert_eq!(
        a.manifest.output_blueprint,
        Some(a.blueprint.fingerprint().unwrap())
    );
    assert_eq!(a.manifest.source_blueprint, current(0).fingerprint().unwrap());

    // Transactions keep their tables on Aurora.
    assert!(a
        .blueprint
        .placement()
        .get("orders")
        .unwrap()
        .contains(Engine::Aurora));
    for (_, bm) in a.blueprint.placement().iter() {
        assert!(!bm.is_empty());
    }
    // Every analytical query has a cached route.
    assert_eq!(a.blueprint.routing().cached.len(), 3);
}

#[test]
fn table_based_search_plans_through_the_same_entry_point() {
    let config = PlannerConfig {
        strategy: PlannerStrategy::TableBased,
        beam_size: 10,
        max_table_copies: 2,
        ..PlannerConfig::default()
    };
    let out = plan_next_blueprint(
        current(0),
        workload(),
        MetricsSnapshot::default(),
        config,
        &RouterFactory::default(),
    )
    .unwrap();
    out.blueprint.validate().unwrap();
    for (table, bm) in out.blueprint.placement().iter() {
        assert!(!bm.is_empty(), "{table} unplaced");
        assert!(bm.len() <= 2, "{table} on {bm}");
    }
    assert!(out
        .blueprint
        .placement()
        .get("orders")
        .unwrap()
        .contains(Engine::Aurora));
    assert_eq!(out.blueprint.routing().cached.len(), 3);
}

#[test]
fn cloned_candidate_is_independent() {
    let bp = current(2);
    let ctx = context(Arc::clone(&bp), workload());
    let mut original = BlueprintCandidate::based_on(&bp, CandidateSeq::new(0));
    original.add_query(0, &ctx.workload.analytical[0], Engine::Aurora, 0.2, &ctx);
    let placement = original.placement().clone();
    let redshift = original.redshift().clone();

    let mut copy = original.fork(CandidateSeq::new(1));
    copy.add_query(1, &ctx.workload.analytical[1], Engine::Redshift, 1.0, &ctx);
    copy.update_redshift_provisioning(Provisioning::new("ra3.4xlarge", 4));

    assert_eq!(original.placement(), &placement);
    assert_eq!(original.redshift(), &redshift);
    assert!(original.query_locations().redshift.is_empty());
    assert_eq!(copy.query_locations().redshift, vec![1]);
}

#[test]
fn scan_cost_survives_reset_and_readd() {
    let bp = current(2);
    let ctx = context(Arc::clone(&bp), workload());
    let route = |idx: usize| if idx == 0 { Engine::Aurora } else { Engine::Athena };
    let mut c = BlueprintCandidate::based_on(&bp, CandidateSeq::new(0));
    for (idx, q) in ctx.workload.analytical.iter().enumerate() {
        c.add_query(idx, q, route(idx), q.base_latency(route(idx)), &ctx);
    }
    let before = c.score().operational.workload_scan_usd;
    let bytes = c.athena_scanned_bytes();
    assert!(before > 0.0);
    assert!(bytes > 0.0);
    // Only the first query reads Aurora pages.
    assert_eq!(c.aurora_accessed_pages(), 1_000.0);

    c.reset_routing();
    assert_eq!(c.score().operational.workload_scan_usd, 0.0);
    assert_eq!(c.athena_scanned_bytes(), 0.0);
    assert_eq!(c.aurora_accessed_pages(), 0.0);
    for (idx, q) in ctx.workload.analytical.iter().enumerate() {
        c.add_query_last_step(idx, q, route(idx), q.base_latency(route(idx)), &ctx)
            .unwrap();
    }
    assert!((c.score().operational.workload_scan_usd - before).abs() < 1e-12);
    assert_eq!(c.athena_scanned_bytes(), bytes);
    assert_eq!(c.aurora_accessed_pages(), 1_000.0);
}

#[test]
fn adding_redshift_query_marks_transition_and_stays_unchecked() {
    let bp = shop("db.r6g.large", 0);
    let mut w = workload();
    // A second query over `orders`, later sent to Redshift.
    w.analytical.push(query(&["orders"], [0.4, 0.3, 2.0], 5.0, 10));
    let ctx = context(Arc::clone(&bp), w);
    let cmp = Comparator::new(Default::default());
    let mut c = BlueprintCandidate::based_on(&bp, CandidateSeq::new(0));
    c.add_query(0, &ctx.workload.analytical[0], Engine::Aurora, 0.2, &ctx);
    assert_eq!(c.placement().get("orders"), Some(EngineBitmap::of(Engine::Aurora)));
    assert_eq!(c.transition_time_s(), 0.0);
    c.try_to_make_feasible_if_needed(&ctx, &cmp);
    assert_eq!(c.feasibility(), Feasibility::Feasible);
    assert!(!c.redshift().is_on());

    c.add_query(3, &ctx.workload.analytical[3], Engine::Redshift, 0.3, &ctx);
    assert_eq!(
        c.placement().get("orders"),
        Some(EngineBitmap::from_engines([Engine::Aurora, Engine::Redshift]))
    );
    assert!(c.transition_time_s() > 0.0);
    assert_eq!(c.feasibility(), Feasibility::Unchecked);
}

#[test]
fn redshift_with_queries_and_no_nodes_is_resolved() {
    let bp = current(0);
    let ctx = context(Arc::clone(&bp), workload());
    let cmp = Comparator::new(Default::default());
    let mut c = BlueprintCandidate::based_on(&bp, CandidateSeq::new(0));
    c.add_query(1, &ctx.workload.analytical[1], Engine::Redshift, 1.0, &ctx);
    assert!(!c.is_structurally_feasible());
    c.try_to_make_feasible_if_needed(&ctx, &cmp);
    assert_eq!(c.feasibility(), Feasibility::Feasible);
    assert!(c.redshift().num_nodes > 0);
}
