//! Routers built from blueprints the way front ends build them.

use std::collections::BTreeMap;

use strata_core::blueprint::{Blueprint, RoutingPolicy, RoutingSpec, TableDef};
use strata_core::engine::{Engine, EngineBitmap};
use strata_core::placement::TablePlacement;
use strata_core::provisioning::Provisioning;
use strata_router::{DecisionTree, ForestModel, QueryRep, RouterFactory, RoutingError, TreeNode};

fn blueprint(routing: RoutingSpec) -> Blueprint {
    let mut placement = TablePlacement::new();
    placement.set("orders", EngineBitmap::ALL);
    placement.set("events", EngineBitmap::from_engines([Engine::Redshift, Engine::Athena]));
    Blueprint::new(
        "shop",
        vec![TableDef::new("orders"), TableDef::new("events")],
        placement,
        Provisioning::new("db.r6g.large", 1),
        Provisioning::new("dc2.large", 2),
        routing,
    )
}

/// Prefers Athena when `events` is referenced, Aurora otherwise.
fn events_model() -> ForestModel {
    ForestModel {
        table_order: vec!["orders".into(), "events".into()],
        trees: vec![DecisionTree {
            nodes: vec![
                TreeNode::Split {
                    feature: 1,
                    threshold: 0.5,
                    left: 1,
                    right: 2,
                },
                TreeNode::Leaf {
                    scores: [0.9, 0.1, 0.0],
                },
                TreeNode::Leaf {
                    scores: [0.0, 0.2, 0.8],
                },
            ],
        }],
    }
}

#[test]
fn learned_forest_resolves_through_the_registry() {
    let bp = blueprint(RoutingSpec::definite(RoutingPolicy::LearnedForest {
        model: "m".into(),
    }));
    let factory = RouterFactory::default().with_model("m", events_model());
    let router = factory.for_blueprint(&bp).unwrap();
    assert_eq!(
        router.engine_for(&QueryRep::new("SELECT * FROM events")).unwrap(),
        Engine::Athena
    );
    assert_eq!(
        router.engine_for(&QueryRep::new("SELECT * FROM orders")).unwrap(),
        Engine::Aurora
    );
}

#[test]
fn unknown_model_is_an_error() {
    let bp = blueprint(RoutingSpec::definite(RoutingPolicy::LearnedForest {
        model: "missing".into(),
    }));
    let err = RouterFactory::default().for_blueprint(&bp).unwrap_err();
    assert_eq!(err, RoutingError::UnknownModel("missing".into()));
}

#[test]
fn cached_routes_win_over_the_definite_policy() {
    let mut cached = BTreeMap::new();
    cached.insert("SELECT * FROM orders".to_string(), Engine::Redshift);
    let bp = blueprint(RoutingSpec {
        cached,
        definite: RoutingPolicy::RuleBased,
    });
    let router = RouterFactory::default().for_blueprint(&bp).unwrap();
    assert_eq!(
        router.engine_for(&QueryRep::new("  SELECT * FROM orders ; ")).unwrap(),
        Engine::Redshift
    );
    // Not cached: one table ranks Aurora first.
    assert_eq!(
        router
            .engine_for(&QueryRep::new("SELECT id FROM orders WHERE id = 1"))
            .unwrap(),
        Engine::Aurora
    );
}

#[test]
fn transaction_statements_never_leave_aurora() {
    let bp = blueprint(RoutingSpec::definite(RoutingPolicy::AlwaysOne {
        engine: Engine::Athena,
    }));
    let router = RouterFactory::default().for_blueprint(&bp).unwrap();
    for sql in ["BEGIN", "INSERT INTO events VALUES (1)", "COMMIT", "rollback"] {
        assert_eq!(router.engine_for(&QueryRep::new(sql)).unwrap(), Engine::Aurora);
    }
    assert_eq!(
        router.engine_for(&QueryRep::new("SELECT * FROM events")).unwrap(),
        Engine::Athena
    );
}

#[test]
fn query_rep_classifies_by_prefix() {
    let q = QueryRep::new("select * from a join b on a.id = b.id where a.x > 1 and b.y < 2;");
    assert!(!q.is_data_modification());
    assert_eq!(q.tables(), ["a".to_string(), "b".to_string()]);
    assert_eq!(q.predicate_count(), 2);
    assert!(QueryRep::new("begin").is_transaction_start());
    assert!(QueryRep::new("Commit;").is_transaction_end());
    assert!(QueryRep::new("not sql at all").tables().is_empty());
}
