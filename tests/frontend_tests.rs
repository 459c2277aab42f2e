//! Front end behaviour against scripted in-memory engines.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use strata_core::blueprint::{Blueprint, RoutingPolicy, RoutingSpec, TableDef, TransitionState};
use strata_core::config::{BackoffConfig, FrontEndConfig, TriggerConfig};
use strata_core::engine::{Engine, EngineBitmap};
use strata_core::placement::TablePlacement;
use strata_core::provisioning::Provisioning;
use strata_frontend::{
    run_transition, ConnectionRole, ConnectorError, ControlMailbox, ControlRequest, DataSync,
    Epoch, FrontEnd, MemoryConnector, QueryError, ReplanTriggers, TransitionError,
};
use strata_io::{BlueprintManager, BlueprintStore, MemoryBlueprintStore};
use strata_router::RouterFactory;

fn blueprint(redshift_nodes: u32) -> Blueprint {
    let events = if redshift_nodes > 0 {
        EngineBitmap::from_engines([Engine::Redshift, Engine::Athena])
    } else {
        EngineBitmap::of(Engine::Athena)
    };
    let mut placement = TablePlacement::new();
    placement.set("orders", EngineBitmap::of(Engine::Aurora));
    placement.set("events", events);
    Blueprint::new(
        "shop",
        vec![TableDef::new("orders"), TableDef::new("events")],
        placement,
        Provisioning::new("db.r6g.large", 2),
        Provisioning::new("dc2.large", redshift_nodes),
        RoutingSpec::definite(RoutingPolicy::RuleBased),
    )
}

fn quick_config() -> FrontEndConfig {
    let quick = BackoffConfig {
        max_retries: 5,
        base_delay_ms: 1,
        max_delay_ms: 5,
    };
    FrontEndConfig {
        reconnect: quick,
        session_start: quick,
        ..FrontEndConfig::default()
    }
}

struct Fixture {
    store: Arc<dyn BlueprintStore>,
    connector: MemoryConnector,
    fe: FrontEnd,
}

fn fixture(redshift_nodes: u32, config: FrontEndConfig) -> Fixture {
    let store: Arc<dyn BlueprintStore> = Arc::new(MemoryBlueprintStore::new());
    let manager = BlueprintManager::bootstrap(Arc::clone(&store), blueprint(redshift_nodes)).unwrap();
    let connector = MemoryConnector::new();
    let fe = FrontEnd::builder(
        config,
        manager,
        RouterFactory::default(),
        Arc::new(connector.clone()),
    )
    .build()
    .unwrap();
    Fixture {
        store,
        connector,
        fe,
    }
}

async fn wait_for_reconnect(fe: &FrontEnd) {
    for _ in 0..200 {
        if !fe.is_reconnecting() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("reconnect task did not finish");
}

#[tokio::test]
async fn transactions_stay_on_the_aurora_writer() {
    let f = fixture(2, quick_config());
    let id = f.fe.start_session().await.unwrap();

    f.fe.run_query(id, "BEGIN").await.unwrap();
    assert!(f.fe.in_transaction(id).await.unwrap());
    f.fe.run_query(id, "INSERT INTO orders VALUES (1)").await.unwrap();
    // Events live only on analytical engines but the transaction pins it.
    f.fe.run_query(id, "SELECT * FROM events").await.unwrap();
    f.fe.run_query(id, "COMMIT").await.unwrap();
    assert!(!f.fe.in_transaction(id).await.unwrap());

    let executed = f.connector.executed();
    assert_eq!(executed.len(), 4);
    assert!(executed
        .iter()
        .all(|e| e.engine == Engine::Aurora && e.role == ConnectionRole::Primary));
    assert_eq!(f.fe.router().consultations(), 0);

    let report = f.fe.metrics_report();
    assert_eq!(report.txn_samples, 4);
    assert_eq!(report.analytical_samples, 0);
    assert!(report.txn_completions_per_s > 0.0);
}

#[tokio::test]
async fn reads_outside_transactions_consult_the_router() {
    let f = fixture(2, quick_config());
    let id = f.fe.start_session().await.unwrap();
    f.fe.run_query(id, "SELECT * FROM events").await.unwrap();
    assert_eq!(f.fe.router().consultations(), 1);
    let executed = f.connector.executed();
    assert_eq!(executed[0].engine, Engine::Redshift);
}

#[tokio::test]
async fn lost_connection_is_transient_and_repaired_once() {
    let f = fixture(2, quick_config());
    let id = f.fe.start_session().await.unwrap();
    f.connector
        .fail_next(Engine::Redshift, ConnectorError::ConnectionLost("reset".into()));

    let err = f.fe.run_query(id, "SELECT * FROM events").await.unwrap_err();
    assert!(err.is_transient(), "{err}");
    assert!(f.fe.lost_engines(id).await.unwrap().contains(Engine::Redshift));
    assert_eq!(f.fe.reconnects_scheduled(), 1);

    wait_for_reconnect(&f.fe).await;
    assert_eq!(f.fe.reconnects_scheduled(), 1);
    assert!(f.fe.lost_engines(id).await.unwrap().is_empty());
    f.fe.run_query(id, "SELECT * FROM events").await.unwrap();
    assert_eq!(f.connector.executed().last().unwrap().engine, Engine::Redshift);
}

#[tokio::test]
async fn simultaneous_losses_schedule_one_repair() {
    let f = fixture(2, quick_config());
    let a = f.fe.start_session().await.unwrap();
    let b = f.fe.start_session().await.unwrap();
    for _ in 0..2 {
        f.connector
            .fail_next(Engine::Redshift, ConnectorError::ConnectionLost("reset".into()));
    }
    // Keeps the repair in flight while both failures land.
    f.connector.refuse_connections(Engine::Redshift, 2);

    let (fe_a, fe_b) = (f.fe.clone(), f.fe.clone());
    let (ra, rb) = tokio::join!(
        fe_a.run_query(a, "SELECT * FROM events"),
        fe_b.run_query(b, "SELECT * FROM events"),
    );
    let (ea, eb) = (ra.unwrap_err(), rb.unwrap_err());
    assert!(ea.is_transient(), "{ea}");
    assert!(eb.is_transient(), "{eb}");
    assert_eq!(f.fe.reconnects_scheduled(), 1);
    for id in [a, b] {
        assert!(f.fe.lost_engines(id).await.unwrap().contains(Engine::Redshift));
    }

    wait_for_reconnect(&f.fe).await;
    assert_eq!(f.fe.reconnects_scheduled(), 1);
    for id in [a, b] {
        assert!(f.fe.lost_engines(id).await.unwrap().is_empty());
        f.fe.run_query(id, "SELECT * FROM events").await.unwrap();
    }
}

#[tokio::test]
async fn statement_errors_do_not_mark_connections_lost() {
    let f = fixture(2, quick_config());
    let id = f.fe.start_session().await.unwrap();
    f.connector
        .fail_next(Engine::Redshift, ConnectorError::Statement("bad column".into()));
    let err = f.fe.run_query(id, "SELECT * FROM events").await.unwrap_err();
    assert!(matches!(err, QueryError::Engine(_)));
    assert!(f.fe.lost_engines(id).await.unwrap().is_empty());
    assert_eq!(f.fe.reconnects_scheduled(), 0);
}

#[tokio::test]
async fn session_start_retries_refused_connections() {
    let f = fixture(2, quick_config());
    f.connector.refuse_connections(Engine::Athena, 2);
    let id = f.fe.start_session().await.unwrap();
    assert!(f.fe.connected_engines(id).await.unwrap().contains(Engine::Athena));
    assert_eq!(f.fe.session_count(), 1);
}

#[tokio::test]
async fn session_start_gives_up_after_its_retries() {
    let mut config = quick_config();
    config.session_start.max_retries = 1;
    let f = fixture(2, config);
    f.connector.refuse_connections(Engine::Redshift, 50);
    let err = f.fe.start_session().await.unwrap_err();
    assert!(err.is_transient(), "{err}");
    assert_eq!(f.fe.session_count(), 0);
}

#[tokio::test]
async fn stale_version_notification_is_rejected() {
    let f = fixture(0, quick_config());
    let mut control = BlueprintManager::load(Arc::clone(&f.store), "shop").unwrap();
    let next = control.start_transition(blueprint(2)).unwrap();
    assert_eq!(next, 2);

    let err = f.fe.on_new_blueprint(next + 1).await.unwrap_err();
    assert!(matches!(
        err,
        TransitionError::VersionMismatch {
            notified: 3,
            found: 2
        }
    ));
    assert_eq!(f.fe.version(), 1);
    assert_eq!(f.fe.blueprint().redshift().num_nodes, 0);
}

#[tokio::test]
async fn new_blueprint_opens_and_closes_engine_connections() {
    let f = fixture(0, quick_config());
    let id = f.fe.start_session().await.unwrap();
    assert!(!f.fe.connected_engines(id).await.unwrap().contains(Engine::Redshift));

    let mut control = BlueprintManager::load(Arc::clone(&f.store), "shop").unwrap();
    let v2 = control.start_transition(blueprint(2)).unwrap();
    f.fe.on_new_blueprint(v2).await.unwrap();
    assert_eq!(f.fe.version(), v2);
    assert!(f.fe.connected_engines(id).await.unwrap().contains(Engine::Redshift));
    f.fe.run_query(id, "SELECT * FROM events").await.unwrap();
    assert_eq!(f.connector.executed().last().unwrap().engine, Engine::Redshift);

    struct NoopSync;
    #[async_trait]
    impl DataSync for NoopSync {
        async fn apply_placement_diff(
            &self,
            _table: &str,
            _old: EngineBitmap,
            _new: EngineBitmap,
        ) -> Result<(), String> {
            Ok(())
        }
    }
    run_transition(&mut control, &NoopSync).await.unwrap();

    let v3 = control.start_transition(blueprint(0)).unwrap();
    f.fe.on_new_blueprint(v3).await.unwrap();
    let connected = f.fe.connected_engines(id).await.unwrap();
    assert!(!connected.contains(Engine::Redshift));
    assert!(connected.contains(Engine::Athena));
    f.fe.run_query(id, "SELECT * FROM events").await.unwrap();
    assert_eq!(f.connector.executed().last().unwrap().engine, Engine::Athena);
}

#[tokio::test]
async fn replan_command_reaches_the_control_plane_once() {
    let store: Arc<dyn BlueprintStore> = Arc::new(MemoryBlueprintStore::new());
    let manager = BlueprintManager::bootstrap(store, blueprint(2)).unwrap();
    let (mailbox, mut rx) = ControlMailbox::new();
    let fe = FrontEnd::builder(
        quick_config(),
        manager,
        RouterFactory::default(),
        Arc::new(MemoryConnector::new()),
    )
    .control(mailbox)
    .build()
    .unwrap();
    let id = fe.start_session().await.unwrap();

    let rows = fe.run_query(id, "strata_replan;").await.unwrap();
    assert_eq!(rows, vec![vec!["replan requested"]]);
    let rows = fe.run_query(id, "STRATA_REPLAN").await.unwrap();
    assert_eq!(rows, vec![vec!["a replan request is already pending"]]);
    assert_eq!(rx.recv().await, Some(ControlRequest::Replan));
}

/// Records every diff and optionally fails on one table.
struct RecordingSync {
    fail_on: Option<&'static str>,
    seen: Mutex<Vec<(String, EngineBitmap, EngineBitmap)>>,
}

#[async_trait]
impl DataSync for RecordingSync {
    async fn apply_placement_diff(
        &self,
        table: &str,
        old: EngineBitmap,
        new: EngineBitmap,
    ) -> Result<(), String> {
        self.seen.lock().unwrap().push((table.to_string(), old, new));
        if self.fail_on == Some(table) {
            return Err("copy failed".into());
        }
        Ok(())
    }
}

#[tokio::test]
async fn failed_data_sync_leaves_the_transition_pending() {
    let store: Arc<dyn BlueprintStore> = Arc::new(MemoryBlueprintStore::new());
    let mut manager = BlueprintManager::bootstrap(store, blueprint(0)).unwrap();
    manager.start_transition(blueprint(2)).unwrap();

    let failing = RecordingSync {
        fail_on: Some("events"),
        seen: Mutex::new(Vec::new()),
    };
    let err = run_transition(&mut manager, &failing).await.unwrap_err();
    assert!(matches!(err, TransitionError::Sync { ref table, .. } if table == "events"));
    assert_eq!(manager.metadata().transition_state, TransitionState::Transitioning);
    assert_eq!(manager.get_version(), 1);

    let ok = RecordingSync {
        fail_on: None,
        seen: Mutex::new(Vec::new()),
    };
    assert_eq!(run_transition(&mut manager, &ok).await.unwrap(), 2);
    assert_eq!(manager.metadata().transition_state, TransitionState::Stable);
    // Only the table whose placement changed is synced.
    let seen = ok.seen.into_inner().unwrap();
    assert_eq!(
        seen,
        vec![(
            "events".to_string(),
            EngineBitmap::of(Engine::Athena),
            EngineBitmap::from_engines([Engine::Redshift, Engine::Athena]),
        )]
    );
}

#[tokio::test]
async fn provisioning_change_requests_a_replan_after_its_delay() {
    let cfg = TriggerConfig::default();
    let epoch_ms = cfg.epoch_length_s * 1_000;
    let delay_ms = u64::from(cfg.recent_change.unwrap().delay_epochs) * epoch_ms;
    let mut triggers = ReplanTriggers::from_config(&cfg);
    let (mailbox, mut rx) = ControlMailbox::new();
    let epoch = |at_ms: u64| Epoch {
        at_ms,
        scan_usd_per_hour: Some(1.0),
        ..Epoch::default()
    };

    triggers.update_blueprint(&blueprint(0), Some(1.0), 0);
    assert_eq!(triggers.check_and_notify(&epoch(epoch_ms), &mailbox), None);

    // Redshift comes up at 2 nodes.
    let changed_at = 2 * epoch_ms;
    triggers.update_blueprint(&blueprint(2), Some(1.0), changed_at);
    assert_eq!(
        triggers.check_and_notify(&epoch(changed_at + delay_ms), &mailbox),
        None
    );
    assert!(rx.try_recv().is_err());

    let fired = triggers.check_and_notify(&epoch(changed_at + delay_ms + epoch_ms), &mailbox);
    assert_eq!(fired, Some("recent_change"));
    assert!(matches!(rx.try_recv(), Ok(ControlRequest::Replan)));

    // Fires once per change.
    let later = changed_at + delay_ms + 2 * epoch_ms;
    assert_eq!(triggers.check_and_notify(&epoch(later), &mailbox), None);
}
