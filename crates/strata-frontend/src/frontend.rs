//! The client-facing front end.
//!
//! Each session owns its connections behind a FIFO `tokio::sync::Mutex`, so
//! one session's statements run in submission order while other sessions
//! make progress. The router is shared and replaced wholesale when a new
//! blueprint is announced. Lost connections are repaired by a single
//! background task per front end.

use std::collections::HashMap;
use std::fs::File;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Instant;

use rand::Rng;
use tokio::sync::Mutex as AsyncMutex;

use strata_core::blueprint::Blueprint;
use strata_core::config::FrontEndConfig;
use strata_core::engine::{Engine, EngineBitmap};
use strata_core::id::SessionId;
use strata_core::manifest::now_ms;
use strata_io::{BlueprintManager, QueryLogRecord, QueryLogWriter};
use strata_router::{clean_sql, QueryRep, Router, RouterFactory};

use crate::backoff::RandomizedExponentialBackoff;
use crate::commands::InternalCommand;
use crate::connector::{Connector, RowSet};
use crate::control::{ControlMailbox, ControlRequest};
use crate::error::{ConnectorError, QueryError, Result, TransitionError};
use crate::report::{MetricsReport, Reporting};
use crate::session::{ConnectionPool, Session, Target};

const QUERY_LOG_TARGET: &str = "strata::query_log";

/// The blueprint a front end is currently serving, with its router.
#[derive(Debug)]
struct Serving {
    version: u64,
    blueprint: Arc<Blueprint>,
    router: Arc<Router>,
}

impl Serving {
    fn running(&self) -> EngineBitmap {
        self.blueprint.running_engines()
    }

    fn readers(&self) -> u32 {
        self.blueprint.aurora().read_replicas()
    }
}

struct SessionHandle {
    closed: AtomicBool,
    state: AsyncMutex<Session>,
}

struct Inner {
    config: FrontEndConfig,
    connector: Arc<dyn Connector>,
    factory: RouterFactory,
    manager: Mutex<BlueprintManager>,
    serving: RwLock<Arc<Serving>>,
    sessions: RwLock<HashMap<SessionId, Arc<SessionHandle>>>,
    next_session: AtomicU64,
    reconnecting: AtomicBool,
    reconnects_scheduled: AtomicU64,
    reporting: Mutex<Reporting>,
    query_log: Option<Mutex<QueryLogWriter<File>>>,
    control: Option<ControlMailbox>,
}

pub struct FrontEndBuilder {
    config: FrontEndConfig,
    manager: BlueprintManager,
    factory: RouterFactory,
    connector: Arc<dyn Connector>,
    control: Option<ControlMailbox>,
}

impl FrontEndBuilder {
    pub fn control(mut self, mailbox: ControlMailbox) -> Self {
        self.control = Some(mailbox);
        self
    }

    /// Builds the router for the committed blueprint. No engine is contacted
    /// until the first session starts.
    pub fn build(self) -> std::result::Result<FrontEnd, TransitionError> {
        let metadata = self.manager.metadata();
        let blueprint = self
            .manager
            .get_next_blueprint()
            .unwrap_or_else(|| self.manager.get_blueprint());
        let router = Arc::new(self.factory.for_blueprint(&blueprint)?);
        let serving = Serving {
            version: metadata.serving_version(),
            blueprint,
            router,
        };

        let query_log = match &self.config.query_log_path {
            Some(path) => Some(Mutex::new(QueryLogWriter::append_to_path(path)?)),
            None => None,
        };

        tracing::info!(
            schema = self.manager.schema(),
            version = serving.version,
            router = %serving.router.name(),
            "front end ready"
        );
        Ok(FrontEnd {
            inner: Arc::new(Inner {
                reporting: Mutex::new(Reporting::new(self.config.sketch_relative_accuracy)),
                config: self.config,
                connector: self.connector,
                factory: self.factory,
                manager: Mutex::new(self.manager),
                serving: RwLock::new(Arc::new(serving)),
                sessions: RwLock::new(HashMap::new()),
                next_session: AtomicU64::new(1),
                reconnecting: AtomicBool::new(false),
                reconnects_scheduled: AtomicU64::new(0),
                query_log,
                control: self.control,
            }),
        })
    }
}

/// Cheap to clone; clones share sessions, router, and reconnection state.
#[derive(Clone)]
pub struct FrontEnd {
    inner: Arc<Inner>,
}

impl FrontEnd {
    pub fn builder(
        config: FrontEndConfig,
        manager: BlueprintManager,
        factory: RouterFactory,
        connector: Arc<dyn Connector>,
    ) -> FrontEndBuilder {
        FrontEndBuilder {
            config,
            manager,
            factory,
            connector,
            control: None,
        }
    }

    fn serving(&self) -> Arc<Serving> {
        Arc::clone(
            &self
                .inner
                .serving
                .read()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }

    pub fn router(&self) -> Arc<Router> {
        Arc::clone(&self.serving().router)
    }

    pub fn blueprint(&self) -> Arc<Blueprint> {
        Arc::clone(&self.serving().blueprint)
    }

    pub fn version(&self) -> u64 {
        self.serving().version
    }

    pub fn session_count(&self) -> usize {
        self.inner
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Reconnection tasks started since this front end was built.
    pub fn reconnects_scheduled(&self) -> u64 {
        self.inner.reconnects_scheduled.load(Ordering::Acquire)
    }

    pub fn is_reconnecting(&self) -> bool {
        self.inner.reconnecting.load(Ordering::Acquire)
    }

    fn session(&self, id: SessionId) -> Result<Arc<SessionHandle>> {
        self.inner
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
            .ok_or(QueryError::UnknownSession(id))
    }

    fn session_handles(&self) -> Vec<(SessionId, Arc<SessionHandle>)> {
        self.inner
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, h)| (*id, Arc::clone(h)))
            .collect()
    }

    /// Opens a session with connections to every running engine, retrying
    /// with backoff while engines refuse.
    pub async fn start_session(&self) -> Result<SessionId> {
        let id = SessionId::new(self.inner.next_session.fetch_add(1, Ordering::Relaxed));
        let serving = self.serving();
        let mut pool = ConnectionPool::default();
        let mut backoff = RandomizedExponentialBackoff::new(&self.inner.config.session_start);
        loop {
            match pool
                .establish(
                    self.inner.connector.as_ref(),
                    serving.running(),
                    serving.readers(),
                )
                .await
            {
                Ok(()) => break,
                Err(err) => match backoff.next_delay() {
                    Some(delay) => {
                        tracing::warn!(session = %id, %err, ?delay, "session connect failed; retrying");
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        tracing::error!(session = %id, %err, attempts = backoff.attempts(), "could not open session");
                        return Err(QueryError::Transient(format!(
                            "could not connect session: {err}"
                        )));
                    }
                },
            }
        }

        let handle = Arc::new(SessionHandle {
            closed: AtomicBool::new(false),
            state: AsyncMutex::new(Session::new(id, pool)),
        });
        self.inner
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, handle);
        tracing::info!(session = %id, version = serving.version, "session started");
        Ok(id)
    }

    /// Drops the session and its connections. Statements still queued on it
    /// fail with `UnknownSession`.
    pub fn end_session(&self, id: SessionId) -> Result<()> {
        let handle = self
            .inner
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .ok_or(QueryError::UnknownSession(id))?;
        handle.closed.store(true, Ordering::Release);
        tracing::info!(session = %id, "session ended");
        Ok(())
    }

    pub async fn in_transaction(&self, id: SessionId) -> Result<bool> {
        let handle = self.session(id)?;
        let session = handle.state.lock().await;
        Ok(session.in_transaction())
    }

    /// Engines this session holds a live primary connection to.
    pub async fn connected_engines(&self, id: SessionId) -> Result<EngineBitmap> {
        let handle = self.session(id)?;
        let session = handle.state.lock().await;
        Ok(session.pool().connected())
    }

    /// Engines on which this session has a connection marked lost.
    pub async fn lost_engines(&self, id: SessionId) -> Result<EngineBitmap> {
        let handle = self.session(id)?;
        let session = handle.state.lock().await;
        Ok(session.pool().lost())
    }

    pub async fn run_query(&self, id: SessionId, sql: &str) -> Result<RowSet> {
        let handle = self.session(id)?;
        let mut session = handle.state.lock().await;
        if handle.closed.load(Ordering::Acquire) {
            return Err(QueryError::UnknownSession(id));
        }

        let sql = clean_sql(sql);
        if let Some(cmd) = InternalCommand::parse(sql, &self.inner.config.internal_command_prefix) {
            return Ok(self.run_internal(cmd));
        }

        let query = QueryRep::new(sql);
        let transactional = session.in_transaction() || query.is_data_modification();
        let target = if transactional {
            Target::Writer
        } else {
            match self.serving().router.engine_for(&query)? {
                Engine::Aurora => Target::Reader,
                engine => Target::Analytical(engine),
            }
        };
        let engine = match target {
            Target::Writer | Target::Reader => Engine::Aurora,
            Target::Analytical(engine) => engine,
        };

        let Some(slot) = session.pool.get(target) else {
            self.schedule_reconnect();
            return Err(QueryError::Transient(format!(
                "no live {engine} connection"
            )));
        };

        let started = Instant::now();
        let result = slot.conn.execute(query.sql()).await;
        let latency_s = started.elapsed().as_secs_f64();

        match result {
            Ok(rows) => {
                let mut completed = false;
                if query.is_transaction_start() {
                    session.begin();
                } else if query.is_transaction_end() {
                    completed = session.end().is_some();
                }
                {
                    let mut reporting = self
                        .inner
                        .reporting
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner);
                    reporting.record(transactional, latency_s);
                    if completed {
                        reporting.transaction_completed();
                    }
                }
                self.log_query(id, engine, transactional, latency_s, query.sql());
                Ok(rows)
            }
            Err(ConnectorError::ConnectionLost(reason)) => {
                slot.lost = true;
                tracing::warn!(session = %id, engine = %engine, %reason, "connection lost");
                self.schedule_reconnect();
                Err(QueryError::Transient(format!(
                    "{engine} connection lost: {reason}"
                )))
            }
            Err(err) => Err(QueryError::Engine(err.to_string())),
        }
    }

    fn log_query(
        &self,
        session: SessionId,
        engine: Engine,
        transactional: bool,
        latency_s: f64,
        sql: &str,
    ) {
        if transactional {
            let p = self.inner.config.txn_log_prob.clamp(0.0, 1.0);
            if !rand::thread_rng().gen_bool(p) {
                return;
            }
        }
        tracing::info!(
            target: QUERY_LOG_TARGET,
            session = %session,
            engine = %engine,
            transactional,
            latency_s,
            sql
        );
        if let Some(log) = &self.inner.query_log {
            let record = QueryLogRecord {
                timestamp_ms: now_ms(),
                session,
                engine,
                transactional,
                latency_s,
                sql: sql.to_string(),
            };
            if let Err(err) = log
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .log(&record)
            {
                tracing::warn!(%err, "could not write query log");
            }
        }
    }

    fn run_internal(&self, cmd: InternalCommand) -> RowSet {
        tracing::debug!(?cmd, "internal command");
        match cmd {
            InternalCommand::Replan => {
                let accepted = self
                    .inner
                    .control
                    .as_ref()
                    .map(|c| c.try_send(ControlRequest::Replan));
                let msg = match accepted {
                    Some(true) => "replan requested",
                    Some(false) => "a replan request is already pending",
                    None => "no control plane attached",
                };
                vec![vec![msg.to_string()]]
            }
            InternalCommand::RoutingPolicy => vec![vec![self.router().name()]],
            InternalCommand::Blueprint => {
                let serving = self.serving();
                let bp = &serving.blueprint;
                let mut rows = vec![
                    vec!["version".to_string(), serving.version.to_string()],
                    vec!["aurora".to_string(), bp.aurora().to_string()],
                    vec!["redshift".to_string(), bp.redshift().to_string()],
                ];
                rows.extend(
                    bp.placement()
                        .iter()
                        .map(|(table, bm)| vec![table.to_string(), bm.to_string()]),
                );
                rows
            }
            InternalCommand::Metrics => {
                let report = self
                    .inner
                    .reporting
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .snapshot();
                let fmt = |v: Option<f64>| v.map_or_else(|| "-".to_string(), |v| format!("{v:.6}"));
                let row = |name: &str, p: crate::report::Percentiles| {
                    vec![name.to_string(), fmt(p.p50), fmt(p.p90), fmt(p.p99)]
                };
                vec![
                    vec![
                        "txn_completions_per_s".to_string(),
                        format!("{:.3}", report.txn_completions_per_s),
                    ],
                    row("txn_latency_s", report.txn_latency_s),
                    row("analytical_latency_s", report.analytical_latency_s),
                ]
            }
            InternalCommand::Unknown(text) => vec![vec![format!(
                "unknown internal command '{text}'; expected one of REPLAN, ROUTING_POLICY, BLUEPRINT, METRICS"
            )]],
        }
    }

    /// Latency percentiles and transaction throughput since the previous
    /// report. Counters restart afterwards.
    pub fn metrics_report(&self) -> MetricsReport {
        self.inner
            .reporting
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Starts the reconnection task unless one is already live. Returns
    /// whether a task was started.
    fn schedule_reconnect(&self) -> bool {
        if self.inner.reconnecting.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.inner.reconnects_scheduled.fetch_add(1, Ordering::AcqRel);
        let this = self.clone();
        tokio::spawn(async move {
            this.reconnect_until_done().await;
            this.inner.reconnecting.store(false, Ordering::Release);
        });
        true
    }

    async fn reconnect_until_done(&self) {
        let mut backoff = RandomizedExponentialBackoff::new(&self.inner.config.reconnect);
        loop {
            match self.reestablish_all().await {
                Ok(()) => {
                    tracing::info!(attempts = backoff.attempts() + 1, "connections re-established");
                    return;
                }
                Err(err) => match backoff.next_delay() {
                    Some(delay) => {
                        tracing::debug!(%err, ?delay, "reconnect attempt failed");
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        tracing::error!(%err, attempts = backoff.attempts(), "giving up on reconnecting");
                        return;
                    }
                },
            }
        }
    }

    /// One pass over every session. Keeps going after a failure so healthy
    /// sessions are repaired; reports the first error.
    async fn reestablish_all(&self) -> std::result::Result<(), ConnectorError> {
        let serving = self.serving();
        let mut first_err = None;
        for (id, handle) in self.session_handles() {
            let mut session = handle.state.lock().await;
            if let Err(err) = session
                .pool
                .establish(
                    self.inner.connector.as_ref(),
                    serving.running(),
                    serving.readers(),
                )
                .await
            {
                tracing::debug!(session = %id, %err, "reconnect failed");
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Switches to the blueprint the control plane just committed.
    ///
    /// New connections are opened before the router swap and old ones are
    /// closed after it, so no query is routed to an engine its session has
    /// no connection for. Statements already running on a connection that is
    /// torn down may fail.
    pub async fn on_new_blueprint(&self, version: u64) -> std::result::Result<(), TransitionError> {
        let (found, blueprint) = {
            let mut manager = self
                .inner
                .manager
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if let Err(err) = manager.reload() {
                tracing::error!(version, %err, "could not reload blueprint metadata");
                return Err(err.into());
            }
            let found = manager.metadata().serving_version();
            let bp = manager
                .get_next_blueprint()
                .unwrap_or_else(|| manager.get_blueprint());
            (found, bp)
        };
        if found != version {
            tracing::error!(
                notified = version,
                found,
                "blueprint version mismatch; transition aborted"
            );
            return Err(TransitionError::VersionMismatch {
                notified: version,
                found,
            });
        }

        let router = match self.inner.factory.for_blueprint(&blueprint) {
            Ok(r) => Arc::new(r),
            Err(err) => {
                tracing::error!(version, %err, "could not build router; transition aborted");
                return Err(err.into());
            }
        };
        let next = Arc::new(Serving {
            version,
            blueprint,
            router,
        });

        let mut incomplete = false;
        let sessions = self.session_handles();
        for (id, handle) in &sessions {
            let mut session = handle.state.lock().await;
            if let Err(err) = session
                .pool
                .establish(self.inner.connector.as_ref(), next.running(), next.readers())
                .await
            {
                tracing::warn!(session = %id, %err, "could not connect to new engines");
                incomplete = true;
            }
        }

        *self
            .inner
            .serving
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::clone(&next);
        tracing::info!(
            version,
            router = %next.router.name(),
            running = %next.running(),
            "serving new blueprint"
        );
        if incomplete {
            self.schedule_reconnect();
        }

        for (_, handle) in &sessions {
            handle
                .state
                .lock()
                .await
                .pool
                .retain(next.running(), next.readers());
        }
        Ok(())
    }
}

impl std::fmt::Debug for FrontEnd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrontEnd")
            .field("version", &self.version())
            .field("sessions", &self.session_count())
            .field("reconnecting", &self.is_reconnecting())
            .finish()
    }
}
