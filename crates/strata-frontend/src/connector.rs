//! Engine driver seam.
//!
//! Real deployments plug in database drivers; `MemoryConnector` is a scripted
//! in-process engine for tests and the simulator.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use strata_core::engine::Engine;

use crate::error::ConnectorError;

pub type RowSet = Vec<Vec<String>>;

/// Aurora distinguishes the writer from read replicas; the analytical
/// engines only ever use `Primary`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionRole {
    Primary,
    Replica(u32),
}

impl fmt::Display for ConnectionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionRole::Primary => write!(f, "primary"),
            ConnectionRole::Replica(i) => write!(f, "replica-{i}"),
        }
    }
}

#[async_trait]
pub trait EngineConnection: Send + Sync + fmt::Debug {
    fn engine(&self) -> Engine;
    async fn execute(&mut self, sql: &str) -> Result<RowSet, ConnectorError>;
}

#[async_trait]
pub trait Connector: Send + Sync + fmt::Debug {
    async fn connect(
        &self,
        engine: Engine,
        role: ConnectionRole,
    ) -> Result<Box<dyn EngineConnection>, ConnectorError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutedStatement {
    pub engine: Engine,
    pub role: ConnectionRole,
    pub sql: String,
}

#[derive(Debug, Default)]
struct Script {
    responses: BTreeMap<String, RowSet>,
    failures: HashMap<Engine, VecDeque<ConnectorError>>,
    refusals: HashMap<Engine, u32>,
    executed: Vec<ExecutedStatement>,
    connects: usize,
}

/// Scripted engines. Clones share one script, so a test can keep a handle
/// and inspect what the front end did.
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    script: Arc<Mutex<Script>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Rows returned for `sql` on any engine. Unscripted statements return
    /// no rows.
    pub fn respond(&self, sql: impl Into<String>, rows: RowSet) {
        self.script().responses.insert(sql.into(), rows);
    }

    /// The next statement executed on `engine` fails with `err`.
    pub fn fail_next(&self, engine: Engine, err: ConnectorError) {
        self.script()
            .failures
            .entry(engine)
            .or_default()
            .push_back(err);
    }

    /// The next `times` connection attempts to `engine` are refused.
    pub fn refuse_connections(&self, engine: Engine, times: u32) {
        *self.script().refusals.entry(engine).or_default() += times;
    }

    pub fn executed(&self) -> Vec<ExecutedStatement> {
        self.script().executed.clone()
    }

    /// Successful connection attempts so far.
    pub fn connects(&self) -> usize {
        self.script().connects
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(
        &self,
        engine: Engine,
        role: ConnectionRole,
    ) -> Result<Box<dyn EngineConnection>, ConnectorError> {
        let mut script = self.script();
        if let Some(n) = script.refusals.get_mut(&engine).filter(|n| **n > 0) {
            *n -= 1;
            return Err(ConnectorError::Refused(format!("{engine} {role}")));
        }
        script.connects += 1;
        Ok(Box::new(MemoryConnection {
            engine,
            role,
            script: Arc::clone(&self.script),
        }))
    }
}

#[derive(Debug)]
struct MemoryConnection {
    engine: Engine,
    role: ConnectionRole,
    script: Arc<Mutex<Script>>,
}

#[async_trait]
impl EngineConnection for MemoryConnection {
    fn engine(&self) -> Engine {
        self.engine
    }

    async fn execute(&mut self, sql: &str) -> Result<RowSet, ConnectorError> {
        let mut script = self.script.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(err) = script
            .failures
            .get_mut(&self.engine)
            .and_then(VecDeque::pop_front)
        {
            return Err(err);
        }
        script.executed.push(ExecutedStatement {
            engine: self.engine,
            role: self.role,
            sql: sql.to_string(),
        });
        Ok(script.responses.get(sql).cloned().unwrap_or_default())
    }
}
