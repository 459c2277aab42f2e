#![forbid(unsafe_code)]
//! strata-frontend: the process clients talk to.
//!
//! - `frontend`: sessions, per-query routing, reconnection, and blueprint
//!   switch-over.
//! - `session`: a session's transaction state and connection pool.
//! - `connector`: the engine driver traits and a scripted in-memory engine.
//! - `control`: the mailbox to the control plane and the data-sync driver.
//! - `sketch`, `report`: latency percentiles for the metrics report.
//! - `triggers`: conditions that request a replan ahead of the schedule.
//! - `backoff`: jittered exponential retry delays.

pub mod backoff;
pub mod commands;
pub mod connector;
pub mod control;
pub mod error;
pub mod frontend;
pub mod report;
pub mod session;
pub mod sketch;
pub mod triggers;

pub use backoff::RandomizedExponentialBackoff;
pub use commands::InternalCommand;
pub use connector::{
    ConnectionRole, Connector, EngineConnection, ExecutedStatement, MemoryConnector, RowSet,
};
pub use control::{run_transition, ControlMailbox, ControlRequest, DataSync};
pub use error::{ConnectorError, QueryError, Result, TransitionError};
pub use frontend::{FrontEnd, FrontEndBuilder};
pub use report::{MetricsReport, Percentiles};
pub use session::{ConnectionPool, Session};
pub use sketch::LatencySketch;
pub use triggers::{
    Epoch, QueryLatencyCeiling, RecentChange, ReplanTriggers, Trigger, TxnLatencyCeiling,
    VariableCosts,
};
