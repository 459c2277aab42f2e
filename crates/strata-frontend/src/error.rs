use strata_core::id::SessionId;
use strata_router::RoutingError;
use thiserror::Error;

/// Errors reported by engine drivers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectorError {
    /// The connection is gone; the statement may be retried on a new one.
    #[error("connection lost: {0}")]
    ConnectionLost(String),
    #[error("connection refused: {0}")]
    Refused(String),
    #[error("statement failed: {0}")]
    Statement(String),
}

/// What a client sees when a query does not run.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("transient: {0}")]
    Transient(String),
    #[error("engine error: {0}")]
    Engine(String),
    #[error(transparent)]
    Routing(#[from] RoutingError),
    #[error("unknown session {0}")]
    UnknownSession(SessionId),
    #[error("internal: {0}")]
    Internal(String),
}

impl QueryError {
    /// Whether the client may retry the same statement.
    pub fn is_transient(&self) -> bool {
        matches!(self, QueryError::Transient(_))
    }
}

#[derive(Debug, Error)]
pub enum TransitionError {
    #[error("notified of version {notified} but the store serves version {found}")]
    VersionMismatch { notified: u64, found: u64 },
    #[error(transparent)]
    Routing(#[from] RoutingError),
    #[error(transparent)]
    Store(#[from] strata_io::Error),
    #[error("data sync failed for table '{table}': {reason}")]
    Sync { table: String, reason: String },
}

pub type Result<T, E = QueryError> = std::result::Result<T, E>;
