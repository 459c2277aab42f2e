//! Append-only writers.

pub mod query_log;

pub use query_log::{QueryLogRecord, QueryLogWriter};
