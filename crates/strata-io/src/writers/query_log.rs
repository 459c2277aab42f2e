//! JSONL query log: one record per executed query.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use strata_core::engine::Engine;
use strata_core::id::SessionId;

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryLogRecord {
    pub timestamp_ms: u64,
    pub session: SessionId,
    pub engine: Engine,
    pub transactional: bool,
    pub latency_s: f64,
    pub sql: String,
}

pub struct QueryLogWriter<W: Write> {
    writer: BufWriter<W>,
}

impl QueryLogWriter<File> {
    /// Appends to `path`, creating it if needed.
    pub fn append_to_path(path: impl AsRef<Path>) -> Result<Self> {
        let f = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::to_writer(f))
    }
}

impl<W: Write> QueryLogWriter<W> {
    pub fn to_writer(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
        }
    }

    /// Writes one line and flushes, so a crash loses at most the current record.
    pub fn log(&mut self, record: &QueryLogRecord) -> Result<()> {
        let line = serde_json::to_string(record)?;
        writeln!(self.writer, "{line}")?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> std::result::Result<W, std::io::Error> {
        self.writer.into_inner().map_err(|e| e.into_error())
    }
}

impl<W: Write> std::fmt::Debug for QueryLogWriter<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryLogWriter").finish_non_exhaustive()
    }
}
