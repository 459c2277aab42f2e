//! Per-session state: transaction flag and the session's own connections.

use std::fmt;
use std::time::Instant;

use strata_core::engine::{Engine, EngineBitmap};
use strata_core::id::SessionId;

use crate::connector::{ConnectionRole, Connector, EngineConnection};
use crate::error::ConnectorError;

#[derive(Debug)]
pub(crate) struct Slot {
    pub(crate) conn: Box<dyn EngineConnection>,
    pub(crate) lost: bool,
}

impl Slot {
    fn usable(slot: &Option<Slot>) -> bool {
        matches!(slot, Some(s) if !s.lost)
    }
}

/// Which connection a statement should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Target {
    Writer,
    Reader,
    Analytical(Engine),
}

/// The connections one session holds. Aurora keeps a writer plus one
/// connection per read replica.
#[derive(Debug, Default)]
pub struct ConnectionPool {
    aurora_writer: Option<Slot>,
    aurora_readers: Vec<Option<Slot>>,
    redshift: Option<Slot>,
    athena: Option<Slot>,
    next_reader: usize,
}

impl ConnectionPool {
    fn slot_mut(&mut self, engine: Engine) -> &mut Option<Slot> {
        match engine {
            Engine::Aurora => &mut self.aurora_writer,
            Engine::Redshift => &mut self.redshift,
            Engine::Athena => &mut self.athena,
        }
    }

    pub fn aurora_readers(&self) -> usize {
        self.aurora_readers.len()
    }

    /// Engines that have a live (not lost) primary connection.
    pub fn connected(&self) -> EngineBitmap {
        let mut bm = EngineBitmap::default();
        for (engine, slot) in [
            (Engine::Aurora, &self.aurora_writer),
            (Engine::Redshift, &self.redshift),
            (Engine::Athena, &self.athena),
        ] {
            if Slot::usable(slot) {
                bm.insert(engine);
            }
        }
        bm
    }

    /// Engines with at least one connection marked lost.
    pub fn lost(&self) -> EngineBitmap {
        let mut bm = EngineBitmap::default();
        let is_lost = |s: &Option<Slot>| matches!(s, Some(s) if s.lost);
        if is_lost(&self.aurora_writer) || self.aurora_readers.iter().any(is_lost) {
            bm.insert(Engine::Aurora);
        }
        if is_lost(&self.redshift) {
            bm.insert(Engine::Redshift);
        }
        if is_lost(&self.athena) {
            bm.insert(Engine::Athena);
        }
        bm
    }

    pub fn has_lost(&self) -> bool {
        !self.lost().is_empty()
    }

    /// Resolves `target` to a connection. Readers are used round-robin; with
    /// no readers the writer serves reads. `None` means missing or lost.
    pub(crate) fn get(&mut self, target: Target) -> Option<&mut Slot> {
        let slot = match target {
            Target::Writer => &mut self.aurora_writer,
            Target::Reader if self.aurora_readers.is_empty() => &mut self.aurora_writer,
            Target::Reader => {
                let i = self.next_reader % self.aurora_readers.len();
                self.next_reader = self.next_reader.wrapping_add(1);
                &mut self.aurora_readers[i]
            }
            Target::Analytical(engine) => self.slot_mut(engine),
        };
        slot.as_mut().filter(|s| !s.lost)
    }

    /// Connects everything `running` needs that is missing or lost, and
    /// grows the reader set to `readers`. Stops at the first failure; what
    /// was connected before it stays connected.
    pub async fn establish(
        &mut self,
        connector: &dyn Connector,
        running: EngineBitmap,
        readers: u32,
    ) -> Result<(), ConnectorError> {
        for engine in running.engines() {
            let slot = self.slot_mut(engine);
            if !Slot::usable(slot) {
                let conn = connector.connect(engine, ConnectionRole::Primary).await?;
                *self.slot_mut(engine) = Some(Slot { conn, lost: false });
            }
        }
        if running.contains(Engine::Aurora) {
            let readers = readers as usize;
            if self.aurora_readers.len() < readers {
                self.aurora_readers.resize_with(readers, || None);
            }
            for i in 0..readers {
                if !Slot::usable(&self.aurora_readers[i]) {
                    let conn = connector
                        .connect(Engine::Aurora, ConnectionRole::Replica(i as u32))
                        .await?;
                    self.aurora_readers[i] = Some(Slot { conn, lost: false });
                }
            }
        }
        Ok(())
    }

    /// Drops connections to engines outside `running` and readers beyond
    /// `readers`.
    pub fn retain(&mut self, running: EngineBitmap, readers: u32) {
        for engine in Engine::ALL {
            if !running.contains(engine) {
                *self.slot_mut(engine) = None;
            }
        }
        let keep = if running.contains(Engine::Aurora) {
            readers as usize
        } else {
            0
        };
        self.aurora_readers.truncate(keep);
    }
}

pub struct Session {
    id: SessionId,
    in_transaction: bool,
    txn_started: Option<Instant>,
    pub(crate) pool: ConnectionPool,
}

impl Session {
    pub(crate) fn new(id: SessionId, pool: ConnectionPool) -> Self {
        Self {
            id,
            in_transaction: false,
            txn_started: None,
            pool,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub(crate) fn begin(&mut self) {
        self.in_transaction = true;
        self.txn_started = Some(Instant::now());
    }

    /// Returns how long the transaction ran, or `None` if none was open.
    pub(crate) fn end(&mut self) -> Option<std::time::Duration> {
        if !self.in_transaction {
            return None;
        }
        self.in_transaction = false;
        self.txn_started.take().map(|t| t.elapsed())
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("in_transaction", &self.in_transaction)
            .field("connected", &self.pool.connected())
            .field("readers", &self.pool.aurora_readers())
            .finish()
    }
}
