//! The front end's link to the control plane, and the transition driver the
//! control plane runs after committing a new blueprint.

use std::collections::BTreeSet;

use async_trait::async_trait;
use tokio::sync::mpsc;

use strata_core::engine::EngineBitmap;
use strata_io::BlueprintManager;

use crate::error::TransitionError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlRequest {
    /// Run a planning pass now instead of waiting for the schedule.
    Replan,
}

/// Sending half held by the front end. Holds at most one pending request;
/// a second one is refused until the control plane takes the first.
#[derive(Debug, Clone)]
pub struct ControlMailbox {
    tx: mpsc::Sender<ControlRequest>,
}

impl ControlMailbox {
    pub fn new() -> (Self, mpsc::Receiver<ControlRequest>) {
        let (tx, rx) = mpsc::channel(1);
        (Self { tx }, rx)
    }

    /// `false` when a request is already pending or nobody is listening.
    pub fn try_send(&self, req: ControlRequest) -> bool {
        match self.tx.try_send(req) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => false,
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::warn!("control plane mailbox is closed");
                false
            }
        }
    }
}

/// Moves table data between engines.
#[async_trait]
pub trait DataSync: Send + Sync {
    async fn apply_placement_diff(
        &self,
        table: &str,
        old: EngineBitmap,
        new: EngineBitmap,
    ) -> Result<(), String>;
}

/// Applies the placement diff between the active and next blueprints, then
/// completes the transition. On failure the transition stays pending.
pub async fn run_transition(
    manager: &mut BlueprintManager,
    sync: &dyn DataSync,
) -> Result<u64, TransitionError> {
    let next = manager.get_next_blueprint().ok_or_else(|| {
        strata_io::Error::from(strata_core::Error::Invariant(
            "no transition in progress".into(),
        ))
    })?;
    let active = manager.get_blueprint();

    let tables: BTreeSet<&str> = active
        .placement()
        .tables()
        .chain(next.placement().tables())
        .collect();
    let mut moved = 0usize;
    for table in tables {
        let old = active.placement().get(table).unwrap_or_default();
        let new = next.placement().get(table).unwrap_or_default();
        if old == new {
            continue;
        }
        tracing::debug!(table, old = %old, new = %new, "syncing table");
        sync.apply_placement_diff(table, old, new)
            .await
            .map_err(|reason| {
                tracing::error!(table, %reason, "data sync failed; transition stays pending");
                TransitionError::Sync {
                    table: table.to_string(),
                    reason,
                }
            })?;
        moved += 1;
    }

    let version = manager.complete_transition()?;
    tracing::info!(version, tables = moved, "transition applied");
    Ok(version)
}
