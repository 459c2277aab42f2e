//! Versioned blueprint lifecycle on top of a `BlueprintStore`.
//!
//! Versions only grow. A transition commits the next blueprint first and
//! records it as `next_version`; once data movement is done,
//! `complete_transition` promotes it to active.

use std::sync::Arc;

use strata_core::blueprint::{Blueprint, BlueprintMetadata, TransitionState};

use crate::error::{Error, Result};
use crate::store::BlueprintStore;

#[derive(Debug)]
pub struct BlueprintManager {
    store: Arc<dyn BlueprintStore>,
    schema: String,
    metadata: BlueprintMetadata,
    active: Arc<Blueprint>,
    next: Option<Arc<Blueprint>>,
}

impl BlueprintManager {
    /// Loads the committed state of `schema`.
    pub fn load(store: Arc<dyn BlueprintStore>, schema: impl Into<String>) -> Result<Self> {
        let schema = schema.into();
        let (metadata, active, next) = read_state(store.as_ref(), &schema)?;
        Ok(Self {
            store,
            schema,
            metadata,
            active,
            next,
        })
    }

    /// Commits `bp` as version 1 of a schema that has no blueprints yet.
    pub fn bootstrap(store: Arc<dyn BlueprintStore>, bp: Blueprint) -> Result<Self> {
        bp.validate()?;
        let schema = bp.schema_name().to_string();
        if store.read_metadata(&schema)?.is_some() {
            return Err(strata_core::Error::Invariant(format!(
                "schema '{schema}' already has a committed blueprint"
            ))
            .into());
        }
        let version = store.list_versions(&schema)?.last().map_or(1, |v| v + 1);
        store.write_version(&schema, version, &bp)?;
        let metadata = BlueprintMetadata::initial(version);
        store.write_metadata(&schema, &metadata)?;
        tracing::info!(schema = %schema, version, "bootstrapped blueprint");
        Ok(Self {
            store,
            schema,
            metadata,
            active: Arc::new(bp),
            next: None,
        })
    }

    /// Re-reads metadata and blueprints from the store.
    pub fn reload(&mut self) -> Result<()> {
        let (metadata, active, next) = read_state(self.store.as_ref(), &self.schema)?;
        self.metadata = metadata;
        self.active = active;
        self.next = next;
        Ok(())
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn get_blueprint(&self) -> Arc<Blueprint> {
        Arc::clone(&self.active)
    }

    pub fn get_next_blueprint(&self) -> Option<Arc<Blueprint>> {
        self.next.clone()
    }

    pub fn get_version(&self) -> u64 {
        self.metadata.active_version
    }

    pub fn metadata(&self) -> BlueprintMetadata {
        self.metadata
    }

    /// Commits `bp` as the next version and marks a transition in progress.
    pub fn start_transition(&mut self, bp: Blueprint) -> Result<u64> {
        if self.metadata.transition_state == TransitionState::Transitioning {
            return Err(strata_core::Error::Invariant(format!(
                "a transition to version {:?} is already in progress",
                self.metadata.next_version
            ))
            .into());
        }
        bp.validate()?;
        if bp.schema_name() != self.schema {
            return Err(strata_core::Error::Schema(format!(
                "blueprint for '{}' committed under '{}'",
                bp.schema_name(),
                self.schema
            ))
            .into());
        }

        let latest = self
            .store
            .list_versions(&self.schema)?
            .last()
            .copied()
            .unwrap_or(0);
        let version = latest.max(self.metadata.active_version) + 1;
        self.store.write_version(&self.schema, version, &bp)?;

        let metadata = BlueprintMetadata {
            active_version: self.metadata.active_version,
            next_version: Some(version),
            transition_state: TransitionState::Transitioning,
        };
        self.store.write_metadata(&self.schema, &metadata)?;
        self.metadata = metadata;
        self.next = Some(Arc::new(bp));
        tracing::info!(schema = %self.schema, version, "transition started");
        Ok(version)
    }

    /// Promotes the next blueprint to active.
    pub fn complete_transition(&mut self) -> Result<u64> {
        let (Some(version), Some(next)) = (self.metadata.next_version, self.next.clone()) else {
            return Err(strata_core::Error::Invariant("no transition in progress".into()).into());
        };
        let metadata = BlueprintMetadata::initial(version);
        self.store.write_metadata(&self.schema, &metadata)?;
        self.metadata = metadata;
        self.active = next;
        self.next = None;
        tracing::info!(schema = %self.schema, version, "transition complete");
        Ok(version)
    }
}

type State = (BlueprintMetadata, Arc<Blueprint>, Option<Arc<Blueprint>>);

fn read_state(store: &dyn BlueprintStore, schema: &str) -> Result<State> {
    let metadata = store
        .read_metadata(schema)?
        .ok_or_else(|| Error::NotFound(format!("no blueprint metadata for '{schema}'")))?;
    let active = Arc::new(store.read_version(schema, metadata.active_version)?);
    let next = match (metadata.transition_state, metadata.next_version) {
        (TransitionState::Transitioning, Some(v)) => Some(Arc::new(store.read_version(schema, v)?)),
        _ => None,
    };
    Ok((metadata, active, next))
}
