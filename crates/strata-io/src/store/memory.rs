//! In-memory blueprint store for tests and simulations.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use strata_core::blueprint::{Blueprint, BlueprintMetadata};

use super::BlueprintStore;
use crate::error::{Error, Result};

#[derive(Debug, Default)]
struct Schema {
    metadata: Option<BlueprintMetadata>,
    versions: BTreeMap<u64, Blueprint>,
}

/// Thread-safe store backed by a map. Clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryBlueprintStore {
    data: Arc<Mutex<HashMap<String, Schema>>>,
}

impl MemoryBlueprintStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_schema<T>(&self, schema: &str, f: impl FnOnce(&mut Schema) -> T) -> T {
        let mut data = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        f(data.entry(schema.to_string()).or_default())
    }
}

impl BlueprintStore for MemoryBlueprintStore {
    fn read_metadata(&self, schema: &str) -> Result<Option<BlueprintMetadata>> {
        Ok(self.with_schema(schema, |s| s.metadata))
    }

    fn write_metadata(&self, schema: &str, metadata: &BlueprintMetadata) -> Result<()> {
        self.with_schema(schema, |s| s.metadata = Some(*metadata));
        Ok(())
    }

    fn read_version(&self, schema: &str, version: u64) -> Result<Blueprint> {
        self.with_schema(schema, |s| s.versions.get(&version).cloned())
            .ok_or_else(|| Error::NotFound(format!("{schema} version {version}")))
    }

    fn write_version(&self, schema: &str, version: u64, bp: &Blueprint) -> Result<()> {
        self.with_schema(schema, |s| {
            if s.versions.contains_key(&version) {
                return Err(strata_core::Error::Invariant(format!(
                    "blueprint version {version} of '{schema}' already exists"
                ))
                .into());
            }
            s.versions.insert(version, bp.clone());
            Ok(())
        })
    }

    fn list_versions(&self, schema: &str) -> Result<Vec<u64>> {
        Ok(self.with_schema(schema, |s| s.versions.keys().copied().collect()))
    }
}
