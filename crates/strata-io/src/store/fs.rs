use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::thread;

use strata_core::blueprint::{Blueprint, BlueprintMetadata};

use super::{BlueprintStore, RetryConfig};
use crate::error::{Error, Result};

const METADATA_FILE: &str = "metadata.json";
const VERSION_PREFIX: &str = "blueprint-v";

/// Local filesystem store rooted at a directory.
#[derive(Debug, Clone)]
pub struct FsBlueprintStore {
    root: PathBuf,
    retry: RetryConfig,
}

impl FsBlueprintStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn schema_dir(&self, schema: &str) -> PathBuf {
        self.root.join(schema)
    }

    fn version_path(&self, schema: &str, version: u64) -> PathBuf {
        self.schema_dir(schema)
            .join(format!("{VERSION_PREFIX}{version}.json"))
    }

    /// Write to a sibling temp file, then rename over the target.
    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        self.run_with_retry(|| {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let tmp = path.with_extension("json.tmp");
            let mut f = File::create(&tmp)?;
            f.write_all(bytes)?;
            f.sync_all()?;
            fs::rename(&tmp, path)
        })
    }

    fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        self.run_with_retry(|| fs::read(path)).map_err(|e| match e {
            Error::Io(io) if io.kind() == ErrorKind::NotFound => {
                Error::NotFound(path.display().to_string())
            }
            other => other,
        })
    }

    fn run_with_retry<T>(&self, mut op: impl FnMut() -> std::io::Result<T>) -> Result<T> {
        let mut attempt = 0usize;
        let mut backoff = self.retry.initial_backoff;
        loop {
            match op() {
                Ok(v) => return Ok(v),
                Err(err) => {
                    if attempt >= self.retry.max_retries || !is_retryable(&err) {
                        return Err(err.into());
                    }
                    attempt += 1;
                    tracing::warn!(attempt, %err, "retrying blueprint store operation");
                    thread::sleep(backoff);
                    backoff = std::cmp::min(backoff * 2, self.retry.max_backoff);
                }
            }
        }
    }
}

fn is_retryable(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::Interrupted | ErrorKind::WouldBlock | ErrorKind::TimedOut
    )
}

impl BlueprintStore for FsBlueprintStore {
    fn read_metadata(&self, schema: &str) -> Result<Option<BlueprintMetadata>> {
        let path = self.schema_dir(schema).join(METADATA_FILE);
        match self.read_file(&path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(Error::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn write_metadata(&self, schema: &str, metadata: &BlueprintMetadata) -> Result<()> {
        let path = self.schema_dir(schema).join(METADATA_FILE);
        let bytes = serde_json::to_vec_pretty(metadata)?;
        self.write_atomic(&path, &bytes)
    }

    fn read_version(&self, schema: &str, version: u64) -> Result<Blueprint> {
        let bytes = self.read_file(&self.version_path(schema, version))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn write_version(&self, schema: &str, version: u64, bp: &Blueprint) -> Result<()> {
        let path = self.version_path(schema, version);
        if path.exists() {
            return Err(strata_core::Error::Invariant(format!(
                "blueprint version {version} of '{schema}' already exists"
            ))
            .into());
        }
        let bytes = serde_json::to_vec_pretty(bp)?;
        self.write_atomic(&path, &bytes)
    }

    fn list_versions(&self, schema: &str) -> Result<Vec<u64>> {
        let dir = self.schema_dir(schema);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut versions = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let name = entry?.file_name();
            let Some(name) = name.to_str() else { continue };
            let version = name
                .strip_prefix(VERSION_PREFIX)
                .and_then(|rest| rest.strip_suffix(".json"))
                .and_then(|v| v.parse::<u64>().ok());
            if let Some(v) = version {
                versions.push(v);
            }
        }
        versions.sort_unstable();
        Ok(versions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::blueprint::{RoutingPolicy, RoutingSpec, TableDef};
    use strata_core::engine::{Engine, EngineBitmap};
    use strata_core::placement::TablePlacement;
    use strata_core::provisioning::Provisioning;

    fn bp() -> Blueprint {
        let mut placement = TablePlacement::new();
        placement.set("t", EngineBitmap::of(Engine::Aurora));
        Blueprint::new(
            "s",
            vec![TableDef::new("t")],
            placement,
            Provisioning::new("db.r6g.large", 1),
            Provisioning::new("dc2.large", 0),
            RoutingSpec::definite(RoutingPolicy::RuleBased),
        )
    }

    #[test]
    fn versions_round_trip_and_list_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlueprintStore::new(dir.path());
        store.write_version("s", 2, &bp()).unwrap();
        store.write_version("s", 10, &bp()).unwrap();
        store.write_version("s", 1, &bp()).unwrap();
        assert_eq!(store.list_versions("s").unwrap(), vec![1, 2, 10]);
        assert_eq!(store.read_version("s", 10).unwrap(), bp());
        assert!(dir.path().join("s").join("blueprint-v2.json").exists());
    }

    #[test]
    fn versions_are_write_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlueprintStore::new(dir.path());
        store.write_version("s", 1, &bp()).unwrap();
        assert!(store.write_version("s", 1, &bp()).is_err());
    }

    #[test]
    fn missing_metadata_is_none_and_missing_version_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlueprintStore::new(dir.path());
        assert!(store.read_metadata("s").unwrap().is_none());
        assert!(matches!(store.read_version("s", 3), Err(Error::NotFound(_))));

        store
            .write_metadata("s", &BlueprintMetadata::initial(1))
            .unwrap();
        assert_eq!(
            store.read_metadata("s").unwrap(),
            Some(BlueprintMetadata::initial(1))
        );
    }
}
