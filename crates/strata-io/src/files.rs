//! Reading the JSON/YAML inputs operators hand the planner.

use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use strata_core::blueprint::Blueprint;
use strata_scoring::Workload;

use crate::error::{Error, Result};

/// Parses `path` as YAML when its extension says so, JSON otherwise.
pub fn read_json_or_yaml<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => Error::NotFound(path.display().to_string()),
        _ => Error::Io(e),
    })?;
    let is_yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    );
    if is_yaml {
        Ok(serde_yaml::from_str(&text)?)
    } else {
        Ok(serde_json::from_str(&text)?)
    }
}

/// Loads and validates a predicted workload.
pub fn load_workload(path: impl AsRef<Path>) -> Result<Workload> {
    let workload: Workload = read_json_or_yaml(path)?;
    workload.validate()?;
    Ok(workload)
}

/// Loads a blueprint file without validating it, so that `validate` can
/// report problems itself.
pub fn load_blueprint(path: impl AsRef<Path>) -> Result<Blueprint> {
    read_json_or_yaml(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yaml_and_json_workloads_load_alike() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = dir.path().join("w.yaml");
        fs::write(
            &yaml,
            "period_s: 3600\nanalytical:\n  - sql: SELECT * FROM t\n    arrival_count: 2\n    predicted_latency_s: {aurora: 1.0, redshift: 0.5, athena: 3.0}\n",
        )
        .unwrap();
        let json = dir.path().join("w.json");
        fs::write(
            &json,
            r#"{"period_s": 3600, "analytical": [{"sql": "SELECT * FROM t", "arrival_count": 2,
                "predicted_latency_s": {"aurora": 1.0, "redshift": 0.5, "athena": 3.0}}]}"#,
        )
        .unwrap();
        let a = load_workload(&yaml).unwrap();
        let b = load_workload(&json).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.analytical[0].athena_bytes, 0);
    }

    #[test]
    fn invalid_workload_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("w.json");
        fs::write(&p, r#"{"period_s": 0, "analytical": []}"#).unwrap();
        assert!(matches!(load_workload(&p), Err(Error::Core(_))));
        assert!(matches!(
            load_workload(dir.path().join("missing.json")),
            Err(Error::NotFound(_))
        ));
    }
}
