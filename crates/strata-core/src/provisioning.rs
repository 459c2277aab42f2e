//! Engine capacity: compiled-in instance catalogs and the `Provisioning` value.
//!
//! Catalog rows are kept in ascending per-node resource value so that every
//! walk over a catalog visits smaller machines first.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::engine::Engine;
use crate::error::{Error, Result};

/// Price/performance row for one instance type.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct InstanceSpec {
    pub instance_type: &'static str,
    pub vcpus: u32,
    pub memory_mib: u32,
    pub usd_per_hour: f64,
    pub min_nodes: u32,
    pub max_nodes: u32,
}

impl InstanceSpec {
    /// `sqrt(vcpus * memory_mib)` for a single node.
    pub fn resource_value(&self) -> f64 {
        (self.vcpus as f64 * self.memory_mib as f64).sqrt()
    }

    /// Looks an instance type up across all catalogs.
    pub fn lookup(instance_type: &str) -> Option<&'static InstanceSpec> {
        AURORA_INSTANCES
            .iter()
            .chain(REDSHIFT_INSTANCES.iter())
            .find(|s| s.instance_type == instance_type)
    }
}

const fn spec(
    instance_type: &'static str,
    vcpus: u32,
    memory_mib: u32,
    usd_per_hour: f64,
    min_nodes: u32,
    max_nodes: u32,
) -> InstanceSpec {
    InstanceSpec {
        instance_type,
        vcpus,
        memory_mib,
        usd_per_hour,
        min_nodes,
        max_nodes,
    }
}

pub static AURORA_INSTANCES: [InstanceSpec; 9] = [
    spec("db.t4g.medium", 2, 4_096, 0.073, 1, 16),
    spec("db.t4g.large", 2, 8_192, 0.146, 1, 16),
    spec("db.r6g.large", 2, 16_384, 0.26, 1, 16),
    spec("db.r6g.xlarge", 4, 32_768, 0.519, 1, 16),
    spec("db.r6g.2xlarge", 8, 65_536, 1.038, 1, 16),
    spec("db.r6g.4xlarge", 16, 131_072, 2.076, 1, 16),
    spec("db.r6g.8xlarge", 32, 262_144, 4.152, 1, 16),
    spec("db.r6g.12xlarge", 48, 393_216, 6.228, 1, 16),
    spec("db.r6g.16xlarge", 64, 524_288, 8.304, 1, 16),
];

pub static REDSHIFT_INSTANCES: [InstanceSpec; 5] = [
    spec("dc2.large", 2, 15_360, 0.25, 1, 32),
    spec("ra3.xlplus", 4, 32_768, 1.086, 1, 32),
    spec("ra3.4xlarge", 12, 98_304, 3.26, 2, 32),
    spec("dc2.8xlarge", 32, 249_856, 4.80, 2, 128),
    spec("ra3.16xlarge", 48, 393_216, 13.04, 2, 128),
];

/// Catalog for a provisioned engine. Athena has none.
pub fn catalog(engine: Engine) -> Result<&'static [InstanceSpec]> {
    match engine {
        Engine::Aurora => Ok(&AURORA_INSTANCES),
        Engine::Redshift => Ok(&REDSHIFT_INSTANCES),
        Engine::Athena => Err(Error::Config(format!(
            "{engine} is not a provisioned engine"
        ))),
    }
}

/// Instance type and node count for a provisioned engine. Zero nodes means off.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Provisioning {
    pub instance_type: String,
    pub num_nodes: u32,
}

impl Provisioning {
    pub fn new(instance_type: impl Into<String>, num_nodes: u32) -> Self {
        Self {
            instance_type: instance_type.into(),
            num_nodes,
        }
    }

    pub fn is_on(&self) -> bool {
        self.num_nodes > 0
    }

    pub fn spec(&self) -> Option<&'static InstanceSpec> {
        InstanceSpec::lookup(&self.instance_type)
    }

    /// vCPUs of one node. NaN when the instance type is not in any catalog,
    /// which downstream scoring treats as infeasible.
    pub fn vcpus(&self) -> f64 {
        self.spec().map(|s| s.vcpus as f64).unwrap_or(f64::NAN)
    }

    /// Hourly price of the whole cluster; zero when off.
    pub fn hourly_cost(&self) -> f64 {
        if !self.is_on() {
            return 0.0;
        }
        self.spec()
            .map(|s| s.usd_per_hour * self.num_nodes as f64)
            .unwrap_or(f64::NAN)
    }

    /// Per-node resource value times the node count.
    pub fn resource_value(&self) -> f64 {
        self.spec()
            .map(|s| s.resource_value() * self.num_nodes as f64)
            .unwrap_or(f64::NAN)
    }

    /// Number of Aurora read replicas this provisioning implies.
    pub fn read_replicas(&self) -> u32 {
        self.num_nodes.saturating_sub(1)
    }

    pub fn validate_for(&self, engine: Engine) -> Result<()> {
        let spec = catalog(engine)?
            .iter()
            .find(|s| s.instance_type == self.instance_type)
            .ok_or_else(|| {
                Error::Config(format!(
                    "unknown {engine} instance type '{}'",
                    self.instance_type
                ))
            })?;
        if self.num_nodes > spec.max_nodes {
            return Err(Error::Config(format!(
                "{engine} provisioning {self} exceeds the {} node maximum",
                spec.max_nodes
            )));
        }
        Ok(())
    }
}

impl fmt::Display for Provisioning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.instance_type, self.num_nodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalogs_are_sorted_by_resource_value() {
        for engine in [Engine::Aurora, Engine::Redshift] {
            let cat = catalog(engine).unwrap();
            for pair in cat.windows(2) {
                assert!(pair[0].resource_value() < pair[1].resource_value());
            }
        }
    }

    #[test]
    fn off_provisioning_costs_nothing() {
        let p = Provisioning::new("dc2.large", 0);
        assert_eq!(p.hourly_cost(), 0.0);
        assert!(!p.is_on());
    }

    #[test]
    fn unknown_instance_is_nan() {
        let p = Provisioning::new("m5.large", 1);
        assert!(p.vcpus().is_nan());
        assert!(p.validate_for(Engine::Aurora).is_err());
    }
}
