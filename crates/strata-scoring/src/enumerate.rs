//! Provisionings within a resource-value distance of a starting point.
//!
//! The catalogs are small (a few hundred configurations per engine), so the
//! enumerator simply walks every instance type and node count and keeps the
//! ones close enough.

use strata_core::engine::Engine;
use strata_core::error::Result;
use strata_core::provisioning::{
    catalog, InstanceSpec, Provisioning, AURORA_INSTANCES, REDSHIFT_INSTANCES,
};

/// Total value in thousandths, catalog index, node count. Quantizing the
/// value makes provisionings of equal capacity compare equal.
type SortKey = (i64, usize, u32);

fn value_key(value: f64) -> i64 {
    (value * 1e3).round() as i64
}

#[derive(Debug, Clone)]
pub struct ProvisioningEnumerator {
    engine: Engine,
    instances: &'static [InstanceSpec],
    allow_off: bool,
}

impl ProvisioningEnumerator {
    /// Fails for engines without a catalog (Athena).
    pub fn new(engine: Engine) -> Result<Self> {
        Ok(Self {
            engine,
            instances: catalog(engine)?,
            allow_off: true,
        })
    }

    pub fn aurora() -> Self {
        Self {
            engine: Engine::Aurora,
            instances: &AURORA_INSTANCES,
            allow_off: true,
        }
    }

    pub fn redshift() -> Self {
        Self {
            engine: Engine::Redshift,
            instances: &REDSHIFT_INSTANCES,
            allow_off: true,
        }
    }

    /// Whether the zero-node (off) provisioning may be proposed. Disabled for
    /// an engine that must keep serving transactions.
    pub fn with_off_allowed(mut self, allow: bool) -> Self {
        self.allow_off = allow;
        self
    }

    pub fn engine(&self) -> Engine {
        self.engine
    }

    /// Provisionings whose value lies within `max_distance` of `current`'s.
    ///
    /// Sorted by total resource value, then catalog position, then node
    /// count, so the off provisioning (when allowed and close enough) leads.
    /// `current` is always part of the output, in its sorted position.
    pub fn enumerate_nearby(
        &self,
        current: &Provisioning,
        max_distance: f64,
    ) -> impl Iterator<Item = Provisioning> {
        let base = self.base_value(current);
        let near = |value: f64| (value - base).abs() <= max_distance;
        let mut out: Vec<(SortKey, Provisioning)> = Vec::new();

        if self.allow_off && near(0.0) {
            let off = Provisioning::new(current.instance_type.clone(), 0);
            out.push((self.sort_key(&off), off));
        }

        let aurora_nodes = current.num_nodes.max(1);
        for (idx, spec) in self.instances.iter().enumerate() {
            if self.is_fixed_node_family(spec) {
                let value = spec.resource_value() * aurora_nodes as f64;
                if aurora_nodes <= spec.max_nodes && near(value) {
                    out.push((
                        (value_key(value), idx, aurora_nodes),
                        Provisioning::new(spec.instance_type, aurora_nodes),
                    ));
                }
                continue;
            }
            for nodes in spec.min_nodes.max(1)..=spec.max_nodes {
                let value = spec.resource_value() * nodes as f64;
                if near(value) {
                    out.push((
                        (value_key(value), idx, nodes),
                        Provisioning::new(spec.instance_type, nodes),
                    ));
                }
            }
        }

        if !out.iter().any(|(_, p)| p == current) && (current.is_on() || self.allow_off) {
            out.push((self.sort_key(current), current.clone()));
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out.into_iter().map(|(_, p)| p)
    }

    /// Distance that allows scaling by up to `multiplier` times.
    pub fn scaling_to_distance(&self, current: &Provisioning, multiplier: f64) -> f64 {
        self.base_value(current) * (multiplier.max(1.0) - 1.0)
    }

    /// Value of `p`, or of one node of its type when `p` is off, so that a
    /// switched-off engine can be switched back on.
    fn base_value(&self, p: &Provisioning) -> f64 {
        let per_node = self
            .instances
            .iter()
            .find(|s| s.instance_type == p.instance_type)
            .map(InstanceSpec::resource_value)
            .unwrap_or(0.0);
        per_node * p.num_nodes.max(1) as f64
    }

    fn sort_key(&self, p: &Provisioning) -> SortKey {
        match self
            .instances
            .iter()
            .position(|s| s.instance_type == p.instance_type)
        {
            Some(idx) => (
                value_key(self.instances[idx].resource_value() * p.num_nodes as f64),
                idx,
                p.num_nodes,
            ),
            None => (i64::MAX, self.instances.len(), p.num_nodes),
        }
    }

    /// Aurora replicas do not add capacity for a single query, so only the
    /// instance type varies.
    fn is_fixed_node_family(&self, spec: &InstanceSpec) -> bool {
        spec.instance_type.starts_with("db.")
    }
}
