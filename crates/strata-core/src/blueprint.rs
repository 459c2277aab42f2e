//! The blueprint: table placement, provisioning, and routing policy.
//!
//! A blueprint is immutable once committed. Planners produce new ones;
//! front ends consume them read-only and swap routers when a newer version
//! is acknowledged.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::engine::{Engine, EngineBitmap};
use crate::error::{Error, Result};
use crate::hash::Fingerprint;
use crate::placement::TablePlacement;
use crate::provisioning::Provisioning;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDef {
    pub name: String,
}

impl TableDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// The policy a router falls back to when no cached decision applies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RoutingPolicy {
    AlwaysOne { engine: Engine },
    RuleBased,
    /// Decision-tree ensemble, resolved by key from a model registry.
    LearnedForest { model: String },
}

impl RoutingPolicy {
    pub fn name(&self) -> String {
        match self {
            RoutingPolicy::AlwaysOne { engine } => format!("AlwaysOne({engine})"),
            RoutingPolicy::RuleBased => "RuleBased".to_string(),
            RoutingPolicy::LearnedForest { model } => format!("LearnedForest({model})"),
        }
    }
}

/// Routing as persisted in a blueprint: planner-chosen locations for known
/// queries, then a definite policy for everything else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingSpec {
    #[serde(default)]
    pub cached: BTreeMap<String, Engine>,
    pub definite: RoutingPolicy,
}

impl RoutingSpec {
    pub fn definite(policy: RoutingPolicy) -> Self {
        Self {
            cached: BTreeMap::new(),
            definite: policy,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blueprint {
    schema_name: String,
    tables: Vec<TableDef>,
    placement: TablePlacement,
    aurora: Provisioning,
    redshift: Provisioning,
    routing: RoutingSpec,
}

impl Blueprint {
    pub fn new(
        schema_name: impl Into<String>,
        tables: Vec<TableDef>,
        placement: TablePlacement,
        aurora: Provisioning,
        redshift: Provisioning,
        routing: RoutingSpec,
    ) -> Self {
        Self {
            schema_name: schema_name.into(),
            tables,
            placement,
            aurora,
            redshift,
            routing,
        }
    }

    pub fn schema_name(&self) -> &str {
        &self.schema_name
    }

    pub fn tables(&self) -> &[TableDef] {
        &self.tables
    }

    pub fn placement(&self) -> &TablePlacement {
        &self.placement
    }

    pub fn aurora(&self) -> &Provisioning {
        &self.aurora
    }

    pub fn redshift(&self) -> &Provisioning {
        &self.redshift
    }

    pub fn provisioning(&self, engine: Engine) -> Option<&Provisioning> {
        match engine {
            Engine::Aurora => Some(&self.aurora),
            Engine::Redshift => Some(&self.redshift),
            Engine::Athena => None,
        }
    }

    pub fn routing(&self) -> &RoutingSpec {
        &self.routing
    }

    /// Engines a front end should hold connections to. Athena is always
    /// reachable; provisioned engines only when they have nodes.
    pub fn running_engines(&self) -> EngineBitmap {
        let mut bm = EngineBitmap::of(Engine::Athena);
        if self.aurora.is_on() {
            bm.insert(Engine::Aurora);
        }
        if self.redshift.is_on() {
            bm.insert(Engine::Redshift);
        }
        bm
    }

    /// Checks the invariants of an active blueprint.
    pub fn validate(&self) -> Result<()> {
        self.aurora.validate_for(Engine::Aurora)?;
        self.redshift.validate_for(Engine::Redshift)?;

        for def in &self.tables {
            if !self.placement.contains_table(&def.name) {
                return Err(Error::Schema(format!(
                    "table '{}' has no placement entry",
                    def.name
                )));
            }
        }

        let running = self.running_engines();
        for (table, bm) in self.placement.iter() {
            if bm.is_empty() {
                return Err(Error::Invariant(format!(
                    "table '{table}' is not hosted on any engine"
                )));
            }
            let off = bm.difference(running);
            if !off.is_empty() {
                return Err(Error::Invariant(format!(
                    "table '{table}' is placed on {off}, which is switched off"
                )));
            }
        }

        for (query, engine) in &self.routing.cached {
            if engine.is_provisioned() && !running.contains(*engine) {
                return Err(Error::Invariant(format!(
                    "cached route for '{query}' targets {engine}, which is switched off"
                )));
            }
        }
        Ok(())
    }

    pub fn fingerprint(&self) -> Result<Fingerprint> {
        Fingerprint::of(self)
    }

    pub fn with_routing(mut self, routing: RoutingSpec) -> Self {
        self.routing = routing;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionState {
    Stable,
    /// `next_version` is committed; data movement has not finished yet.
    Transitioning,
}

/// Versioning record persisted next to the blueprints themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlueprintMetadata {
    pub active_version: u64,
    pub next_version: Option<u64>,
    pub transition_state: TransitionState,
}

impl BlueprintMetadata {
    pub fn initial(version: u64) -> Self {
        Self {
            active_version: version,
            next_version: None,
            transition_state: TransitionState::Stable,
        }
    }

    /// Version a front end should be serving right now.
    pub fn serving_version(&self) -> u64 {
        match (self.transition_state, self.next_version) {
            (TransitionState::Transitioning, Some(v)) => v,
            _ => self.active_version,
        }
    }
}
