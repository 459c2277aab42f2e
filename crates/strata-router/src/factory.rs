//! Builds routers from blueprints.

use std::sync::Arc;

use strata_core::blueprint::{Blueprint, RoutingPolicy};
use strata_core::placement::TablePlacement;

use crate::cached::CachedLocations;
use crate::error::{Result, RoutingError};
use crate::forest::{ForestModel, ModelRegistry};
use crate::functionality::FunctionalityCatalog;
use crate::router::{Router, RoutingStrategy};

#[derive(Debug, Clone, Default)]
pub struct RouterFactory {
    models: ModelRegistry,
    functionality: FunctionalityCatalog,
}

impl RouterFactory {
    pub fn new(models: ModelRegistry, functionality: FunctionalityCatalog) -> Self {
        Self {
            models,
            functionality,
        }
    }

    pub fn with_model(mut self, key: impl Into<String>, model: ForestModel) -> Self {
        self.models.insert(key.into(), Arc::new(model));
        self
    }

    /// The router a front end serves with: cached planner decisions first,
    /// then the blueprint's definite policy.
    pub fn for_blueprint(&self, bp: &Blueprint) -> Result<Router> {
        let routing = bp.routing();
        let definite = self.strategy_for(&routing.definite)?;
        let strategy = RoutingStrategy::BlueprintDefault {
            cached: CachedLocations::new(routing.cached.clone()),
            definite: Box::new(definite),
        };
        Ok(Router::new(
            strategy,
            bp.placement().clone(),
            self.functionality.clone(),
        ))
    }

    /// A router over an arbitrary placement, used while planning.
    pub fn for_placement(&self, placement: TablePlacement, policy: &RoutingPolicy) -> Result<Router> {
        Ok(Router::new(
            self.strategy_for(policy)?,
            placement,
            self.functionality.clone(),
        ))
    }

    pub fn strategy_for(&self, policy: &RoutingPolicy) -> Result<RoutingStrategy> {
        Ok(match policy {
            RoutingPolicy::AlwaysOne { engine } => RoutingStrategy::AlwaysOneEngine(*engine),
            RoutingPolicy::RuleBased => RoutingStrategy::RuleBased,
            RoutingPolicy::LearnedForest { model } => {
                let m = self
                    .models
                    .get(model)
                    .ok_or_else(|| RoutingError::UnknownModel(model.clone()))?;
                RoutingStrategy::LearnedForestPolicy {
                    key: model.clone(),
                    model: Arc::clone(m),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::blueprint::{RoutingSpec, TableDef};
    use strata_core::engine::{Engine, EngineBitmap};
    use strata_core::provisioning::Provisioning;

    use crate::query_rep::QueryRep;

    fn bp(policy: RoutingPolicy) -> Blueprint {
        let mut placement = TablePlacement::new();
        placement.set("t", EngineBitmap::from_engines([Engine::Aurora, Engine::Athena]));
        let mut routing = RoutingSpec::definite(policy);
        routing.cached.insert("SELECT 2 FROM t".into(), Engine::Athena);
        Blueprint::new(
            "s",
            vec![TableDef::new("t")],
            placement,
            Provisioning::new("db.r6g.large", 1),
            Provisioning::new("dc2.large", 0),
            routing,
        )
    }

    #[test]
    fn unknown_model_is_an_error() {
        let f = RouterFactory::default();
        let err = f
            .for_blueprint(&bp(RoutingPolicy::LearnedForest { model: "nope".into() }))
            .unwrap_err();
        assert_eq!(err, RoutingError::UnknownModel("nope".into()));
    }

    #[test]
    fn blueprint_router_uses_cache_then_policy() {
        let f = RouterFactory::default();
        let r = f.for_blueprint(&bp(RoutingPolicy::RuleBased)).unwrap();
        assert_eq!(r.engine_for(&QueryRep::new("SELECT 2 FROM t")).unwrap(), Engine::Athena);
        assert_eq!(r.engine_for(&QueryRep::new("SELECT 3 FROM t")).unwrap(), Engine::Aurora);
        assert!(r.name().starts_with("BlueprintDefault("));
    }

    #[test]
    fn registered_model_resolves() {
        let model = ForestModel {
            table_order: vec![],
            trees: vec![],
        };
        let f = RouterFactory::default().with_model("m", model);
        let r = f
            .for_blueprint(&bp(RoutingPolicy::LearnedForest { model: "m".into() }))
            .unwrap();
        assert!(r.name().contains("LearnedForestPolicy(m)"));
    }
}
