//! Runtime routing: pick the engine that executes a read-only query.
//!
//! Every router applies the same filters first (DML pinning, functionality,
//! table locations) and only consults its strategy when more than one engine
//! remains. Routers are immutable; a new blueprint means a new router.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use strata_core::engine::{Engine, EngineBitmap};
use strata_core::placement::TablePlacement;

use crate::cached::CachedLocations;
use crate::error::{Result, RoutingError};
use crate::forest::ForestModel;
use crate::functionality::FunctionalityCatalog;
use crate::query_rep::QueryRep;

/// How a router ranks engines once filtering leaves a choice.
#[derive(Debug, Clone)]
pub enum RoutingStrategy {
    AlwaysOneEngine(Engine),
    RuleBased,
    LearnedForestPolicy { key: String, model: Arc<ForestModel> },
    /// Cached planner decisions, then a definite strategy.
    BlueprintDefault {
        cached: CachedLocations,
        definite: Box<RoutingStrategy>,
    },
}

impl RoutingStrategy {
    pub fn name(&self) -> String {
        match self {
            RoutingStrategy::AlwaysOneEngine(e) => format!("AlwaysOneEngine({e})"),
            RoutingStrategy::RuleBased => "RuleBased".to_string(),
            RoutingStrategy::LearnedForestPolicy { key, .. } => format!("LearnedForestPolicy({key})"),
            RoutingStrategy::BlueprintDefault { cached, definite } => {
                format!("BlueprintDefault({}, {})", cached.summary(), definite.name())
            }
        }
    }

    /// Picks from `valid`, which holds at least two engines.
    fn choose(&self, query: &QueryRep, valid: EngineBitmap) -> Option<Engine> {
        let first_valid = |ranking: &[Engine]| ranking.iter().copied().find(|e| valid.contains(*e));
        match self {
            RoutingStrategy::AlwaysOneEngine(e) => first_valid(&[*e]),
            RoutingStrategy::RuleBased => first_valid(&rule_based_ranking(query.tables().len())),
            RoutingStrategy::LearnedForestPolicy { model, .. } => first_valid(&model.rank(query)),
            RoutingStrategy::BlueprintDefault { cached, definite } => cached
                .get(query)
                .filter(|e| valid.contains(*e))
                .or_else(|| definite.choose(query, valid)),
        }
    }
}

/// Wide joins go to the serverless engine, medium ones to the cluster, small
/// lookups stay on the transactional engine.
pub fn rule_based_ranking(num_tables: usize) -> [Engine; 3] {
    if num_tables >= 6 {
        [Engine::Athena, Engine::Redshift, Engine::Aurora]
    } else if num_tables >= 3 {
        [Engine::Redshift, Engine::Athena, Engine::Aurora]
    } else {
        [Engine::Aurora, Engine::Redshift, Engine::Athena]
    }
}

#[derive(Debug)]
pub struct Router {
    strategy: RoutingStrategy,
    placement: TablePlacement,
    functionality: FunctionalityCatalog,
    consultations: AtomicU64,
}

impl Router {
    pub fn new(
        strategy: RoutingStrategy,
        placement: TablePlacement,
        functionality: FunctionalityCatalog,
    ) -> Self {
        Self {
            strategy,
            placement,
            functionality,
            consultations: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> String {
        self.strategy.name()
    }

    pub fn strategy(&self) -> &RoutingStrategy {
        &self.strategy
    }

    pub fn placement(&self) -> &TablePlacement {
        &self.placement
    }

    /// How many times `engine_for` has been called on this router.
    pub fn consultations(&self) -> u64 {
        self.consultations.load(Ordering::Relaxed)
    }

    pub fn engine_for(&self, query: &QueryRep) -> Result<Engine> {
        self.consultations.fetch_add(1, Ordering::Relaxed);
        if query.is_data_modification() {
            return Ok(Engine::Aurora);
        }

        let valid = self.valid_locations(query)?;
        if let Some(only) = valid.single() {
            return Ok(only);
        }

        let engine = self
            .strategy
            .choose(query, valid)
            .or_else(|| valid.engines().next())
            .ok_or_else(|| RoutingError::Unsupported(query.sql().to_string()))?;
        tracing::trace!(engine = %engine, valid = %valid, "routed query");
        Ok(engine)
    }

    /// Engines that both support the query's features and host every known
    /// table it references. Unknown names (CTEs) do not constrain placement.
    pub fn valid_locations(&self, query: &QueryRep) -> Result<EngineBitmap> {
        let supported = self.functionality.supporting(query.required_functionality());
        if supported.is_empty() {
            return Err(RoutingError::Unsupported(query.sql().to_string()));
        }
        let hosted = query
            .tables()
            .iter()
            .filter_map(|t| self.placement.get(t))
            .fold(EngineBitmap::ALL, |acc, bm| acc & bm);
        if hosted.is_empty() {
            return Err(RoutingError::NoCommonLocation {
                tables: query.tables().to_vec(),
            });
        }
        let valid = supported & hosted;
        if valid.is_empty() {
            return Err(RoutingError::Unsupported(query.sql().to_string()));
        }
        Ok(valid)
    }
}
