use thiserror::Error;

use strata_router::RoutingError;

pub type Result<T> = std::result::Result<T, PlanError>;

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("no feasible blueprint: every candidate was dropped")]
    NoFeasibleBlueprint,

    #[error("routing error: {0}")]
    Routing(#[from] RoutingError),

    #[error(transparent)]
    Core(#[from] strata_core::Error),
}
