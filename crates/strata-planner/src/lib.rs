#![forbid(unsafe_code)]
//! strata-planner: proposes the next blueprint from a predicted workload.
//!
//! - `candidate`: a partial blueprint scored incrementally as queries are
//!   assigned to engines.
//! - `compare`: the strict total order candidates are ranked by.
//! - `beam`: the query-by-query search loop and its final re-routing step.
//! - `table_beam`: the alternative search that places groups of co-read
//!   tables on engine sets.
//! - `score`: the serializable breakdown reported with a plan.
//!
//! One call to [`BeamPlanner::plan`] or [`TableBeamPlanner::plan`] is one
//! pass. Planning is deterministic for fixed inputs: ties are broken by
//! creation sequence, never by hash or iteration order.

pub mod beam;
pub mod candidate;
pub mod compare;
pub mod error;
pub mod score;
pub mod table_beam;

pub use beam::{
    current_query_locations, plan_next_blueprint, query_order, BeamPlanner, PlanOutcome,
};
pub use candidate::{BlueprintCandidate, Feasibility};
pub use compare::{Comparator, LatencyStats, Rankable};
pub use error::{PlanError, Result};
pub use score::{OperationalCost, PerformanceScore, ScoreSummary, TransitionCost};
pub use table_beam::{placement_options, query_clusters, QueryCluster, TableBeamPlanner};
