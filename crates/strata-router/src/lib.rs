#![forbid(unsafe_code)]
//! strata-router: decides which engine runs each incoming query.
//!
//! - `query_rep`: cleaned SQL plus lazily parsed facts (tables, features).
//! - `router`: the filtering pipeline and the routing strategies.
//! - `forest`: the learned ensemble strategy and its model format.
//! - `factory`: turns a blueprint (or a bare placement) into a `Router`.
//!
//! Routing is pure: no I/O, no async. Front ends swap whole routers when a
//! new blueprint lands.

pub mod cached;
pub mod error;
pub mod factory;
pub mod forest;
pub mod functionality;
pub mod query_rep;
pub mod router;

pub use cached::CachedLocations;
pub use error::{Result, RoutingError};
pub use factory::RouterFactory;
pub use forest::{DecisionTree, ForestModel, ModelRegistry, TreeNode};
pub use functionality::{Functionality, FunctionalityCatalog};
pub use query_rep::{clean_sql, QueryRep};
pub use router::{Router, RoutingStrategy};
