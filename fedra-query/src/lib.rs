//! # Fedra Query
//!
//! Join execution for the fedra federated query engine.
//!
//! The planner hands this crate a binary join node; the
//! [`strategy::JoinPlanner`] asks a [`plan::PlanExecutor`] for the two
//! child streams, picks an algorithm from cardinality estimates and
//! endpoint capabilities, and returns a [`results::Results`] that
//! lazily produces the join output.
//!
//! Algorithms:
//! - [`hash_join::HashJoinResults`] - build the smaller side into a hash
//!   table on a background thread, probe with the larger side
//! - [`parallel_join::ParallelHashJoinResults`] - symmetric two-sided
//!   concurrent build + probe for two async (remote) operands
//! - [`bind_join::BindJoinResults`] - re-execute the right subtree per
//!   left binding, naively or with batched VALUES rewriting
//!
//! All background work is bounded: stop flags everywhere, and `close()`
//! waits at most [`options::JoinOptions::close_timeout`] before logging
//! and proceeding.

pub mod async_results;
pub mod bind_join;
pub mod cardinality;
pub mod endpoint;
pub mod error;
pub mod hash_join;
pub mod hash_table;
pub mod options;
pub mod parallel_join;
pub mod plan;
pub mod results;
pub mod strategy;

pub use async_results::AsyncResults;
pub use bind_join::{BindJoinResults, BindingBatchSupplier};
pub use cardinality::{CardinalityEstimate, Reliability};
pub use endpoint::{Capability, Endpoint, StaticEndpoint};
pub use error::{BatchError, QueryError, Result};
pub use hash_join::HashJoinResults;
pub use hash_table::{EntryHandle, SolutionHashTable};
pub use options::JoinOptions;
pub use parallel_join::ParallelHashJoinResults;
pub use plan::{JoinNode, NodeMeta, PlanExecutor, PlanKind, PlanNode, QueryNode};
pub use results::{
    BoxedResults, ConcatResults, DistinctResults, EmptyResults, FlatMapResults, Results,
    TransformResults, VecResults,
};
pub use strategy::{order_for_bind, select_algorithm, JoinAlgorithm, JoinPlanner};
