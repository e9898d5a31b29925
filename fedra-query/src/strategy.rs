//! Join strategy selection
//!
//! Given a planner-produced join node, picks the join algorithm from
//! the operands' cardinality estimates, input-variable requirements and
//! optional modifiers, orders the operands, materializes the child
//! streams through the [`PlanExecutor`], and returns the join's result
//! stream.
//!
//! The decision ladder (in order):
//! 1. two optional operands without required inputs join disjointly -
//!    a plain hash join over both materializable sides
//! 2. any operand declaring input variables forces a bind join (one
//!    side must produce bindings for the other)
//! 3. a reliably-estimated side below the materialization threshold is
//!    cheap to build into a hash table
//! 4. a "degenerate" join whose join variables cover all public
//!    variables of the larger side may still hash-join when that side
//!    stays within a hard ceiling; everything else streams through a
//!    bind join rather than risking an unbounded materialization

use crate::bind_join::BindJoinResults;
use crate::cardinality::CardinalityEstimate;
use crate::error::{QueryError, Result};
use crate::hash_join::{check_join_vars, HashJoinResults};
use crate::options::JoinOptions;
use crate::parallel_join::ParallelHashJoinResults;
use crate::plan::{JoinNode, PlanExecutor, PlanNode};
use crate::results::BoxedResults;
use std::cmp::Ordering;
use std::sync::Arc;

/// Join algorithm chosen by the selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinAlgorithm {
    /// Materialize one side into a hash table, probe with the other
    Hash,
    /// Re-execute the right subtree per batch of left bindings
    Bind,
}

/// Pick the join algorithm for a join node.
pub fn select_algorithm(join: &JoinNode, options: &JoinOptions) -> JoinAlgorithm {
    let left = &join.left.meta;
    let right = &join.right.meta;

    // Disjoint-optional joins are easiest expressed as a plain hash
    // join over two fully-materializable sides
    if left.optional
        && right.optional
        && left.required_inputs.is_empty()
        && right.required_inputs.is_empty()
    {
        tracing::debug!("join strategy: hash (both operands optional, no required inputs)");
        return JoinAlgorithm::Hash;
    }

    // An operand with input variables must receive bindings from the
    // other side
    if left.has_inputs() || right.has_inputs() {
        tracing::debug!("join strategy: bind (operand declares input variables)");
        return JoinAlgorithm::Bind;
    }

    let left_card = left.cardinality;
    let right_card = right.cardinality;

    if left_card.is_upper_bound_reliable()
        && right_card.is_upper_bound_reliable()
        && CardinalityEstimate::min(&left_card, &right_card).effective_value()
            < options.hash_join_threshold
    {
        tracing::debug!(
            smaller = CardinalityEstimate::min(&left_card, &right_card).effective_value(),
            "join strategy: hash (reliably small side)"
        );
        return JoinAlgorithm::Hash;
    }

    // Degenerate escape hatch: the larger side is a semi-join-like
    // operand (join vars cover all its public vars) and stays bounded
    let (larger_node, larger_card, smaller_card) =
        if CardinalityEstimate::compare(&left_card, &right_card) == Ordering::Greater {
            (&join.left, left_card, right_card)
        } else {
            (&join.right, right_card, left_card)
        };
    let covered = larger_node
        .vars()
        .iter()
        .all(|var| join.join_vars.iter().any(|jv| jv == var));
    let ceiling = options
        .degenerate_limit
        .min(smaller_card.effective_value().saturating_mul(2));
    if covered && larger_card.effective_value() < ceiling {
        tracing::debug!(
            larger = larger_card.effective_value(),
            ceiling,
            "join strategy: hash (degenerate join within ceiling)"
        );
        JoinAlgorithm::Hash
    } else {
        tracing::debug!("join strategy: bind (fallback)");
        JoinAlgorithm::Bind
    }
}

/// Order bind-join operands: the binding source first, the bound
/// (re-executed) side second.
///
/// A side with required input variables can only be the bound side; if
/// both sides require inputs the join shape is unsatisfiable. An
/// optional modifier on the binding source cannot be honored there - it
/// is swapped to the bound side when that side is unencumbered, and
/// otherwise dropped with a warning so the join never silently changes
/// which side is optional.
pub fn order_for_bind(left: PlanNode, right: PlanNode) -> Result<(PlanNode, PlanNode)> {
    let left_required = !left.meta.required_inputs.is_empty();
    let right_required = !right.meta.required_inputs.is_empty();

    if left_required && right_required {
        return Err(QueryError::InvalidJoin(format!(
            "both operands require input variables ({:?} and {:?}); no side can produce bindings",
            left.meta.required_inputs, right.meta.required_inputs
        )));
    }

    let (mut binding, mut bound) = if left_required {
        (right, left)
    } else {
        (left, right)
    };

    if binding.meta.optional {
        let bound_blocks = !bound.meta.required_inputs.is_empty() || bound.meta.optional;
        if bound_blocks {
            tracing::warn!(
                "dropping optional modifier on bind-join binding operand; it cannot be \
                 relocated past the bound side"
            );
            binding.meta.optional = false;
        } else {
            std::mem::swap(&mut binding, &mut bound);
        }
    }

    Ok((binding, bound))
}

/// Builds join result streams for planner join nodes.
pub struct JoinPlanner {
    executor: Arc<dyn PlanExecutor>,
    options: JoinOptions,
}

impl JoinPlanner {
    /// Create a planner over the given executor
    pub fn new(executor: Arc<dyn PlanExecutor>, options: JoinOptions) -> Self {
        JoinPlanner { executor, options }
    }

    /// Execute a join node: select the algorithm, materialize the
    /// children, and return the lazily-produced join output.
    pub fn execute_join(&self, join: JoinNode) -> Result<BoxedResults> {
        match select_algorithm(&join, &self.options) {
            JoinAlgorithm::Hash => self.execute_hash(join),
            JoinAlgorithm::Bind => self.execute_bind(join),
        }
    }

    fn execute_hash(&self, join: JoinNode) -> Result<BoxedResults> {
        // Fail before touching the executor when the node shape is
        // invalid
        check_join_vars(
            &join.left.vars(),
            &join.right.vars(),
            &join.join_vars,
            &join.result_vars,
        )?;

        let left_card = join.left.meta.cardinality;
        let right_card = join.right.meta.cardinality;
        let (small_node, large_node) =
            if CardinalityEstimate::compare(&left_card, &right_card) == Ordering::Greater {
                (join.right, join.left)
            } else {
                (join.left, join.right)
            };

        let smaller = self.executor.execute(&small_node)?;
        let larger = match self.executor.execute(&large_node) {
            Ok(results) => results,
            Err(e) => {
                let mut smaller = smaller;
                smaller.close();
                return Err(e);
            }
        };

        if smaller.is_async() && larger.is_async() {
            // Two remote fetches overlap best with the two-sided join
            tracing::debug!("hash join variant: parallel (both operands async)");
            Ok(Box::new(ParallelHashJoinResults::new(
                smaller,
                larger,
                join.join_vars,
                join.result_vars,
                &self.options,
            )?))
        } else {
            tracing::debug!("hash join variant: sequential build/probe");
            Ok(Box::new(HashJoinResults::new(
                smaller,
                larger,
                join.join_vars,
                join.result_vars,
                &self.options,
            )?))
        }
    }

    fn execute_bind(&self, join: JoinNode) -> Result<BoxedResults> {
        check_join_vars(
            &join.left.vars(),
            &join.right.vars(),
            &join.join_vars,
            &join.result_vars,
        )?;

        let (binding_node, bound_node) = order_for_bind(join.left, join.right)?;
        let left = self.executor.execute(&binding_node)?;
        let results = BindJoinResults::new(
            left,
            bound_node,
            join.join_vars,
            join.result_vars,
            Arc::clone(&self.executor),
            &self.options,
        )?;
        Ok(Box::new(results))
    }
}
