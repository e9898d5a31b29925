//! Bind join
//!
//! A nested-loop join where the right subtree is re-planned and
//! re-executed per batch of left bindings. Two interchangeable batching
//! strategies sit behind [`BindingBatchSupplier`]:
//!
//! - [`SingleBindingSupplier`] (naive): one left row per batch, the
//!   right subtree rewritten with `create_bound`. Trivially correct,
//!   slow when each right execution is a remote call.
//! - [`ValuesBatchSupplier`]: up to `values_batch_size` left rows per
//!   batch, the right subtree rewritten once with a VALUES-like
//!   binding. Each right row is expanded against all buffered left rows
//!   via a small hash table - the inverse of the hash joins' build
//!   direction, because here the build side is the small bind buffer
//!   and the probe stream is the batched execution's output.
//!
//! Partial-failure policy: a batch whose execution fails is logged and
//! contributes zero rows; the join continues with the next batch. One
//! bad remote call does not kill the whole join.

use crate::async_results::AsyncResults;
use crate::error::{BatchError, QueryError, Result};
use crate::hash_join::{check_join_vars, merge_match};
use crate::hash_table::SolutionHashTable;
use crate::options::JoinOptions;
use crate::plan::{PlanExecutor, PlanNode};
use crate::results::{BoxedResults, FlatMapResults, Results, TransformResults};
use fedra_core::{Solution, ValuesBinding, VarSet};
use parking_lot::Mutex;
use std::sync::Arc;

/// Produces one fresh result stream per batch of left bindings.
pub trait BindingBatchSupplier: Send {
    /// The next batch's results, or `None` once the left operand is
    /// exhausted. `BatchError::Execution` marks a recoverable batch
    /// failure; `BatchError::Left` is terminal.
    fn next_batch(&mut self) -> std::result::Result<Option<BoxedResults>, BatchError>;

    /// Close the owned left operand.
    fn close(&mut self);
}

// ============================================================================
// SingleBindingSupplier
// ============================================================================

/// Naive strategy: one right-subtree execution per left row.
pub struct SingleBindingSupplier {
    left: BoxedResults,
    right: PlanNode,
    executor: Arc<dyn PlanExecutor>,
    result_vars: VarSet,
}

impl SingleBindingSupplier {
    /// Create the supplier; `left` is consumed one row per batch.
    pub fn new(
        left: BoxedResults,
        right: PlanNode,
        executor: Arc<dyn PlanExecutor>,
        result_vars: VarSet,
    ) -> Self {
        SingleBindingSupplier {
            left,
            right,
            executor,
            result_vars,
        }
    }
}

impl BindingBatchSupplier for SingleBindingSupplier {
    fn next_batch(&mut self) -> std::result::Result<Option<BoxedResults>, BatchError> {
        if !self.left.has_next().map_err(BatchError::Left)? {
            return Ok(None);
        }
        let binding = self.left.next().map_err(BatchError::Left)?;
        let bound = self.right.create_bound(&binding);
        let rights = self
            .executor
            .execute(&bound)
            .map_err(BatchError::Execution)?;

        // Re-join each right row with the one retained left row
        let vars = Arc::clone(&self.result_vars);
        let retained = binding;
        let stream = TransformResults::new(Arc::clone(&self.result_vars), rights, move |right_row| {
            merge_match(&vars, &retained, &right_row)
        });
        Ok(Some(Box::new(stream)))
    }

    fn close(&mut self) {
        self.left.close();
    }
}

// ============================================================================
// ValuesBatchSupplier
// ============================================================================

/// Batched strategy: one right-subtree execution per `batch_size` left
/// rows, rewritten with a VALUES-like binding over the join variables.
pub struct ValuesBatchSupplier {
    left: BoxedResults,
    right: PlanNode,
    executor: Arc<dyn PlanExecutor>,
    join_vars: VarSet,
    result_vars: VarSet,
    batch_size: usize,
    /// Buffered left rows of the current batch, keyed by join vars.
    /// Shared with the in-flight batch stream and cleared for reuse on
    /// every new batch.
    table: Arc<Mutex<SolutionHashTable>>,
}

impl ValuesBatchSupplier {
    /// Create the supplier; `left` should already be async so batch
    /// accumulation does not stall on a slow synchronous source.
    pub fn new(
        left: BoxedResults,
        right: PlanNode,
        executor: Arc<dyn PlanExecutor>,
        join_vars: VarSet,
        result_vars: VarSet,
        batch_size: usize,
    ) -> Self {
        let table = SolutionHashTable::new(Arc::clone(&join_vars), batch_size.max(1));
        ValuesBatchSupplier {
            left,
            right,
            executor,
            join_vars,
            result_vars,
            batch_size: batch_size.max(1),
            table: Arc::new(Mutex::new(table)),
        }
    }
}

impl BindingBatchSupplier for ValuesBatchSupplier {
    fn next_batch(&mut self) -> std::result::Result<Option<BoxedResults>, BatchError> {
        let mut batch = Vec::with_capacity(self.batch_size);
        while batch.len() < self.batch_size {
            if !self.left.has_next().map_err(BatchError::Left)? {
                break;
            }
            batch.push(self.left.next().map_err(BatchError::Left)?);
        }
        if batch.is_empty() {
            return Ok(None);
        }
        tracing::debug!(rows = batch.len(), "executing VALUES-batched bind-join batch");

        {
            let mut table = self.table.lock();
            table.clear();
            for row in &batch {
                table.add(row.clone());
            }
        }
        let values = ValuesBinding::new(Arc::clone(&self.join_vars), batch);
        let rewritten = self.right.with_values(values);
        let rights = self
            .executor
            .execute(&rewritten)
            .map_err(BatchError::Execution)?;

        // Expand each right row against every buffered left row whose
        // join key matches
        let table = Arc::clone(&self.table);
        let vars = Arc::clone(&self.result_vars);
        let stream = FlatMapResults::new(Arc::clone(&self.result_vars), rights, move |right_row| {
            table
                .lock()
                .get_all(&right_row)
                .into_iter()
                .map(|left_row| merge_match(&vars, &left_row, &right_row))
                .collect()
        });
        Ok(Some(Box::new(stream)))
    }

    fn close(&mut self) {
        self.left.close();
    }
}

// ============================================================================
// BindJoinResults
// ============================================================================

/// Bind join: drains one batch stream at a time, requesting new batches
/// from the supplier until the left operand is exhausted.
pub struct BindJoinResults {
    vars: VarSet,
    supplier: Box<dyn BindingBatchSupplier>,
    current: Option<BoxedResults>,
    exhausted: bool,
}

impl BindJoinResults {
    /// Build a bind join, choosing the batching strategy: VALUES-batched
    /// when the right subtree shape and endpoint capabilities allow it,
    /// naive otherwise.
    pub fn new(
        left: BoxedResults,
        right: PlanNode,
        join_vars: VarSet,
        result_vars: VarSet,
        executor: Arc<dyn PlanExecutor>,
        options: &JoinOptions,
    ) -> Result<Self> {
        check_join_vars(left.var_names(), &right.vars(), &join_vars, &result_vars)?;
        if right.supports_values_batching() {
            tracing::debug!("bind join: VALUES-batched strategy");
            Self::batched(left, right, join_vars, result_vars, executor, options)
        } else {
            tracing::debug!("bind join: naive per-binding strategy");
            Ok(Self::naive(left, right, result_vars, executor))
        }
    }

    /// Force the naive one-row-per-batch strategy.
    pub fn naive(
        left: BoxedResults,
        right: PlanNode,
        result_vars: VarSet,
        executor: Arc<dyn PlanExecutor>,
    ) -> Self {
        let supplier = SingleBindingSupplier::new(left, right, executor, Arc::clone(&result_vars));
        Self::with_supplier(result_vars, Box::new(supplier))
    }

    /// Force the VALUES-batched strategy. The left operand is wrapped
    /// in an async adapter when it is not already asynchronous.
    pub fn batched(
        left: BoxedResults,
        right: PlanNode,
        join_vars: VarSet,
        result_vars: VarSet,
        executor: Arc<dyn PlanExecutor>,
        options: &JoinOptions,
    ) -> Result<Self> {
        let left = if left.is_async() {
            left
        } else {
            Box::new(AsyncResults::new(left, options)?)
        };
        let supplier = ValuesBatchSupplier::new(
            left,
            right,
            executor,
            join_vars,
            Arc::clone(&result_vars),
            options.values_batch_size,
        );
        Ok(Self::with_supplier(result_vars, Box::new(supplier)))
    }

    /// Build from an explicit supplier.
    pub fn with_supplier(result_vars: VarSet, supplier: Box<dyn BindingBatchSupplier>) -> Self {
        BindJoinResults {
            vars: result_vars,
            supplier,
            current: None,
            exhausted: false,
        }
    }
}

impl Results for BindJoinResults {
    fn var_names(&self) -> &[Arc<str>] {
        &self.vars
    }

    fn has_next(&mut self) -> Result<bool> {
        if self.exhausted {
            return Ok(false);
        }
        loop {
            if let Some(current) = self.current.as_mut() {
                match current.has_next() {
                    Ok(true) => return Ok(true),
                    Ok(false) => {}
                    // A batch failing mid-stream is the same policy as a
                    // batch failing to start: it contributed what it
                    // could, drop it and continue
                    Err(e) => {
                        tracing::warn!(error = %e, "bind-join batch stream failed; dropping batch")
                    }
                }
                if let Some(mut finished) = self.current.take() {
                    finished.close();
                }
                continue;
            }
            match self.supplier.next_batch() {
                Ok(Some(batch)) => self.current = Some(batch),
                Ok(None) => {
                    self.exhausted = true;
                    return Ok(false);
                }
                Err(BatchError::Execution(e)) => {
                    tracing::warn!(error = %e, "bind-join batch execution failed; skipping batch");
                }
                Err(BatchError::Left(e)) => return Err(e),
            }
        }
    }

    fn next(&mut self) -> Result<Solution> {
        if !self.has_next()? {
            return Err(QueryError::Exhausted);
        }
        match self.current.as_mut() {
            Some(current) => current.next(),
            None => Err(QueryError::Exhausted),
        }
    }

    fn close(&mut self) {
        if let Some(mut current) = self.current.take() {
            current.close();
        }
        self.supplier.close();
        self.exhausted = true;
    }

    fn ready_count(&self) -> usize {
        self.current.as_ref().map_or(0, |c| c.ready_count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::{Capability, StaticEndpoint};
    use crate::plan::{PlanKind, QueryNode};
    use crate::results::VecResults;
    use fedra_core::{var_set, Term};

    fn row(pairs: &[(&str, &str)]) -> Solution {
        pairs
            .iter()
            .map(|(name, iri)| (*name, Term::iri(*iri)))
            .collect()
    }

    fn stream(vars: &[&str], rows: Vec<Solution>) -> BoxedResults {
        Box::new(VecResults::new(var_set(vars.iter().copied()), rows))
    }

    fn drain(results: &mut dyn Results) -> Vec<Solution> {
        let mut out = Vec::new();
        while results.has_next().unwrap() {
            out.push(results.next().unwrap());
        }
        out
    }

    /// Executor over a fixed right-side dataset: answers `Bound` nodes
    /// with the rows compatible with the binding and `Values` nodes
    /// with the rows compatible with any batch row.
    struct FixtureExecutor {
        vars: VarSet,
        rows: Vec<Solution>,
        fail_on_bound: bool,
    }

    impl PlanExecutor for FixtureExecutor {
        fn execute(&self, node: &PlanNode) -> Result<BoxedResults> {
            match &node.kind {
                PlanKind::Bound { binding, .. } => {
                    if self.fail_on_bound {
                        return Err(QueryError::RemoteExecution("endpoint unreachable".into()));
                    }
                    let rows = self
                        .rows
                        .iter()
                        .filter(|row| row.compatible(binding))
                        .cloned()
                        .collect::<Vec<_>>();
                    Ok(stream_vars(&self.vars, rows))
                }
                PlanKind::Values { binding, .. } => {
                    let rows = self
                        .rows
                        .iter()
                        .filter(|row| binding.rows().iter().any(|b| row.compatible(b)))
                        .cloned()
                        .collect::<Vec<_>>();
                    Ok(stream_vars(&self.vars, rows))
                }
                _ => Ok(stream_vars(&self.vars, self.rows.clone())),
            }
        }
    }

    fn stream_vars(vars: &VarSet, rows: Vec<Solution>) -> BoxedResults {
        Box::new(VecResults::new(Arc::clone(vars), rows))
    }

    fn right_node(caps: &[Capability]) -> PlanNode {
        PlanNode::query(QueryNode {
            endpoint: Arc::new(StaticEndpoint::new(
                "http://ex.org/sparql",
                caps.iter().copied(),
            )),
            pattern: Arc::from("?x <p> ?b"),
            vars: var_set(["x", "b"]),
        })
    }

    fn right_rows() -> Vec<Solution> {
        (0..6)
            .map(|i| {
                row(&[
                    ("x", &format!("http://ex.org/{}", i % 3)),
                    ("b", &format!("http://ex.org/b{i}")),
                ])
            })
            .collect()
    }

    fn left_rows() -> Vec<Solution> {
        vec![
            row(&[("x", "http://ex.org/0"), ("a", "http://ex.org/a0")]),
            row(&[("x", "http://ex.org/1"), ("a", "http://ex.org/a1")]),
            row(&[("x", "http://ex.org/9"), ("a", "http://ex.org/a9")]),
        ]
    }

    #[test]
    fn test_naive_bind_join() {
        let executor = Arc::new(FixtureExecutor {
            vars: var_set(["x", "b"]),
            rows: right_rows(),
            fail_on_bound: false,
        });
        let mut join = BindJoinResults::naive(
            stream(&["x", "a"], left_rows()),
            right_node(&[]),
            var_set(["x", "a", "b"]),
            executor,
        );
        let out = drain(&mut join);
        join.close();
        // x=0 and x=1 each match 2 right rows; x=9 matches none
        assert_eq!(out.len(), 4);
        for sol in &out {
            assert!(sol.is_bound("x") && sol.is_bound("a") && sol.is_bound("b"));
        }
    }

    #[test]
    fn test_batched_bind_join_matches_naive() {
        let executor = Arc::new(FixtureExecutor {
            vars: var_set(["x", "b"]),
            rows: right_rows(),
            fail_on_bound: false,
        });
        let options = JoinOptions::default().with_values_batch_size(2);

        let mut naive = BindJoinResults::naive(
            stream(&["x", "a"], left_rows()),
            right_node(&[Capability::Values]),
            var_set(["x", "a", "b"]),
            Arc::clone(&executor) as Arc<dyn PlanExecutor>,
        );
        let mut naive_out = drain(&mut naive);
        naive.close();

        let mut batched = BindJoinResults::batched(
            stream(&["x", "a"], left_rows()),
            right_node(&[Capability::Values]),
            var_set(["x"]),
            var_set(["x", "a", "b"]),
            executor,
            &options,
        )
        .unwrap();
        let mut batched_out = drain(&mut batched);
        batched.close();

        naive_out.sort();
        batched_out.sort();
        assert_eq!(naive_out, batched_out);
    }

    #[test]
    fn test_failed_batch_skipped() {
        let executor = Arc::new(FixtureExecutor {
            vars: var_set(["x", "b"]),
            rows: right_rows(),
            fail_on_bound: true,
        });
        let mut join = BindJoinResults::naive(
            stream(&["x", "a"], left_rows()),
            right_node(&[]),
            var_set(["x", "a", "b"]),
            executor,
        );
        // Every batch fails; the join yields nothing but does not error
        let out = drain(&mut join);
        join.close();
        assert!(out.is_empty());
    }

    #[test]
    fn test_dispatch_uses_batching_when_capable() {
        let executor = Arc::new(FixtureExecutor {
            vars: var_set(["x", "b"]),
            rows: right_rows(),
            fail_on_bound: true, // naive mode would yield nothing
        });
        let mut join = BindJoinResults::new(
            stream(&["x", "a"], left_rows()),
            right_node(&[Capability::Values]),
            var_set(["x"]),
            var_set(["x", "a", "b"]),
            executor,
            &JoinOptions::default(),
        )
        .unwrap();
        // Batched mode executes Values nodes, which never fail here
        let out = drain(&mut join);
        join.close();
        assert_eq!(out.len(), 4);
    }
}
