//! Cross-algorithm join equivalence tests
//!
//! For any pair of finite solution streams and any join variable set,
//! the sequential hash join, the parallel hash join, and both bind-join
//! strategies must produce identical result multisets (order-free,
//! duplicates counted).

use fedra_core::{var_set, Solution, Term, VarSet};
use fedra_query::bind_join::BindJoinResults;
use fedra_query::endpoint::{Capability, StaticEndpoint};
use fedra_query::hash_join::HashJoinResults;
use fedra_query::parallel_join::ParallelHashJoinResults;
use fedra_query::plan::{PlanExecutor, PlanKind, PlanNode, QueryNode};
use fedra_query::results::{BoxedResults, Results, VecResults};
use fedra_query::{JoinOptions, QueryError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::Arc;

fn stream(vars: &VarSet, rows: &[Solution]) -> BoxedResults {
    Box::new(VecResults::new(Arc::clone(vars), rows.to_vec()))
}

fn drain(mut results: BoxedResults) -> Vec<Solution> {
    let mut out = Vec::new();
    while results.has_next().unwrap() {
        out.push(results.next().unwrap());
    }
    results.close();
    out
}

fn multiset(rows: &[Solution]) -> HashMap<Solution, usize> {
    let mut counts = HashMap::new();
    for row in rows {
        *counts.entry(row.clone()).or_insert(0) += 1;
    }
    counts
}

/// Executor that answers every (rewritten) right subtree from a fixed
/// set of rows, honoring `Bound` and `Values` rewrites by
/// compatibility filtering.
struct RightTableExecutor {
    vars: VarSet,
    rows: Vec<Solution>,
}

impl PlanExecutor for RightTableExecutor {
    fn execute(&self, node: &PlanNode) -> Result<BoxedResults, QueryError> {
        let rows: Vec<Solution> = match &node.kind {
            PlanKind::Bound { binding, .. } => self
                .rows
                .iter()
                .filter(|row| row.compatible(binding))
                .cloned()
                .collect(),
            PlanKind::Values { binding, .. } => self
                .rows
                .iter()
                .filter(|row| binding.rows().iter().any(|b| row.compatible(b)))
                .cloned()
                .collect(),
            _ => self.rows.clone(),
        };
        Ok(Box::new(VecResults::new(Arc::clone(&self.vars), rows)))
    }
}

fn values_endpoint_node(vars: &VarSet) -> PlanNode {
    PlanNode::query(QueryNode {
        endpoint: Arc::new(StaticEndpoint::new(
            "http://ex.org/sparql",
            [Capability::Values],
        )),
        pattern: Arc::from("?join ?payload"),
        vars: Arc::clone(vars),
    })
}

/// Run all four join implementations over the same operands and check
/// the multisets agree. Returns the common multiset size.
fn assert_all_equivalent(
    left_vars: &VarSet,
    left_rows: &[Solution],
    right_vars: &VarSet,
    right_rows: &[Solution],
    join_vars: &VarSet,
    result_vars: &VarSet,
) -> usize {
    let options = JoinOptions::default().with_values_batch_size(3);

    let sequential = drain(Box::new(
        HashJoinResults::new(
            stream(left_vars, left_rows),
            stream(right_vars, right_rows),
            Arc::clone(join_vars),
            Arc::clone(result_vars),
            &options,
        )
        .unwrap(),
    ));

    let parallel = drain(Box::new(
        ParallelHashJoinResults::new(
            stream(left_vars, left_rows),
            stream(right_vars, right_rows),
            Arc::clone(join_vars),
            Arc::clone(result_vars),
            &options,
        )
        .unwrap(),
    ));

    let executor = Arc::new(RightTableExecutor {
        vars: Arc::clone(right_vars),
        rows: right_rows.to_vec(),
    });

    let naive = drain(Box::new(BindJoinResults::naive(
        stream(left_vars, left_rows),
        values_endpoint_node(right_vars),
        Arc::clone(result_vars),
        Arc::clone(&executor) as Arc<dyn PlanExecutor>,
    )));

    let batched = drain(Box::new(
        BindJoinResults::batched(
            stream(left_vars, left_rows),
            values_endpoint_node(right_vars),
            Arc::clone(join_vars),
            Arc::clone(result_vars),
            executor,
            &options,
        )
        .unwrap(),
    ));

    let reference = multiset(&sequential);
    assert_eq!(reference, multiset(&parallel), "parallel hash join differs");
    assert_eq!(reference, multiset(&naive), "naive bind join differs");
    assert_eq!(reference, multiset(&batched), "batched bind join differs");
    sequential.len()
}

fn row(pairs: &[(&str, String)]) -> Solution {
    pairs
        .iter()
        .map(|(name, iri)| (*name, Term::iri(iri)))
        .collect()
}

#[test]
fn test_equivalence_shared_key() {
    let left_vars = var_set(["x", "a"]);
    let right_vars = var_set(["x", "b"]);
    let left_rows: Vec<Solution> = (0..9)
        .map(|i| {
            row(&[
                ("x", format!("http://ex.org/k{}", i % 3)),
                ("a", format!("http://ex.org/a{i}")),
            ])
        })
        .collect();
    let right_rows: Vec<Solution> = (0..6)
        .map(|i| {
            row(&[
                ("x", format!("http://ex.org/k{}", i % 2)),
                ("b", format!("http://ex.org/b{i}")),
            ])
        })
        .collect();

    let count = assert_all_equivalent(
        &left_vars,
        &left_rows,
        &right_vars,
        &right_rows,
        &var_set(["x"]),
        &var_set(["x", "a", "b"]),
    );
    // keys k0 and k1: 3 left rows x 3 right rows each
    assert_eq!(count, 18);
}

#[test]
fn test_equivalence_no_matches() {
    let left_vars = var_set(["x", "a"]);
    let right_vars = var_set(["x", "b"]);
    let left_rows = vec![row(&[
        ("x", "http://ex.org/only-left".to_string()),
        ("a", "http://ex.org/a".to_string()),
    ])];
    let right_rows = vec![row(&[
        ("x", "http://ex.org/only-right".to_string()),
        ("b", "http://ex.org/b".to_string()),
    ])];

    let count = assert_all_equivalent(
        &left_vars,
        &left_rows,
        &right_vars,
        &right_rows,
        &var_set(["x"]),
        &var_set(["x", "a", "b"]),
    );
    assert_eq!(count, 0);
}

#[test]
fn test_equivalence_degenerate_cartesian() {
    // No join variables: every left row pairs with every right row
    let left_vars = var_set(["a"]);
    let right_vars = var_set(["b"]);
    let left_rows: Vec<Solution> = (0..4)
        .map(|i| row(&[("a", format!("http://ex.org/a{i}"))]))
        .collect();
    let right_rows: Vec<Solution> = (0..5)
        .map(|i| row(&[("b", format!("http://ex.org/b{i}"))]))
        .collect();

    let count = assert_all_equivalent(
        &left_vars,
        &left_rows,
        &right_vars,
        &right_rows,
        &var_set(Vec::<&str>::new()),
        &var_set(["a", "b"]),
    );
    assert_eq!(count, 20);
}

#[test]
fn test_equivalence_duplicate_rows_multiplicity() {
    // Duplicates on both sides multiply; no join deduplicates
    let left_vars = var_set(["x", "a"]);
    let right_vars = var_set(["x", "b"]);
    let dup_left = row(&[
        ("x", "http://ex.org/k".to_string()),
        ("a", "http://ex.org/a".to_string()),
    ]);
    let dup_right = row(&[
        ("x", "http://ex.org/k".to_string()),
        ("b", "http://ex.org/b".to_string()),
    ]);
    let left_rows = vec![dup_left.clone(), dup_left];
    let right_rows = vec![dup_right.clone(), dup_right.clone(), dup_right.clone()];

    let count = assert_all_equivalent(
        &left_vars,
        &left_rows,
        &right_vars,
        &right_rows,
        &var_set(["x"]),
        &var_set(["x", "a", "b"]),
    );
    assert_eq!(count, 6);
}

#[test]
fn test_equivalence_randomized_streams() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let left_vars = var_set(["x", "a"]);
    let right_vars = var_set(["x", "b"]);

    for round in 0..8 {
        let key_space = rng.gen_range(1..6);
        let left_rows: Vec<Solution> = (0..rng.gen_range(0..40))
            .map(|i| {
                row(&[
                    (
                        "x",
                        format!("http://ex.org/k{}", rng.gen_range(0..key_space)),
                    ),
                    ("a", format!("http://ex.org/a{round}-{i}")),
                ])
            })
            .collect();
        let right_rows: Vec<Solution> = (0..rng.gen_range(0..40))
            .map(|i| {
                row(&[
                    (
                        "x",
                        format!("http://ex.org/k{}", rng.gen_range(0..key_space)),
                    ),
                    ("b", format!("http://ex.org/b{round}-{i}")),
                ])
            })
            .collect();

        assert_all_equivalent(
            &left_vars,
            &left_rows,
            &right_vars,
            &right_rows,
            &var_set(["x"]),
            &var_set(["x", "a", "b"]),
        );
    }
}
