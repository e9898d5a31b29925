//! Sequential in-memory hash join (build smaller, probe larger)
//!
//! A background thread fully drains the smaller operand into a
//! [`SolutionHashTable`]; the foreground pull blocks until the build is
//! finished, then probes the table with one larger-side row at a time.
//! The first pull that finds at least one match queues all merged rows
//! and returns.
//!
//! A build failure is captured in the shared state and surfaced as
//! [`QueryError::BackgroundTask`] on the consumer's next pull rather
//! than being swallowed. `close()` is bounded: it sets the stop flag,
//! waits at most the configured timeout for the build thread, and
//! proceeds with a warning if the thread does not react.

use crate::error::{QueryError, Result};
use crate::hash_table::SolutionHashTable;
use crate::options::JoinOptions;
use crate::results::{BoxedResults, Results};
use fedra_core::{Solution, VarSet};
use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashSet;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Build-side completion state, guarded by one mutex + condvar.
struct BuildShared {
    state: Mutex<BuildState>,
    cond: Condvar,
}

struct BuildState {
    done: bool,
    table: Option<SolutionHashTable>,
    error: Option<String>,
}

/// Check that the operands can bind every join and result variable.
///
/// Shared precondition of all join variants; violation is a static
/// planning bug and fails construction.
pub(crate) fn check_join_vars(
    left_vars: &[Arc<str>],
    right_vars: &[Arc<str>],
    join_vars: &VarSet,
    result_vars: &VarSet,
) -> Result<()> {
    let available: FxHashSet<&str> = left_vars
        .iter()
        .chain(right_vars.iter())
        .map(|v| v.as_ref())
        .collect();
    let missing: Vec<&str> = join_vars
        .iter()
        .chain(result_vars.iter())
        .map(|v| v.as_ref())
        .filter(|v| !available.contains(*v))
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(QueryError::InvalidJoin(format!(
            "operands bind neither join nor result variable(s): {}",
            missing.join(", ")
        )))
    }
}

/// Build the output row for one matched pair: every result variable
/// taken from the primary side when bound there, from the secondary
/// side otherwise.
pub(crate) fn merge_match(
    result_vars: &VarSet,
    primary: &Solution,
    secondary: &Solution,
) -> Solution {
    primary.merged(secondary).project(result_vars)
}

/// Build-then-probe hash join over two solution streams.
pub struct HashJoinResults {
    vars: VarSet,
    larger: Option<BoxedResults>,
    table: Option<SolutionHashTable>,
    pending: VecDeque<Solution>,
    larger_exhausted: bool,
    distinct: bool,
    /// Sticky build failure, surfaced on every subsequent pull
    failed: Option<String>,
    stop: Arc<AtomicBool>,
    shared: Arc<BuildShared>,
    worker: Option<JoinHandle<()>>,
    close_timeout: Duration,
}

impl HashJoinResults {
    /// Start the join: consumes both operands and immediately begins
    /// draining `smaller` into the hash table on a background thread.
    pub fn new(
        smaller: BoxedResults,
        larger: BoxedResults,
        join_vars: VarSet,
        result_vars: VarSet,
        options: &JoinOptions,
    ) -> Result<Self> {
        check_join_vars(
            smaller.var_names(),
            larger.var_names(),
            &join_vars,
            &result_vars,
        )?;

        let distinct = smaller.is_distinct() && larger.is_distinct();
        let table = SolutionHashTable::with_bucket_capacity(
            Arc::clone(&join_vars),
            options.build_table_size,
            options.bucket_capacity,
        );
        let stop = Arc::new(AtomicBool::new(false));
        let shared = Arc::new(BuildShared {
            state: Mutex::new(BuildState {
                done: false,
                table: None,
                error: None,
            }),
            cond: Condvar::new(),
        });

        let worker = {
            let stop = Arc::clone(&stop);
            let shared = Arc::clone(&shared);
            std::thread::Builder::new()
                .name("fedra-hash-build".to_string())
                .spawn(move || build_table(smaller, table, &stop, &shared))
                .map_err(|e| QueryError::Internal(format!("failed to spawn build thread: {e}")))?
        };

        Ok(HashJoinResults {
            vars: result_vars,
            larger: Some(larger),
            table: None,
            pending: VecDeque::new(),
            larger_exhausted: false,
            distinct,
            failed: None,
            stop,
            shared,
            worker: Some(worker),
            close_timeout: options.close_timeout,
        })
    }

    /// Block until the background build finishes, then adopt its table.
    ///
    /// A build error becomes sticky: every later pull keeps failing.
    fn wait_for_build(&mut self) -> Result<()> {
        if self.table.is_some() {
            return Ok(());
        }
        let mut state = self.shared.state.lock();
        while !state.done {
            self.shared.cond.wait(&mut state);
        }
        if let Some(message) = state.error.take() {
            self.failed = Some(message.clone());
            return Err(QueryError::BackgroundTask(message));
        }
        self.table = state.table.take();
        if self.table.is_none() {
            return Err(QueryError::Internal(
                "build thread finished without publishing a table".to_string(),
            ));
        }
        Ok(())
    }

    /// Probe larger-side rows until at least one match is queued or the
    /// probe side is exhausted.
    fn advance(&mut self) -> Result<bool> {
        self.wait_for_build()?;
        let table = match self.table.as_mut() {
            Some(table) => table,
            None => return Ok(false),
        };
        // An empty build side can never match
        if table.is_empty() {
            self.larger_exhausted = true;
        }
        let larger = match self.larger.as_mut() {
            Some(larger) => larger,
            None => return Ok(false),
        };
        while !self.larger_exhausted {
            if !larger.has_next()? {
                self.larger_exhausted = true;
                break;
            }
            let probe = larger.next()?;
            let matches = table.get_all(&probe);
            if !matches.is_empty() {
                for build_row in matches {
                    self.pending
                        .push_back(merge_match(&self.vars, &build_row, &probe));
                }
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Background build: drain the smaller operand into the table, then
/// publish it (or the failure) and close the operand.
fn build_table(
    mut smaller: BoxedResults,
    mut table: SolutionHashTable,
    stop: &AtomicBool,
    shared: &BuildShared,
) {
    let mut error = None;
    loop {
        if stop.load(Ordering::Acquire) {
            tracing::debug!("hash-join build stopped before exhausting its operand");
            break;
        }
        match smaller.has_next() {
            Ok(true) => match smaller.next() {
                Ok(solution) => {
                    table.add(solution);
                }
                Err(e) => {
                    error = Some(e.to_string());
                    break;
                }
            },
            Ok(false) => break,
            Err(e) => {
                error = Some(e.to_string());
                break;
            }
        }
    }
    smaller.close();

    if let Some(message) = &error {
        tracing::error!(error = %message, "hash-join build failed");
    }
    let mut state = shared.state.lock();
    state.table = Some(table);
    state.error = error;
    state.done = true;
    shared.cond.notify_all();
}

impl Results for HashJoinResults {
    fn var_names(&self) -> &[Arc<str>] {
        &self.vars
    }

    fn has_next(&mut self) -> Result<bool> {
        if let Some(message) = &self.failed {
            return Err(QueryError::BackgroundTask(message.clone()));
        }
        if !self.pending.is_empty() {
            return Ok(true);
        }
        self.advance()
    }

    fn next(&mut self) -> Result<Solution> {
        if !self.has_next()? {
            return Err(QueryError::Exhausted);
        }
        self.pending.pop_front().ok_or(QueryError::Exhausted)
    }

    fn close(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            let finished = {
                let deadline = std::time::Instant::now() + self.close_timeout;
                let mut state = self.shared.state.lock();
                while !state.done {
                    let now = std::time::Instant::now();
                    if now >= deadline {
                        break;
                    }
                    self.shared.cond.wait_for(&mut state, deadline - now);
                }
                state.done
            };
            if finished {
                let _ = worker.join();
            } else {
                tracing::warn!(
                    timeout_ms = self.close_timeout.as_millis() as u64,
                    "hash-join build thread did not stop within the close timeout; detaching"
                );
            }
        }
        if let Some(mut larger) = self.larger.take() {
            larger.close();
        }
        self.pending.clear();
    }

    fn is_async(&self) -> bool {
        true
    }

    fn ready_count(&self) -> usize {
        self.pending.len()
    }

    fn is_distinct(&self) -> bool {
        self.distinct
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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

    #[test]
    fn test_basic_join() {
        let smaller = stream(
            &["x", "a"],
            vec![
                row(&[("x", "http://ex.org/1"), ("a", "http://ex.org/a1")]),
                row(&[("x", "http://ex.org/2"), ("a", "http://ex.org/a2")]),
            ],
        );
        let larger = stream(
            &["x", "b"],
            vec![
                row(&[("x", "http://ex.org/1"), ("b", "http://ex.org/b1")]),
                row(&[("x", "http://ex.org/1"), ("b", "http://ex.org/b2")]),
                row(&[("x", "http://ex.org/3"), ("b", "http://ex.org/b3")]),
            ],
        );
        let mut join = HashJoinResults::new(
            smaller,
            larger,
            var_set(["x"]),
            var_set(["x", "a", "b"]),
            &JoinOptions::default(),
        )
        .unwrap();
        assert!(join.is_async());
        let out = drain(&mut join);
        join.close();
        assert_eq!(out.len(), 2);
        for sol in &out {
            assert_eq!(sol.get("x"), Some(&Term::iri("http://ex.org/1")));
            assert!(sol.is_bound("a"));
            assert!(sol.is_bound("b"));
        }
    }

    #[test]
    fn test_invalid_join_vars() {
        let smaller = stream(&["x"], vec![]);
        let larger = stream(&["y"], vec![]);
        let err = HashJoinResults::new(
            smaller,
            larger,
            var_set(["z"]),
            var_set(["x", "y"]),
            &JoinOptions::default(),
        )
        .err()
        .expect("join over unbound variable must fail");
        assert!(matches!(err, QueryError::InvalidJoin(_)));
    }

    #[test]
    fn test_build_side_value_wins_on_collision() {
        // "c" is accidentally bound on both sides but is not a join var
        let smaller = stream(
            &["x", "c"],
            vec![row(&[("x", "http://ex.org/1"), ("c", "http://ex.org/build")])],
        );
        let larger = stream(
            &["x", "c"],
            vec![row(&[("x", "http://ex.org/1"), ("c", "http://ex.org/probe")])],
        );
        let mut join = HashJoinResults::new(
            smaller,
            larger,
            var_set(["x"]),
            var_set(["x", "c"]),
            &JoinOptions::default(),
        )
        .unwrap();
        let out = drain(&mut join);
        join.close();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].get("c"), Some(&Term::iri("http://ex.org/build")));
    }

    #[test]
    fn test_empty_build_side() {
        let smaller = stream(&["x"], vec![]);
        let larger = stream(&["x"], vec![row(&[("x", "http://ex.org/1")])]);
        let mut join = HashJoinResults::new(
            smaller,
            larger,
            var_set(["x"]),
            var_set(["x"]),
            &JoinOptions::default(),
        )
        .unwrap();
        assert!(!join.has_next().unwrap());
        join.close();
    }

    #[test]
    fn test_distinct_propagation() {
        let smaller = stream(&["x"], vec![]);
        let larger = stream(&["x"], vec![]);
        let join = HashJoinResults::new(
            Box::new(VecResults::new(var_set(["x"]), vec![]).with_distinct(true)),
            Box::new(VecResults::new(var_set(["x"]), vec![]).with_distinct(true)),
            var_set(["x"]),
            var_set(["x"]),
            &JoinOptions::default(),
        )
        .unwrap();
        assert!(join.is_distinct());
        let join2 = HashJoinResults::new(
            smaller,
            larger,
            var_set(["x"]),
            var_set(["x"]),
            &JoinOptions::default(),
        )
        .unwrap();
        // Inputs did not claim distinctness, neither does the join
        assert!(!join2.is_distinct());
    }
}
