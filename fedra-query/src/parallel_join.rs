//! Parallel (two-sided) in-memory hash join
//!
//! Both operands act as build and probe side at once: each worker
//! inserts every row it consumes into its own table and immediately
//! probes the other side's table, emitting matches into one shared
//! bounded queue. Insert and probe happen in a single critical section
//! per consumed row, so no matching opportunity can fall between a
//! table mutation and a concurrent read.
//!
//! Termination: a worker that exhausts its source marks itself
//! complete and clears the other side's now-unnecessary table (nothing
//! will probe it again); the join is exhausted when the queue is empty
//! and both sides are complete. Checking completeness without the
//! queue-empty condition would race against late matches still in
//! flight.

use crate::error::{QueryError, Result};
use crate::hash_join::{check_join_vars, merge_match};
use crate::hash_table::SolutionHashTable;
use crate::options::JoinOptions;
use crate::results::{BoxedResults, Results};
use fedra_core::{Solution, VarSet};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Everything both workers and the consumer touch, under one mutex.
struct ParallelState {
    queue: VecDeque<Solution>,
    complete: [bool; 2],
    exited: [bool; 2],
    tables: [SolutionHashTable; 2],
    error: Option<String>,
    stop: bool,
}

struct ParallelShared {
    state: Mutex<ParallelState>,
    cond: Condvar,
}

/// Symmetric concurrent build+probe join over two solution streams.
pub struct ParallelHashJoinResults {
    vars: VarSet,
    lookahead: Option<Solution>,
    distinct: bool,
    failed: Option<String>,
    shared: Arc<ParallelShared>,
    workers: Vec<JoinHandle<()>>,
    close_timeout: Duration,
}

impl ParallelHashJoinResults {
    /// Start the join: consumes both operands, spawning one worker per
    /// side.
    pub fn new(
        left: BoxedResults,
        right: BoxedResults,
        join_vars: VarSet,
        result_vars: VarSet,
        options: &JoinOptions,
    ) -> Result<Self> {
        check_join_vars(left.var_names(), right.var_names(), &join_vars, &result_vars)?;

        let distinct = left.is_distinct() && right.is_distinct();
        let make_table = || {
            SolutionHashTable::with_bucket_capacity(
                Arc::clone(&join_vars),
                options.build_table_size,
                options.bucket_capacity,
            )
        };
        let shared = Arc::new(ParallelShared {
            state: Mutex::new(ParallelState {
                queue: VecDeque::new(),
                complete: [false, false],
                exited: [false, false],
                tables: [make_table(), make_table()],
                error: None,
                stop: false,
            }),
            cond: Condvar::new(),
        });

        let queue_capacity = options.output_queue_capacity.max(1);
        let mut workers = Vec::with_capacity(2);
        for (side, source) in [left, right].into_iter().enumerate() {
            let shared = Arc::clone(&shared);
            let result_vars = Arc::clone(&result_vars);
            let worker = std::thread::Builder::new()
                .name(format!("fedra-parallel-join-{side}"))
                .spawn(move || run_side(side, source, &shared, &result_vars, queue_capacity))
                .map_err(|e| QueryError::Internal(format!("failed to spawn join worker: {e}")))?;
            workers.push(worker);
        }

        Ok(ParallelHashJoinResults {
            vars: result_vars,
            lookahead: None,
            distinct,
            failed: None,
            shared,
            workers,
            close_timeout: options.close_timeout,
        })
    }
}

/// One side's worker: consume the source to exhaustion, inserting and
/// probing under the shared lock, then mark complete and reclaim the
/// other side's table.
fn run_side(
    side: usize,
    mut source: BoxedResults,
    shared: &ParallelShared,
    result_vars: &VarSet,
    queue_capacity: usize,
) {
    let other = 1 - side;
    let mut error = None;

    'consume: loop {
        if shared.state.lock().stop {
            break;
        }
        // Pulling the source happens outside the lock: it may block on
        // remote I/O and must not stall the other worker.
        let item = match source.has_next() {
            Ok(true) => match source.next() {
                Ok(solution) => solution,
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
        };

        let mut state = shared.state.lock();
        if state.stop {
            break;
        }
        // Insert-then-probe atomically; skip the insert once the other
        // side is complete (nothing will ever probe this table again).
        if !state.complete[other] {
            state.tables[side].add(item.clone());
        }
        let matches = state.tables[other].get_all(&item);
        for other_row in matches {
            let merged = if side == 0 {
                merge_match(result_vars, &item, &other_row)
            } else {
                merge_match(result_vars, &other_row, &item)
            };
            while state.queue.len() >= queue_capacity {
                if state.stop {
                    break 'consume;
                }
                shared.cond.wait(&mut state);
            }
            state.queue.push_back(merged);
            shared.cond.notify_all();
        }
    }

    source.close();

    if let Some(message) = &error {
        tracing::error!(side, error = %message, "parallel-join worker failed");
    }
    let mut state = shared.state.lock();
    state.complete[side] = true;
    state.exited[side] = true;
    state.tables[other].clear();
    if let Some(message) = error {
        state.error.get_or_insert(message);
    }
    shared.cond.notify_all();
}

impl Results for ParallelHashJoinResults {
    fn var_names(&self) -> &[Arc<str>] {
        &self.vars
    }

    fn has_next(&mut self) -> Result<bool> {
        if let Some(message) = &self.failed {
            return Err(QueryError::BackgroundTask(message.clone()));
        }
        if self.lookahead.is_some() {
            return Ok(true);
        }
        let mut state = self.shared.state.lock();
        loop {
            if let Some(message) = state.error.clone() {
                drop(state);
                self.failed = Some(message.clone());
                return Err(QueryError::BackgroundTask(message));
            }
            if let Some(solution) = state.queue.pop_front() {
                self.lookahead = Some(solution);
                // A freed slot may unblock a producer
                self.shared.cond.notify_all();
                return Ok(true);
            }
            if state.complete[0] && state.complete[1] {
                return Ok(false);
            }
            self.shared.cond.wait(&mut state);
        }
    }

    fn next(&mut self) -> Result<Solution> {
        if !self.has_next()? {
            return Err(QueryError::Exhausted);
        }
        self.lookahead.take().ok_or(QueryError::Exhausted)
    }

    fn close(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.stop = true;
            self.shared.cond.notify_all();
        }
        let deadline = Instant::now() + self.close_timeout;
        let finished = {
            let mut state = self.shared.state.lock();
            loop {
                if state.exited[0] && state.exited[1] {
                    break true;
                }
                let now = Instant::now();
                if now >= deadline {
                    break false;
                }
                self.shared.cond.wait_for(&mut state, deadline - now);
            }
        };
        if finished {
            for worker in self.workers.drain(..) {
                let _ = worker.join();
            }
        } else {
            tracing::warn!(
                timeout_ms = self.close_timeout.as_millis() as u64,
                "parallel-join workers did not stop within the close timeout; detaching"
            );
            self.workers.clear();
        }
        self.lookahead = None;
    }

    fn is_async(&self) -> bool {
        true
    }

    fn ready_count(&self) -> usize {
        let buffered = self
            .shared
            .state
            .try_lock()
            .map_or(0, |state| state.queue.len());
        buffered + usize::from(self.lookahead.is_some())
    }

    fn is_distinct(&self) -> bool {
        self.distinct
    }
}
