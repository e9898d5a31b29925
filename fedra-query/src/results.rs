//! The `Results` streaming protocol and its building blocks
//!
//! Every operator in the engine consumes and produces [`Results`]: a
//! single-consumer, pull-based, lazily-produced sequence of [`Solution`]s
//! over a fixed variable set.
//!
//! # Protocol Contract
//!
//! - `has_next()` is idempotent and side-effect-free with respect to
//!   repeated calls until `next()` is called
//! - `next()` fails with [`QueryError::Exhausted`] when `has_next()`
//!   would return false
//! - every stream is closed exactly once by whoever owns it; ownership
//!   moves with the `Box`, so a stream handed to a join constructor can
//!   no longer be pulled or closed by the previous owner
//! - `close()` is infallible and idempotent
//!
//! The combinators here are the building blocks joins compose:
//! collection-backed, transforming (1:1), flat-mapping (1:N),
//! concatenating, and deduplicating streams.

use crate::error::{QueryError, Result};
use fedra_core::{Solution, VarSet};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

/// A lazy, closeable stream of solutions with a known variable set.
pub trait Results: Send {
    /// The variables this stream may bind, fixed at construction
    fn var_names(&self) -> &[Arc<str>];

    /// Whether another solution is available.
    ///
    /// May block (e.g. on a background build) but never consumes a
    /// solution; repeated calls without an interleaved `next()` return
    /// the same answer.
    fn has_next(&mut self) -> Result<bool>;

    /// Pull the next solution.
    ///
    /// Fails with [`QueryError::Exhausted`] if the stream is drained.
    fn next(&mut self) -> Result<Solution>;

    /// Release resources. Idempotent.
    fn close(&mut self);

    /// Whether this stream already performs its I/O off the calling
    /// thread. Consumers use this to decide whether to wrap the stream
    /// in an executor-backed adapter.
    fn is_async(&self) -> bool {
        false
    }

    /// Best-effort, non-blocking hint of how many solutions are already
    /// buffered and retrievable without blocking.
    fn ready_count(&self) -> usize {
        0
    }

    /// Whether this stream is known to be duplicate-free over its
    /// variable set.
    fn is_distinct(&self) -> bool {
        false
    }
}

/// Owned stream handle. Moving the box is the ownership-transfer
/// discipline: join constructors consume their children.
pub type BoxedResults = Box<dyn Results>;

// ============================================================================
// VecResults
// ============================================================================

/// Collection-backed stream over already-materialized solutions.
pub struct VecResults {
    vars: VarSet,
    items: VecDeque<Solution>,
    distinct: bool,
    closed: bool,
}

impl VecResults {
    /// Wrap a materialized collection of solutions
    pub fn new(vars: VarSet, items: impl IntoIterator<Item = Solution>) -> Self {
        VecResults {
            vars,
            items: items.into_iter().collect(),
            distinct: false,
            closed: false,
        }
    }

    /// Declare the collection duplicate-free
    pub fn with_distinct(mut self, distinct: bool) -> Self {
        self.distinct = distinct;
        self
    }
}

impl Results for VecResults {
    fn var_names(&self) -> &[Arc<str>] {
        &self.vars
    }

    fn has_next(&mut self) -> Result<bool> {
        if self.closed {
            return Err(QueryError::Closed);
        }
        Ok(!self.items.is_empty())
    }

    fn next(&mut self) -> Result<Solution> {
        if self.closed {
            return Err(QueryError::Closed);
        }
        self.items.pop_front().ok_or(QueryError::Exhausted)
    }

    fn close(&mut self) {
        self.closed = true;
        self.items.clear();
    }

    fn ready_count(&self) -> usize {
        self.items.len()
    }

    fn is_distinct(&self) -> bool {
        self.distinct
    }
}

// ============================================================================
// EmptyResults
// ============================================================================

/// A stream with a schema but no solutions.
pub struct EmptyResults {
    vars: VarSet,
}

impl EmptyResults {
    /// Create an empty stream over the given variables
    pub fn new(vars: VarSet) -> Self {
        EmptyResults { vars }
    }
}

impl Results for EmptyResults {
    fn var_names(&self) -> &[Arc<str>] {
        &self.vars
    }

    fn has_next(&mut self) -> Result<bool> {
        Ok(false)
    }

    fn next(&mut self) -> Result<Solution> {
        Err(QueryError::Exhausted)
    }

    fn close(&mut self) {}

    fn is_distinct(&self) -> bool {
        true
    }
}

// ============================================================================
// TransformResults
// ============================================================================

/// Per-solution transforming stream (one upstream row, one downstream
/// row).
pub struct TransformResults {
    vars: VarSet,
    inner: BoxedResults,
    transform: Box<dyn FnMut(Solution) -> Solution + Send>,
}

impl TransformResults {
    /// Wrap `inner`, rewriting each solution with `transform`
    pub fn new(
        vars: VarSet,
        inner: BoxedResults,
        transform: impl FnMut(Solution) -> Solution + Send + 'static,
    ) -> Self {
        TransformResults {
            vars,
            inner,
            transform: Box::new(transform),
        }
    }
}

impl Results for TransformResults {
    fn var_names(&self) -> &[Arc<str>] {
        &self.vars
    }

    fn has_next(&mut self) -> Result<bool> {
        self.inner.has_next()
    }

    fn next(&mut self) -> Result<Solution> {
        let item = self.inner.next()?;
        Ok((self.transform)(item))
    }

    fn close(&mut self) {
        self.inner.close();
    }

    fn is_async(&self) -> bool {
        self.inner.is_async()
    }

    fn ready_count(&self) -> usize {
        self.inner.ready_count()
    }
}

// ============================================================================
// FlatMapResults
// ============================================================================

/// Flat-mapping stream: one upstream row expands to zero or more
/// downstream rows.
pub struct FlatMapResults {
    vars: VarSet,
    inner: BoxedResults,
    expand: Box<dyn FnMut(Solution) -> Vec<Solution> + Send>,
    pending: VecDeque<Solution>,
}

impl FlatMapResults {
    /// Wrap `inner`, expanding each solution with `expand`
    pub fn new(
        vars: VarSet,
        inner: BoxedResults,
        expand: impl FnMut(Solution) -> Vec<Solution> + Send + 'static,
    ) -> Self {
        FlatMapResults {
            vars,
            inner,
            expand: Box::new(expand),
            pending: VecDeque::new(),
        }
    }
}

impl Results for FlatMapResults {
    fn var_names(&self) -> &[Arc<str>] {
        &self.vars
    }

    fn has_next(&mut self) -> Result<bool> {
        while self.pending.is_empty() {
            if !self.inner.has_next()? {
                return Ok(false);
            }
            let item = self.inner.next()?;
            self.pending.extend((self.expand)(item));
        }
        Ok(true)
    }

    fn next(&mut self) -> Result<Solution> {
        if !self.has_next()? {
            return Err(QueryError::Exhausted);
        }
        // has_next guarantees a pending item
        self.pending.pop_front().ok_or(QueryError::Exhausted)
    }

    fn close(&mut self) {
        self.pending.clear();
        self.inner.close();
    }

    fn is_async(&self) -> bool {
        self.inner.is_async()
    }

    fn ready_count(&self) -> usize {
        self.pending.len()
    }
}

// ============================================================================
// ConcatResults
// ============================================================================

/// Sequential concatenation of streams (used for union plan nodes).
///
/// Each part is drained and closed in order; the variable set is the
/// caller-declared union of the parts' variables.
pub struct ConcatResults {
    vars: VarSet,
    parts: VecDeque<BoxedResults>,
}

impl ConcatResults {
    /// Concatenate `parts` under the declared union schema
    pub fn new(vars: VarSet, parts: impl IntoIterator<Item = BoxedResults>) -> Self {
        ConcatResults {
            vars,
            parts: parts.into_iter().collect(),
        }
    }
}

impl Results for ConcatResults {
    fn var_names(&self) -> &[Arc<str>] {
        &self.vars
    }

    fn has_next(&mut self) -> Result<bool> {
        while let Some(front) = self.parts.front_mut() {
            if front.has_next()? {
                return Ok(true);
            }
            if let Some(mut drained) = self.parts.pop_front() {
                drained.close();
            }
        }
        Ok(false)
    }

    fn next(&mut self) -> Result<Solution> {
        if !self.has_next()? {
            return Err(QueryError::Exhausted);
        }
        match self.parts.front_mut() {
            Some(front) => front.next(),
            None => Err(QueryError::Exhausted),
        }
    }

    fn close(&mut self) {
        for part in &mut self.parts {
            part.close();
        }
        self.parts.clear();
    }

    fn ready_count(&self) -> usize {
        self.parts.front().map_or(0, |p| p.ready_count())
    }
}

// ============================================================================
// DistinctResults
// ============================================================================

/// Deduplicating stream over the full row.
///
/// Streaming: tracks seen rows in a `HashSet`, so memory grows with the
/// number of unique rows. This is the downstream enforcement point for
/// DISTINCT; joins themselves never deduplicate.
pub struct DistinctResults {
    inner: BoxedResults,
    seen: HashSet<Solution>,
    lookahead: Option<Solution>,
}

impl DistinctResults {
    /// Wrap `inner`, emitting each unique row exactly once
    pub fn new(inner: BoxedResults) -> Self {
        DistinctResults {
            inner,
            seen: HashSet::new(),
            lookahead: None,
        }
    }

    /// Number of unique rows seen so far
    pub fn unique_count(&self) -> usize {
        self.seen.len()
    }
}

impl Results for DistinctResults {
    fn var_names(&self) -> &[Arc<str>] {
        self.inner.var_names()
    }

    fn has_next(&mut self) -> Result<bool> {
        if self.lookahead.is_some() {
            return Ok(true);
        }
        while self.inner.has_next()? {
            let item = self.inner.next()?;
            if self.seen.insert(item.clone()) {
                self.lookahead = Some(item);
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn next(&mut self) -> Result<Solution> {
        if !self.has_next()? {
            return Err(QueryError::Exhausted);
        }
        self.lookahead.take().ok_or(QueryError::Exhausted)
    }

    fn close(&mut self) {
        self.lookahead = None;
        self.inner.close();
    }

    fn is_async(&self) -> bool {
        self.inner.is_async()
    }

    fn is_distinct(&self) -> bool {
        true
    }
}
