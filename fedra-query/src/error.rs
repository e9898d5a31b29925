//! Error types for join execution

use thiserror::Error;

/// Join execution errors
#[derive(Error, Debug)]
pub enum QueryError {
    /// `next()` was called when `has_next()` would return false
    #[error("results exhausted - next() called with no remaining solutions")]
    Exhausted,

    /// The stream was pulled after `close()`
    #[error("results closed - stream can no longer be pulled")]
    Closed,

    /// Static join precondition violated (missing variables,
    /// both-sides-required-inputs). Raised at construction, never retried.
    #[error("invalid join: {0}")]
    InvalidJoin(String),

    /// A `PlanExecutor` call failed while executing a (possibly
    /// rewritten) plan subtree.
    #[error("remote execution failed: {0}")]
    RemoteExecution(String),

    /// A background build/probe task failed. Surfaced on the next
    /// `has_next()`/`next()` call of the owning join.
    #[error("background join task failed: {0}")]
    BackgroundTask(String),

    /// Internal invariant violation (should not happen in normal
    /// operation)
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for join execution
pub type Result<T> = std::result::Result<T, QueryError>;

/// Per-batch failure in a bind join.
///
/// The bind-join loop matches on this: a failed batch execution is
/// logged and contributes zero rows (iteration continues with the next
/// batch), while a failure of the left operand is terminal.
#[derive(Error, Debug)]
pub enum BatchError {
    /// The left (binding source) operand failed - terminal.
    #[error("bind-join left operand failed: {0}")]
    Left(#[source] QueryError),

    /// Executing the rewritten right subtree failed - this batch
    /// produces nothing, the join continues.
    #[error("bind-join batch execution failed: {0}")]
    Execution(#[source] QueryError),
}
