//! Join execution options
//!
//! This module contains [`JoinOptions`], shared by the join operators and
//! the strategy selector. It lives in a neutral location so every join
//! variant sees the same tunables.

use std::time::Duration;

/// Tunables for join execution.
///
/// Defaults match production behavior; tests shorten the timeouts.
#[derive(Debug, Clone)]
pub struct JoinOptions {
    /// Expected build-side size used to dimension the hash table of the
    /// sequential hash join
    pub build_table_size: usize,
    /// Target solutions per hash bucket
    pub bucket_capacity: usize,
    /// Maximum left rows accumulated into one VALUES-batched bind-join
    /// execution
    pub values_batch_size: usize,
    /// Capacity of the parallel join's shared output queue and of the
    /// async adapter's buffer (backpressure bound)
    pub output_queue_capacity: usize,
    /// Cardinality below which a reliably-estimated smaller side is
    /// cheap enough to materialize for a hash join
    pub hash_join_threshold: u64,
    /// Hard cardinality ceiling for the degenerate (semi-join-like)
    /// hash-join escape hatch
    pub degenerate_limit: u64,
    /// Bound on how long `close()` waits for background tasks
    pub close_timeout: Duration,
}

impl Default for JoinOptions {
    fn default() -> Self {
        JoinOptions {
            build_table_size: 512,
            bucket_capacity: 16,
            values_batch_size: 40,
            output_queue_capacity: 1024,
            hash_join_threshold: 1024,
            degenerate_limit: 2000,
            close_timeout: Duration::from_secs(30),
        }
    }
}

impl JoinOptions {
    /// Create options with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the VALUES batch size
    pub fn with_values_batch_size(mut self, size: usize) -> Self {
        self.values_batch_size = size;
        self
    }

    /// Set the output queue capacity
    pub fn with_output_queue_capacity(mut self, capacity: usize) -> Self {
        self.output_queue_capacity = capacity;
        self
    }

    /// Set the close timeout
    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Set the hash-join cardinality threshold
    pub fn with_hash_join_threshold(mut self, threshold: u64) -> Self {
        self.hash_join_threshold = threshold;
        self
    }
}
