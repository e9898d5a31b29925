//! Solution hash table for join execution
//!
//! A fixed-bucket-count array-of-lists keyed by the join variables of
//! each stored [`Solution`]. The join key is never stored separately:
//! the bucket index is re-derived from the solution's join-variable
//! terms at both insert and probe time, so memory cost stays
//! O(#solutions) with no per-key overhead.
//!
//! Lifecycle: created per join invocation, populated during a build
//! phase, probed read-only afterward, and `clear()`-able for low-cost
//! reuse across bind-join batches (bucket allocations are retained).

use fedra_core::{Solution, VarSet};
use std::hash::{Hash, Hasher};

/// Minimum bucket count for non-degenerate tables
const MIN_BUCKETS: usize = 64;

/// Default target solutions per bucket
const DEFAULT_BUCKET_CAPACITY: usize = 16;

/// Polynomial hash seed
const HASH_SEED: i64 = 17;

/// Polynomial hash multiplier
const HASH_MULTIPLIER: i64 = 37;

/// Sentinel mixed in for a join variable absent from a solution.
/// Chosen as a fixed odd constant so an absent variable hashes unlike
/// any realistic term hash.
const ABSENT_HASH: i64 = 0x5851_f42d_4c95_7f2d_u64 as i64;

/// Handle to one stored row: bucket index plus offset within the
/// bucket. Lets a caller mark the row as fetched later without
/// re-hashing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryHandle {
    bucket: usize,
    offset: usize,
}

/// Fixed-bucket hash table over solutions, keyed by join variables.
pub struct SolutionHashTable {
    join_vars: VarSet,
    buckets: Vec<Vec<Solution>>,
    /// Per-bucket fetched bitsets (64-bit words), allocated only while
    /// recording is enabled
    fetched: Vec<Vec<u64>>,
    recording: bool,
    len: usize,
}

impl SolutionHashTable {
    /// Create a table sized for `expected_size` solutions with the
    /// default bucket capacity.
    pub fn new(join_vars: VarSet, expected_size: usize) -> Self {
        Self::with_bucket_capacity(join_vars, expected_size, DEFAULT_BUCKET_CAPACITY)
    }

    /// Create a table with an explicit target bucket capacity.
    ///
    /// With no join variables (degenerate cartesian case) a single
    /// bucket holds everything: every pair of rows matches, so a probe
    /// returns the whole bucket.
    pub fn with_bucket_capacity(
        join_vars: VarSet,
        expected_size: usize,
        bucket_capacity: usize,
    ) -> Self {
        let (bucket_count, per_bucket) = if join_vars.is_empty() {
            (1, expected_size)
        } else {
            let buckets = expected_size.div_ceil(bucket_capacity.max(1)).max(MIN_BUCKETS);
            (buckets, bucket_capacity)
        };

        SolutionHashTable {
            join_vars,
            buckets: (0..bucket_count)
                .map(|_| Vec::with_capacity(per_bucket))
                .collect(),
            fetched: Vec::new(),
            recording: false,
            len: 0,
        }
    }

    /// The join variables this table keys on
    pub fn join_vars(&self) -> &VarSet {
        &self.join_vars
    }

    /// Number of stored solutions
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of buckets (sizing diagnostics)
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Enable or disable fetched-row recording.
    ///
    /// While enabled, `get_all` marks every matching row; consumers use
    /// the marks for anti/semi-join bookkeeping (e.g. emitting
    /// unmatched optional rows).
    pub fn record_fetched(&mut self, enable: bool) {
        self.recording = enable;
        if enable && self.fetched.len() != self.buckets.len() {
            self.fetched = self
                .buckets
                .iter()
                .map(|bucket| vec![0u64; bucket.len().div_ceil(64)])
                .collect();
        }
    }

    /// Bucket index for a solution's join key.
    ///
    /// Polynomial hash over the per-variable term hashes in join-var
    /// declaration order; an absent variable contributes a fixed
    /// sentinel.
    fn bucket_index(&self, solution: &Solution) -> usize {
        if self.buckets.len() == 1 {
            return 0;
        }
        let mut hash = HASH_SEED;
        for var in self.join_vars.iter() {
            let component = match solution.get(var) {
                Some(term) => term_hash(term),
                None => ABSENT_HASH,
            };
            hash = hash.wrapping_mul(HASH_MULTIPLIER).wrapping_add(component);
        }
        (hash.unsigned_abs() as usize) % self.buckets.len()
    }

    /// Append a solution, returning its handle.
    pub fn add(&mut self, solution: Solution) -> EntryHandle {
        let bucket = self.bucket_index(&solution);
        let offset = self.buckets[bucket].len();
        self.buckets[bucket].push(solution);
        if self.recording {
            let words = &mut self.fetched[bucket];
            if offset / 64 >= words.len() {
                words.push(0);
            }
        }
        self.len += 1;
        EntryHandle { bucket, offset }
    }

    /// All stored solutions whose join key equals `reference`'s.
    ///
    /// Two rows match when, for every join variable, both bind equal
    /// terms or both leave it absent. Returned solutions are cheap
    /// clones of the stored rows. While recording is enabled, every
    /// match is marked fetched.
    pub fn get_all(&mut self, reference: &Solution) -> Vec<Solution> {
        let bucket = self.bucket_index(reference);
        let mut matches = Vec::new();
        for (offset, candidate) in self.buckets[bucket].iter().enumerate() {
            if self.join_key_matches(reference, candidate) {
                matches.push(candidate.clone());
                if self.recording {
                    mark_bit(&mut self.fetched[bucket], offset);
                }
            }
        }
        matches
    }

    /// Mark a row fetched by handle (no re-hash). No-op unless
    /// recording is enabled.
    pub fn mark_fetched(&mut self, handle: &EntryHandle) {
        if self.recording {
            mark_bit(&mut self.fetched[handle.bucket], handle.offset);
        }
    }

    /// Whether the row behind `handle` has been fetched
    pub fn is_fetched(&self, handle: &EntryHandle) -> bool {
        self.fetched
            .get(handle.bucket)
            .map(|words| words.get(handle.offset / 64).copied().unwrap_or(0))
            .is_some_and(|word| word & (1u64 << (handle.offset % 64)) != 0)
    }

    /// All stored solutions never returned by `get_all` nor marked via
    /// handle. Only meaningful while recording is enabled.
    pub fn unfetched(&self) -> Vec<Solution> {
        let mut out = Vec::new();
        for (bucket_idx, bucket) in self.buckets.iter().enumerate() {
            for (offset, solution) in bucket.iter().enumerate() {
                let fetched = self
                    .fetched
                    .get(bucket_idx)
                    .and_then(|words| words.get(offset / 64))
                    .is_some_and(|word| word & (1u64 << (offset % 64)) != 0);
                if !fetched {
                    out.push(solution.clone());
                }
            }
        }
        out
    }

    /// Empty every bucket (and fetched bitset) without releasing the
    /// bucket allocations, for reuse across probe batches.
    pub fn clear(&mut self) {
        for bucket in &mut self.buckets {
            bucket.clear();
        }
        for words in &mut self.fetched {
            words.clear();
        }
        self.len = 0;
    }

    /// Join-key equality: pairwise equal terms on every join variable,
    /// absent matching absent.
    fn join_key_matches(&self, a: &Solution, b: &Solution) -> bool {
        for var in self.join_vars.iter() {
            match (a.get(var), b.get(var)) {
                (None, None) => {}
                (Some(x), Some(y)) if x == y => {}
                _ => return false,
            }
        }
        true
    }
}

fn mark_bit(words: &mut Vec<u64>, offset: usize) {
    let word = offset / 64;
    if word >= words.len() {
        words.resize(word + 1, 0);
    }
    words[word] |= 1u64 << (offset % 64);
}

fn term_hash(term: &fedra_core::Term) -> i64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    term.hash(&mut hasher);
    hasher.finish() as i64
}
