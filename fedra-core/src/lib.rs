//! # Fedra Core
//!
//! Data model for the fedra federated query engine.
//!
//! This crate provides the value types every layer shares:
//! - [`Term`]: an opaque, immutable RDF term
//! - [`Solution`]: one immutable variable-binding row
//! - [`ValuesBinding`]: a finite batch of partial solutions for
//!   VALUES-style subtree rewriting
//!
//! ## Design Principles
//!
//! 1. **Value semantics**: terms and solutions are immutable and compare
//!    by value; clones are O(1) via shared backing storage
//! 2. **Dependency-free**: pure data model, usable from any layer
//! 3. **No I/O**: streaming, joins, and remote execution live in
//!    `fedra-query`

pub mod solution;
pub mod term;

pub use solution::{Solution, SolutionBuilder, ValuesBinding};
pub use term::Term;

use std::sync::Arc;

/// Variable set type used for stream schemas and plan node variables.
///
/// Fixed at construction time and shared between a stream and its
/// consumers without copying.
pub type VarSet = Arc<[Arc<str>]>;

/// Build a [`VarSet`] from anything yielding string-likes.
pub fn var_set<I, S>(names: I) -> VarSet
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    names
        .into_iter()
        .map(|s| Arc::from(s.as_ref()))
        .collect::<Vec<Arc<str>>>()
        .into()
}
