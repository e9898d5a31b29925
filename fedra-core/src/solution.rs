//! Solutions - variable binding rows
//!
//! A [`Solution`] is one row of a query result: an immutable mapping from
//! variable name to [`Term`]. Solutions are produced by sources and
//! recombined by joins; they are never mutated after creation. The
//! backing map is shared, so cloning a solution (e.g. to route it through
//! a join output queue) does not copy the bindings.

use crate::term::Term;
use crate::VarSet;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// An immutable variable-binding row.
///
/// Equality and hashing are defined over the full mapping, which makes a
/// solution directly usable as a deduplication key.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Solution {
    bindings: Arc<BTreeMap<Arc<str>, Term>>,
}

impl Solution {
    /// The empty solution (no variables bound)
    pub fn empty() -> Self {
        Solution {
            bindings: Arc::new(BTreeMap::new()),
        }
    }

    /// Look up a binding by variable name
    pub fn get(&self, name: &str) -> Option<&Term> {
        self.bindings.get(name)
    }

    /// Whether the given variable is bound
    pub fn is_bound(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    /// Number of bound variables
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Whether no variables are bound
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Iterate over `(name, term)` pairs in name order
    pub fn iter(&self) -> impl Iterator<Item = (&Arc<str>, &Term)> {
        self.bindings.iter()
    }

    /// Variable names bound in this solution, in name order
    pub fn names(&self) -> impl Iterator<Item = &Arc<str>> {
        self.bindings.keys()
    }

    /// Merge two rows, preferring `self`'s value where both bind a name.
    ///
    /// Used by joins to rebuild an output row from a matched pair.
    pub fn merged(&self, other: &Solution) -> Solution {
        let mut map = (*self.bindings).clone();
        for (name, term) in other.iter() {
            map.entry(Arc::clone(name)).or_insert_with(|| term.clone());
        }
        Solution {
            bindings: Arc::new(map),
        }
    }

    /// Restrict this row to the given variables, dropping the rest.
    ///
    /// Variables absent from this row stay absent in the projection.
    pub fn project<S: AsRef<str>>(&self, vars: &[S]) -> Solution {
        let mut builder = SolutionBuilder::new();
        for var in vars {
            if let Some(term) = self.get(var.as_ref()) {
                builder = builder.bind(var.as_ref(), term.clone());
            }
        }
        builder.build()
    }

    /// Whether two rows agree on every variable bound in both.
    ///
    /// A variable absent on either side never conflicts; this is SPARQL
    /// solution compatibility, not join-key equality (see the hash table
    /// for the latter).
    pub fn compatible(&self, other: &Solution) -> bool {
        for (name, term) in self.iter() {
            if let Some(other_term) = other.get(name) {
                if term != other_term {
                    return false;
                }
            }
        }
        true
    }
}

impl fmt::Debug for Solution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (name, term) in self.iter() {
            map.entry(&format_args!("?{name}"), &format_args!("{term}"));
        }
        map.finish()
    }
}

impl<S: AsRef<str>> FromIterator<(S, Term)> for Solution {
    fn from_iter<I: IntoIterator<Item = (S, Term)>>(iter: I) -> Self {
        let mut builder = SolutionBuilder::new();
        for (name, term) in iter {
            builder = builder.bind(name, term);
        }
        builder.build()
    }
}

/// Builder for [`Solution`] rows.
///
/// The only way to construct a non-empty solution; once built, the row is
/// frozen.
#[derive(Default)]
pub struct SolutionBuilder {
    bindings: BTreeMap<Arc<str>, Term>,
}

impl SolutionBuilder {
    /// Start an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a variable. Re-binding a name replaces the previous value.
    pub fn bind(mut self, name: impl AsRef<str>, term: Term) -> Self {
        self.bindings.insert(Arc::from(name.as_ref()), term);
        self
    }

    /// Freeze into a [`Solution`]
    pub fn build(self) -> Solution {
        Solution {
            bindings: Arc::new(self.bindings),
        }
    }
}

/// A finite set of partial solutions restricted to a variable subset.
///
/// Used to rewrite a plan subtree with a SPARQL-VALUES-like clause for
/// batched bind joins: each row is projected onto `vars` at construction
/// so an endpoint only ever sees bindings for the declared variables.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValuesBinding {
    vars: VarSet,
    rows: Vec<Solution>,
}

impl ValuesBinding {
    /// Build a VALUES binding, projecting every row onto `vars`
    pub fn new(vars: VarSet, rows: impl IntoIterator<Item = Solution>) -> Self {
        let projected = rows
            .into_iter()
            .map(|row| row.project(&vars))
            .collect::<Vec<_>>();
        ValuesBinding {
            vars,
            rows: projected,
        }
    }

    /// The restricted variable set
    pub fn vars(&self) -> &VarSet {
        &self.vars
    }

    /// The projected rows
    pub fn rows(&self) -> &[Solution] {
        &self.rows
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the binding carries no rows
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::var_set;

    fn solution(pairs: &[(&str, &str)]) -> Solution {
        pairs
            .iter()
            .map(|(name, iri)| (*name, Term::iri(*iri)))
            .collect()
    }

    #[test]
    fn test_get_and_equality() {
        let a = solution(&[("x", "http://ex.org/1"), ("y", "http://ex.org/2")]);
        let b = solution(&[("y", "http://ex.org/2"), ("x", "http://ex.org/1")]);
        assert_eq!(a, b);
        assert_eq!(a.get("x"), Some(&Term::iri("http://ex.org/1")));
        assert_eq!(a.get("z"), None);
        assert_eq!(a.len(), 2);
    }

    #[test]
    fn test_merged_prefers_self() {
        let left = solution(&[("x", "http://ex.org/left"), ("y", "http://ex.org/y")]);
        let right = solution(&[("x", "http://ex.org/right"), ("z", "http://ex.org/z")]);
        let merged = left.merged(&right);
        assert_eq!(merged.get("x"), Some(&Term::iri("http://ex.org/left")));
        assert_eq!(merged.get("y"), Some(&Term::iri("http://ex.org/y")));
        assert_eq!(merged.get("z"), Some(&Term::iri("http://ex.org/z")));
        assert_eq!(merged.len(), 3);
    }

    #[test]
    fn test_project_drops_and_skips_absent() {
        let row = solution(&[("x", "http://ex.org/1"), ("y", "http://ex.org/2")]);
        let projected = row.project(&["x", "missing"]);
        assert_eq!(projected.len(), 1);
        assert!(projected.is_bound("x"));
        assert!(!projected.is_bound("y"));
        assert!(!projected.is_bound("missing"));
    }

    #[test]
    fn test_compatible() {
        let a = solution(&[("x", "http://ex.org/1")]);
        let b = solution(&[("x", "http://ex.org/1"), ("y", "http://ex.org/2")]);
        let c = solution(&[("x", "http://ex.org/other")]);
        assert!(a.compatible(&b));
        assert!(b.compatible(&a));
        assert!(!a.compatible(&c));
        // No shared vars -> compatible
        let d = solution(&[("z", "http://ex.org/3")]);
        assert!(a.compatible(&d));
    }

    #[test]
    fn test_values_binding_projects_rows() {
        let rows = vec![
            solution(&[("x", "http://ex.org/1"), ("extra", "http://ex.org/e")]),
            solution(&[("x", "http://ex.org/2")]),
        ];
        let values = ValuesBinding::new(var_set(["x"]), rows);
        assert_eq!(values.len(), 2);
        assert!(values.rows()[0].is_bound("x"));
        assert!(!values.rows()[0].is_bound("extra"));
    }
}
