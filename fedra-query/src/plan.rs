//! Plan node boundary
//!
//! The planner (out of scope here) produces a tree of plan nodes; join
//! execution only needs to inspect node shape, variables, and modifiers,
//! and to apply two opaque rewrites: binding a node with one concrete
//! solution, and attaching a VALUES-like batch binding. Actually running
//! a subtree is the [`PlanExecutor`]'s job.

use crate::cardinality::CardinalityEstimate;
use crate::endpoint::{Capability, Endpoint};
use crate::error::Result;
use crate::results::BoxedResults;
use fedra_core::{Solution, ValuesBinding, VarSet};
use rustc_hash::FxHashSet;
use std::fmt;
use std::sync::Arc;

/// Planner-assigned modifiers and estimates on a plan node.
#[derive(Debug, Clone)]
pub struct NodeMeta {
    /// The node carries OPTIONAL semantics relative to its join partner
    pub optional: bool,
    /// Variables that MUST be bound by a partner before this node can
    /// execute (e.g. an API source that needs a lookup key)
    pub required_inputs: Vec<Arc<str>>,
    /// Variables this node can use as inputs when available, but does
    /// not require
    pub free_inputs: Vec<Arc<str>>,
    /// Cardinality estimate from the source-description layer
    pub cardinality: CardinalityEstimate,
}

impl Default for NodeMeta {
    fn default() -> Self {
        NodeMeta {
            optional: false,
            required_inputs: Vec::new(),
            free_inputs: Vec::new(),
            cardinality: CardinalityEstimate::unsupported(),
        }
    }
}

impl NodeMeta {
    /// Whether the node declares any input variables at all
    pub fn has_inputs(&self) -> bool {
        !self.required_inputs.is_empty() || !self.free_inputs.is_empty()
    }
}

/// A single remote query leaf.
#[derive(Clone)]
pub struct QueryNode {
    /// The endpoint this query runs against
    pub endpoint: Arc<dyn Endpoint>,
    /// Opaque query fragment, interpreted only by the executor
    pub pattern: Arc<str>,
    /// Variables the query can bind
    pub vars: VarSet,
}

impl fmt::Debug for QueryNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryNode")
            .field("endpoint", &self.endpoint.iri())
            .field("pattern", &self.pattern)
            .field("vars", &self.vars)
            .finish()
    }
}

/// A binary join node as produced by the planner.
#[derive(Debug, Clone)]
pub struct JoinNode {
    /// Left operand
    pub left: PlanNode,
    /// Right operand
    pub right: PlanNode,
    /// Shared variable names to equate across the operands
    pub join_vars: VarSet,
    /// Variables projected into the joined output
    pub result_vars: VarSet,
}

/// Structural shape of a plan node.
#[derive(Debug, Clone)]
pub enum PlanKind {
    /// Remote query leaf
    Query(QueryNode),
    /// Union of subtrees
    Union(Vec<PlanNode>),
    /// Binary join
    Join(Box<JoinNode>),
    /// Subtree with one concrete binding substituted in
    Bound {
        /// The rewritten subtree
        inner: Box<PlanNode>,
        /// The substituted binding (restricted to the subtree's inputs)
        binding: Solution,
    },
    /// Subtree with a VALUES-like batch binding attached
    Values {
        /// The rewritten subtree
        inner: Box<PlanNode>,
        /// The attached batch binding
        binding: ValuesBinding,
    },
}

/// A plan node: shape plus planner-assigned modifiers.
#[derive(Debug, Clone)]
pub struct PlanNode {
    /// Planner modifiers and estimates
    pub meta: NodeMeta,
    /// Structural shape
    pub kind: PlanKind,
}

impl PlanNode {
    /// Wrap a query leaf with default modifiers
    pub fn query(node: QueryNode) -> Self {
        PlanNode {
            meta: NodeMeta::default(),
            kind: PlanKind::Query(node),
        }
    }

    /// Wrap a union of subtrees with default modifiers
    pub fn union(branches: Vec<PlanNode>) -> Self {
        PlanNode {
            meta: NodeMeta::default(),
            kind: PlanKind::Union(branches),
        }
    }

    /// Wrap a join node with default modifiers
    pub fn join(node: JoinNode) -> Self {
        PlanNode {
            meta: NodeMeta::default(),
            kind: PlanKind::Join(Box::new(node)),
        }
    }

    /// Replace the modifiers
    pub fn with_meta(mut self, meta: NodeMeta) -> Self {
        self.meta = meta;
        self
    }

    /// Public variables of the subtree (the variables it can bind).
    pub fn vars(&self) -> VarSet {
        match &self.kind {
            PlanKind::Query(q) => Arc::clone(&q.vars),
            PlanKind::Union(branches) => {
                let mut seen = FxHashSet::default();
                let mut out: Vec<Arc<str>> = Vec::new();
                for branch in branches {
                    for var in branch.vars().iter() {
                        if seen.insert(Arc::clone(var)) {
                            out.push(Arc::clone(var));
                        }
                    }
                }
                out.into()
            }
            PlanKind::Join(join) => Arc::clone(&join.result_vars),
            PlanKind::Bound { inner, .. } => inner.vars(),
            PlanKind::Values { inner, binding } => {
                let mut seen: FxHashSet<Arc<str>> = inner.vars().iter().cloned().collect();
                let mut out: Vec<Arc<str>> = inner.vars().to_vec();
                for var in binding.vars().iter() {
                    if seen.insert(Arc::clone(var)) {
                        out.push(Arc::clone(var));
                    }
                }
                out.into()
            }
        }
    }

    /// Rewrite this subtree with one concrete binding.
    ///
    /// The binding is restricted to variables the subtree actually uses
    /// (its public variables and declared inputs); required inputs
    /// satisfied by the binding are dropped from the rewritten node's
    /// modifiers. The rewrite itself is opaque - only the executor
    /// interprets it.
    pub fn create_bound(&self, binding: &Solution) -> PlanNode {
        let mut relevant: Vec<Arc<str>> = self.vars().to_vec();
        relevant.extend(self.meta.required_inputs.iter().cloned());
        relevant.extend(self.meta.free_inputs.iter().cloned());
        let restricted = binding.project(&relevant);

        let mut meta = self.meta.clone();
        meta.required_inputs
            .retain(|var| !restricted.is_bound(var));
        meta.free_inputs.retain(|var| !restricted.is_bound(var));

        PlanNode {
            meta,
            kind: PlanKind::Bound {
                inner: Box::new(self.clone()),
                binding: restricted,
            },
        }
    }

    /// Rewrite this subtree with a VALUES-like batch binding.
    pub fn with_values(&self, binding: ValuesBinding) -> PlanNode {
        let mut meta = self.meta.clone();
        meta.required_inputs
            .retain(|var| !binding.vars().iter().any(|v| v.as_ref() == var.as_ref()));

        PlanNode {
            meta,
            kind: PlanKind::Values {
                inner: Box::new(self.clone()),
                binding,
            },
        }
    }

    /// Whether this subtree is eligible for VALUES-batched bind joins:
    /// a bare query node, or a union whose branches are all bare query
    /// nodes, with every endpoint advertising the VALUES capability.
    pub fn supports_values_batching(&self) -> bool {
        match &self.kind {
            PlanKind::Query(q) => q.endpoint.has_capability(Capability::Values),
            PlanKind::Union(branches) => {
                !branches.is_empty()
                    && branches.iter().all(|branch| {
                        matches!(
                            &branch.kind,
                            PlanKind::Query(q) if q.endpoint.has_capability(Capability::Values)
                        )
                    })
            }
            _ => false,
        }
    }
}

/// Executes arbitrary plan subtrees and returns their solution streams.
///
/// The planner's physical execution layer implements this; joins use it
/// to materialize children and to run rewritten bind-join subtrees.
pub trait PlanExecutor: Send + Sync {
    /// Execute a plan subtree, producing its stream of solutions
    fn execute(&self, node: &PlanNode) -> Result<BoxedResults>;
}
