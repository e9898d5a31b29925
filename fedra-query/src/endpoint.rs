//! Endpoint capability descriptions
//!
//! A federated query talks to heterogeneous sources; what a join can do
//! with a source depends on what the source's endpoint supports. This
//! layer only inspects capabilities - the actual protocol handling lives
//! behind the `PlanExecutor` seam.

use std::fmt;
use std::sync::Arc;

/// A capability an endpoint may advertise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// The endpoint accepts SPARQL-VALUES-like inline data blocks,
    /// enabling batched bind joins
    Values,
    /// The endpoint answers ASK-form queries
    AskQueries,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Values => write!(f, "VALUES"),
            Capability::AskQueries => write!(f, "ASK"),
        }
    }
}

/// A remote source endpoint, described at the capability level.
///
/// Implementations are provided by the source-description layer; tests
/// use [`StaticEndpoint`].
pub trait Endpoint: Send + Sync {
    /// The endpoint IRI (diagnostic identity)
    fn iri(&self) -> &str;

    /// Whether the endpoint advertises the given capability
    fn has_capability(&self, capability: Capability) -> bool;
}

/// Endpoint with a fixed capability set.
pub struct StaticEndpoint {
    iri: Arc<str>,
    capabilities: Vec<Capability>,
}

impl StaticEndpoint {
    /// Create an endpoint advertising the given capabilities
    pub fn new(iri: impl AsRef<str>, capabilities: impl IntoIterator<Item = Capability>) -> Self {
        StaticEndpoint {
            iri: Arc::from(iri.as_ref()),
            capabilities: capabilities.into_iter().collect(),
        }
    }
}

impl Endpoint for StaticEndpoint {
    fn iri(&self) -> &str {
        &self.iri
    }

    fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}
