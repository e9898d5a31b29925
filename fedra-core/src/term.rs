//! RDF term values
//!
//! A [`Term`] is an opaque, immutable value bound to a variable in a
//! solution: an IRI, a literal (optionally typed or language-tagged), a
//! blank node, or a variable placeholder used inside plan patterns.
//! Equality and hashing are value-based; all string payloads are
//! `Arc<str>`-backed so clones are cheap.

use std::fmt;
use std::sync::Arc;

/// An immutable RDF term.
///
/// # Invariants
///
/// - `Literal` carries at most one of `datatype`/`lang` (a language-tagged
///   string is implicitly `rdf:langString`; constructors enforce this)
/// - `Variable` only appears inside plan patterns, never in solutions
///   produced by sources
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Term {
    /// IRI reference
    Iri(Arc<str>),
    /// Literal value with optional datatype IRI or language tag
    Literal {
        /// Lexical form
        lexical: Arc<str>,
        /// Datatype IRI (None for plain/lang-tagged literals)
        datatype: Option<Arc<str>>,
        /// Language tag (None unless lang-tagged)
        lang: Option<Arc<str>>,
    },
    /// Blank node with a scoped label
    BlankNode(Arc<str>),
    /// Variable placeholder (plan patterns only)
    Variable(Arc<str>),
}

impl Term {
    /// Create an IRI term
    pub fn iri(iri: impl AsRef<str>) -> Self {
        Term::Iri(Arc::from(iri.as_ref()))
    }

    /// Create a plain literal
    pub fn literal(lexical: impl AsRef<str>) -> Self {
        Term::Literal {
            lexical: Arc::from(lexical.as_ref()),
            datatype: None,
            lang: None,
        }
    }

    /// Create a typed literal
    pub fn typed(lexical: impl AsRef<str>, datatype: impl AsRef<str>) -> Self {
        Term::Literal {
            lexical: Arc::from(lexical.as_ref()),
            datatype: Some(Arc::from(datatype.as_ref())),
            lang: None,
        }
    }

    /// Create a language-tagged literal
    pub fn lang(lexical: impl AsRef<str>, lang: impl AsRef<str>) -> Self {
        Term::Literal {
            lexical: Arc::from(lexical.as_ref()),
            datatype: None,
            lang: Some(Arc::from(lang.as_ref())),
        }
    }

    /// Create a blank node term
    pub fn bnode(label: impl AsRef<str>) -> Self {
        Term::BlankNode(Arc::from(label.as_ref()))
    }

    /// Create a variable placeholder
    pub fn var(name: impl AsRef<str>) -> Self {
        Term::Variable(Arc::from(name.as_ref()))
    }

    /// Whether this term is a variable placeholder
    pub fn is_variable(&self) -> bool {
        matches!(self, Term::Variable(_))
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Iri(iri) => write!(f, "<{iri}>"),
            Term::Literal {
                lexical,
                datatype,
                lang,
            } => {
                write!(f, "\"{lexical}\"")?;
                if let Some(dt) = datatype {
                    write!(f, "^^<{dt}>")?;
                }
                if let Some(lang) = lang {
                    write!(f, "@{lang}")?;
                }
                Ok(())
            }
            Term::BlankNode(label) => write!(f, "_:{label}"),
            Term::Variable(name) => write!(f, "?{name}"),
        }
    }
}
