// Public error surface
//
// Every Gildash entry point returns a tagged result from this closed set.
// Internal modules propagate anyhow::Error; the facade converts at the
// boundary.

use thiserror::Error;

/// Tagged error returned by every public Gildash operation.
#[derive(Debug, Error)]
pub enum GildashError {
    /// Input failed a precondition (non-absolute path, missing directory,
    /// operation not available in the current role).
    #[error("validation error: {0}")]
    Validation(String),

    /// The context has been closed; callers must re-open.
    #[error("context is closed")]
    Closed,

    /// Storage engine or repository failure.
    #[error("store error: {0}")]
    Store(String),

    /// Repository query or graph build failure.
    #[error("search error: {0}")]
    Search(String),

    /// Full or partial reindex failure.
    #[error("index error: {0}")]
    Index(String),

    /// Source parse failure surfaced by the parser collaborator.
    #[error("parse error: {0}")]
    Parse(String),

    /// Semantic collaborator initialization or query failure.
    #[error("semantic error: {0}")]
    Semantic(String),

    /// One or more errors collected during close. Resources are released
    /// regardless; `causes` preserves the order they occurred in.
    #[error("close completed with {} error(s)", .causes.len())]
    Close { causes: Vec<String> },
}

/// Discriminant of [`GildashError`], useful for matching in hosts and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Closed,
    Store,
    Search,
    Index,
    Parse,
    Semantic,
    Close,
}

impl GildashError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GildashError::Validation(_) => ErrorKind::Validation,
            GildashError::Closed => ErrorKind::Closed,
            GildashError::Store(_) => ErrorKind::Store,
            GildashError::Search(_) => ErrorKind::Search,
            GildashError::Index(_) => ErrorKind::Index,
            GildashError::Parse(_) => ErrorKind::Parse,
            GildashError::Semantic(_) => ErrorKind::Semantic,
            GildashError::Close { .. } => ErrorKind::Close,
        }
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        GildashError::Validation(msg.into())
    }

    pub(crate) fn store(err: impl std::fmt::Display) -> Self {
        GildashError::Store(err.to_string())
    }

    pub(crate) fn search(err: impl std::fmt::Display) -> Self {
        GildashError::Search(err.to_string())
    }

    pub(crate) fn index(err: impl std::fmt::Display) -> Self {
        GildashError::Index(err.to_string())
    }

    pub(crate) fn parse(err: impl std::fmt::Display) -> Self {
        GildashError::Parse(err.to_string())
    }

    pub(crate) fn semantic(err: impl std::fmt::Display) -> Self {
        GildashError::Semantic(err.to_string())
    }
}

/// Convenience alias used across the public API.
pub type GildashResult<T> = Result<T, GildashError>;
