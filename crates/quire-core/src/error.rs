//! Error types for quire-core.

use std::path::PathBuf;

use thiserror::Error;

use crate::ids::{DocumentId, ProjectId};

/// Result type for quire-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in quire-core.
///
/// The type is `Clone` because in-flight computations are shared between
/// waiters, and every waiter receives its own copy of the outcome.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The operation was cancelled by its caller.
    #[error("operation cancelled")]
    Cancelled,

    /// Project not found in the snapshot.
    #[error("project not found: {0}")]
    ProjectNotFound(ProjectId),

    /// Document not found in the snapshot.
    #[error("document not found: {0}")]
    DocumentNotFound(DocumentId),

    /// A project with the same id already exists.
    #[error("project already exists: {0}")]
    DuplicateProject(ProjectId),

    /// A document with the same id already exists.
    #[error("document already exists: {0}")]
    DuplicateDocument(DocumentId),

    /// Adding a project reference would create a cycle.
    #[error("cyclic project reference: {0}")]
    CyclicReference(String),

    /// No language service is registered for the language.
    #[error("no language service registered for '{0}'")]
    UnknownLanguage(String),

    /// Failed to load document text.
    #[error("failed to load text{}: {message}", display_source(path))]
    TextLoad {
        path: Option<PathBuf>,
        message: String,
    },

    /// The language service failed to produce a tree.
    #[error("parse error: {0}")]
    Parse(String),

    /// A generator driver failed.
    #[error("generator failure: {0}")]
    Generator(String),

    /// Building a skeleton image failed.
    #[error("skeleton build failed: {0}")]
    Skeleton(String),

    /// An integrity invariant was violated.
    #[error("integrity fault: {0}")]
    Integrity(String),

    /// An unexpected failure terminated a build attempt.
    #[error("unreachable state reached: {0}")]
    Unreachable(String),

    /// Invalid engine configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Invalid operation (e.g., removing a reference that does not exist).
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

impl Error {
    /// Returns true if this error represents cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

fn display_source(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map(|p| format!(" from {}", p.display()))
        .unwrap_or_default()
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Config(e.to_string())
    }
}
