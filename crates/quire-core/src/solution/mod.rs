//! The immutable snapshot model: solutions, projects and documents.
//!
//! Every record is immutable and reference counted. Changing anything
//! produces new records along the path to the root and shares the rest.

mod document;
mod graph;
mod project;
mod snapshot;

pub use document::{DocumentInfo, DocumentKind, DocumentRecord, TreeAndVersion};
pub use graph::ProjectDependencyGraph;
pub use project::{DocumentSet, ProjectInfo, ProjectRecord, ProjectReference};
pub use snapshot::Solution;

pub(crate) use document::TreeServices;
pub(crate) use project::ProjectParts;
