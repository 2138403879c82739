//! Identifiers, version stamps and checksums.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use uuid::Uuid;
use xxhash_rust::xxh3::{Xxh3, xxh3_128};

/// Unique identifier for a project within a workspace.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub struct ProjectId(Uuid);

impl ProjectId {
    /// Create a fresh, random project id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ProjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "project_{}", &self.0.simple().to_string()[..8])
    }
}

/// Unique identifier for a document. Always scoped to its owning project.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub struct DocumentId {
    project: ProjectId,
    id: Uuid,
}

impl DocumentId {
    /// Create a fresh, random document id in `project`.
    pub fn new(project: ProjectId) -> Self {
        Self {
            project,
            id: Uuid::new_v4(),
        }
    }

    /// Create a deterministic document id from a stable name.
    ///
    /// Generated documents use this so the same (generator, hint name) pair
    /// maps to the same id across generator runs.
    pub fn deterministic(project: ProjectId, name: &str) -> Self {
        Self {
            project,
            id: Uuid::new_v5(&project.as_uuid(), name.as_bytes()),
        }
    }

    pub fn project_id(&self) -> ProjectId {
        self.project
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/doc_{}", self.project, &self.id.simple().to_string()[..8])
    }
}

/// Language marker used to decide between compilation and skeleton references.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LanguageId(Arc<str>);

impl LanguageId {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LanguageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LanguageId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

static NEXT_VERSION: AtomicU64 = AtomicU64::new(1);

/// Monotonic version stamp.
///
/// Every call to [`VersionStamp::new`] returns a stamp strictly newer than all
/// stamps created before it in this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct VersionStamp(u64);

impl VersionStamp {
    /// The stamp older than every other stamp.
    pub const EMPTY: VersionStamp = VersionStamp(0);

    pub fn new() -> Self {
        Self(NEXT_VERSION.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns whichever of the two stamps is newer.
    pub fn newer(self, other: VersionStamp) -> VersionStamp {
        self.max(other)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for VersionStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// 128-bit content checksum (xxh3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Checksum(u128);

impl Checksum {
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self(xxh3_128(bytes))
    }

    pub fn of_str(s: &str) -> Self {
        Self::of_bytes(s.as_bytes())
    }

    /// Combine checksums in order. Order matters.
    pub fn combine(parts: impl IntoIterator<Item = Checksum>) -> Self {
        let mut hasher = Xxh3::new();
        for part in parts {
            hasher.update(&part.0.to_le_bytes());
        }
        Self(hasher.digest128())
    }

    pub fn as_u128(&self) -> u128 {
        self.0
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_stamps_are_monotonic() {
        let a = VersionStamp::new();
        let b = VersionStamp::new();
        assert!(b > a);
        assert_eq!(a.newer(b), b);
        assert_eq!(b.newer(a), b);
        assert!(VersionStamp::EMPTY < a);
    }

    #[test]
    fn test_deterministic_document_ids() {
        let project = ProjectId::new();
        let a = DocumentId::deterministic(project, "gen/Hint.g.rs");
        let b = DocumentId::deterministic(project, "gen/Hint.g.rs");
        let c = DocumentId::deterministic(project, "gen/Other.g.rs");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.project_id(), project);
    }

    #[test]
    fn test_checksum_combine_is_order_sensitive() {
        let a = Checksum::of_str("a");
        let b = Checksum::of_str("b");
        assert_ne!(Checksum::combine([a, b]), Checksum::combine([b, a]));
        assert_eq!(Checksum::combine([a, b]), Checksum::combine([a, b]));
    }
}
