//! Creation policies for the expensive, optional parts of a build.

/// Whether an optional artifact may be produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CreationMode {
    /// Always produce a fresh artifact.
    #[default]
    Create,
    /// Reuse an existing artifact if there is one; produce it otherwise.
    CreateIfAbsent,
    /// Never produce; reuse whatever already exists.
    DoNotCreate,
}

impl CreationMode {
    /// Whether the artifact may be produced when `exists` says whether a
    /// previous one is available.
    pub fn allows_creation(self, exists: bool) -> bool {
        match self {
            Self::Create => true,
            Self::CreateIfAbsent => !exists,
            Self::DoNotCreate => false,
        }
    }
}

/// Creation policy for generated documents and skeleton references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CreationPolicy {
    pub generated_documents: CreationMode,
    pub skeleton_references: CreationMode,
}

impl CreationPolicy {
    /// Produce everything.
    pub const CREATE: CreationPolicy = CreationPolicy {
        generated_documents: CreationMode::Create,
        skeleton_references: CreationMode::Create,
    };

    /// Produce only what is missing.
    pub const CREATE_IF_ABSENT: CreationPolicy = CreationPolicy {
        generated_documents: CreationMode::CreateIfAbsent,
        skeleton_references: CreationMode::CreateIfAbsent,
    };

    /// Produce nothing. Used by frozen snapshots.
    pub const DO_NOT_CREATE: CreationPolicy = CreationPolicy {
        generated_documents: CreationMode::DoNotCreate,
        skeleton_references: CreationMode::DoNotCreate,
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allows_creation() {
        assert!(CreationMode::Create.allows_creation(true));
        assert!(CreationMode::CreateIfAbsent.allows_creation(false));
        assert!(!CreationMode::CreateIfAbsent.allows_creation(true));
        assert!(!CreationMode::DoNotCreate.allows_creation(false));
        assert_eq!(CreationPolicy::default(), CreationPolicy::CREATE);
    }
}
