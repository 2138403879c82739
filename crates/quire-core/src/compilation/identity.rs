//! Reverse lookup from assemblies to the project that owns them.
//!
//! The table is global and keyed by assembly id. It holds weak handles only,
//! so it never keeps a compilation or image alive; entries whose target has
//! been dropped are pruned as new entries arrive. The first owner recorded
//! for an id wins.

use std::sync::{Arc, LazyLock, PoisonError, RwLock, Weak};

use rustc_hash::FxHashMap;

use super::{Compilation, CompilationInner, MetadataImage, MetadataReference};
use crate::ids::ProjectId;

enum WeakAssembly {
    Compilation(Weak<CompilationInner>),
    Image(Weak<MetadataImage>),
}

impl WeakAssembly {
    fn is_alive(&self) -> bool {
        match self {
            Self::Compilation(weak) => weak.strong_count() > 0,
            Self::Image(weak) => weak.strong_count() > 0,
        }
    }
}

struct OwnerEntry {
    assembly: WeakAssembly,
    project: ProjectId,
}

static OWNERS: LazyLock<RwLock<FxHashMap<u64, OwnerEntry>>> =
    LazyLock::new(|| RwLock::new(FxHashMap::default()));

/// Prune once the table has grown by this many entries since the last prune.
const PRUNE_INTERVAL: usize = 256;

static LAST_PRUNED_LEN: LazyLock<RwLock<usize>> = LazyLock::new(|| RwLock::new(0));

/// Global assembly → owning project table.
pub struct AssemblyOwners;

impl AssemblyOwners {
    fn record(id: u64, assembly: WeakAssembly, project: ProjectId) -> ProjectId {
        let mut owners = OWNERS.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = owners.get(&id) {
            return existing.project;
        }
        owners.insert(id, OwnerEntry { assembly, project });

        let mut last = LAST_PRUNED_LEN
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if owners.len() >= *last + PRUNE_INTERVAL {
            owners.retain(|_, entry| entry.assembly.is_alive());
            *last = owners.len();
        }
        project
    }

    /// Record `project` as the owner of `compilation`. Returns the owner that
    /// is on record afterwards, which is the first one ever recorded.
    pub fn record_compilation(compilation: &Compilation, project: ProjectId) -> ProjectId {
        Self::record(
            compilation.id(),
            WeakAssembly::Compilation(Arc::downgrade(&compilation.0)),
            project,
        )
    }

    pub fn record_image(image: &Arc<MetadataImage>, project: ProjectId) -> ProjectId {
        Self::record(image.id(), WeakAssembly::Image(Arc::downgrade(image)), project)
    }

    fn lookup(id: u64) -> Option<ProjectId> {
        let owners = OWNERS.read().unwrap_or_else(PoisonError::into_inner);
        owners
            .get(&id)
            .filter(|entry| entry.assembly.is_alive())
            .map(|entry| entry.project)
    }

    pub fn owner_of_compilation(compilation: &Compilation) -> Option<ProjectId> {
        Self::lookup(compilation.id())
    }

    pub fn owner_of_image(image: &MetadataImage) -> Option<ProjectId> {
        Self::lookup(image.id())
    }

    /// Owner of the assembly a reference points at. File references have no
    /// owning project.
    pub fn owner_of_reference(reference: &MetadataReference) -> Option<ProjectId> {
        match reference {
            MetadataReference::Compilation { compilation, .. } => {
                Self::owner_of_compilation(compilation)
            }
            MetadataReference::Skeleton { image, .. } => Self::owner_of_image(image),
            MetadataReference::File { .. } => None,
        }
    }
}

/// Assemblies kept alive by a final tracker state so that reverse lookups of
/// its references keep working for as long as the state is reachable.
#[derive(Debug, Clone, Default)]
pub struct RootedAssemblies {
    compilations: Vec<Compilation>,
    images: Vec<Arc<MetadataImage>>,
}

impl RootedAssemblies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Root the compilation and record its owner.
    pub fn root_compilation(&mut self, compilation: &Compilation, owner: ProjectId) {
        AssemblyOwners::record_compilation(compilation, owner);
        self.compilations.push(compilation.clone());
    }

    pub fn root_image(&mut self, image: &Arc<MetadataImage>, owner: ProjectId) {
        AssemblyOwners::record_image(image, owner);
        self.images.push(image.clone());
    }

    pub fn len(&self) -> usize {
        self.compilations.len() + self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains_compilation(&self, compilation: &Compilation) -> bool {
        self.compilations.iter().any(|c| c.ptr_eq(compilation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compilation::CompilationOptions;
    use crate::ids::LanguageId;

    fn compilation() -> Compilation {
        Compilation::new("lib", LanguageId::new("rust"), CompilationOptions::default())
    }

    #[test]
    fn test_first_writer_wins() {
        let c = compilation();
        let first = ProjectId::new();
        let second = ProjectId::new();

        assert_eq!(AssemblyOwners::record_compilation(&c, first), first);
        assert_eq!(AssemblyOwners::record_compilation(&c, second), first);
        assert_eq!(AssemblyOwners::owner_of_compilation(&c), Some(first));
    }

    #[test]
    fn test_dead_assemblies_are_not_found() {
        let image = Arc::new(MetadataImage::new("gone", Vec::new()));
        let project = ProjectId::new();
        AssemblyOwners::record_image(&image, project);
        let id = image.id();
        drop(image);
        assert_eq!(AssemblyOwners::lookup(id), None);
    }

    #[test]
    fn test_rooted_assemblies_keep_lookups_alive() {
        let project = ProjectId::new();
        let mut rooted = RootedAssemblies::new();
        let id = {
            let c = compilation();
            rooted.root_compilation(&c, project);
            c.id()
        };
        assert_eq!(AssemblyOwners::lookup(id), Some(project));
        assert_eq!(rooted.len(), 1);
    }
}
