//! Skeleton (metadata-only) references for cross-language project references.
//!
//! Each tracker owns a cache for the skeleton of its own project. Entries are
//! keyed by the project's dependent semantic version, so a body-only edit
//! keeps reusing the same image. References are created per
//! [`MetadataReferenceProperties`] on top of the shared image.

use std::sync::{Arc, Mutex, PoisonError};

use rustc_hash::FxHashMap;
use tokio_util::sync::CancellationToken;

use super::CompilationTracker;
use crate::compilation::{
    Compilation, MetadataImage, MetadataReference, MetadataReferenceProperties,
};
use crate::error::{Error, Result};
use crate::ids::VersionStamp;
use crate::policy::CreationMode;
use crate::solution::Solution;
use crate::syntax::DeclarationKind;

/// Builds metadata-only images from compilations.
pub trait SkeletonBuilder: Send + Sync {
    fn build_skeleton(
        &self,
        compilation: &Compilation,
        cancel: &CancellationToken,
    ) -> Result<MetadataImage>;
}

/// Default builder: an image of every public-facing declaration.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeclarationSkeletonBuilder;

impl SkeletonBuilder for DeclarationSkeletonBuilder {
    fn build_skeleton(
        &self,
        compilation: &Compilation,
        cancel: &CancellationToken,
    ) -> Result<MetadataImage> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let declarations = compilation
            .declarations()
            .filter(|d| !matches!(d.kind, DeclarationKind::Use | DeclarationKind::Other))
            .cloned()
            .collect();
        Ok(MetadataImage::new(compilation.assembly_name(), declarations))
    }
}

#[derive(Clone)]
struct SkeletonEntry {
    version: VersionStamp,
    image: Arc<MetadataImage>,
    references: FxHashMap<MetadataReferenceProperties, MetadataReference>,
}

impl SkeletonEntry {
    fn reference(&mut self, properties: &MetadataReferenceProperties) -> MetadataReference {
        self.references
            .entry(properties.clone())
            .or_insert_with(|| MetadataReference::Skeleton {
                image: self.image.clone(),
                properties: properties.clone(),
            })
            .clone()
    }
}

/// Per-project skeleton cache.
///
/// Cloning takes a snapshot: the clone and the original never observe each
/// other's later writes.
pub struct SkeletonReferenceCache {
    entry: Mutex<Option<SkeletonEntry>>,
    gate: tokio::sync::Mutex<()>,
}

impl SkeletonReferenceCache {
    pub fn new() -> Self {
        Self {
            entry: Mutex::new(None),
            gate: tokio::sync::Mutex::new(()),
        }
    }

    fn with_entry<R>(&self, f: impl FnOnce(&mut Option<SkeletonEntry>) -> R) -> R {
        let mut entry = self.entry.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut entry)
    }

    /// Reference for `properties` if an image exists for `version`. With no
    /// version, any cached image is accepted.
    pub fn try_get_reference(
        &self,
        version: Option<VersionStamp>,
        properties: &MetadataReferenceProperties,
    ) -> Option<MetadataReference> {
        self.with_entry(|entry| match entry {
            Some(entry) if version.is_none_or(|v| v == entry.version) => {
                Some(entry.reference(properties))
            }
            _ => None,
        })
    }

    pub fn has_image(&self) -> bool {
        self.with_entry(|entry| entry.is_some())
    }

    /// Get or build the skeleton reference for the project `tracker` owns.
    ///
    /// Failures are logged and reported as `None`; cancellation is returned.
    pub(crate) async fn get_or_build_reference(
        &self,
        tracker: &CompilationTracker,
        solution: &Solution,
        properties: &MetadataReferenceProperties,
        mode: CreationMode,
        cancel: &CancellationToken,
    ) -> Result<Option<MetadataReference>> {
        if !mode.allows_creation(self.has_image()) {
            return Ok(self.try_get_reference(None, properties));
        }

        let version = tracker.dependent_semantic_version(solution, cancel).await?;
        if let Some(reference) = self.try_get_reference(Some(version), properties) {
            return Ok(Some(reference));
        }

        let _gate = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            gate = self.gate.lock() => gate,
        };
        if let Some(reference) = self.try_get_reference(Some(version), properties) {
            return Ok(Some(reference));
        }

        let project = tracker.project().id();
        let compilation = match tracker.get_compilation_async(solution, cancel).await {
            Ok(compilation) => compilation,
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                tracing::warn!(
                    project = %project,
                    error = %e,
                    "cannot build skeleton, compilation failed"
                );
                return Ok(None);
            }
        };

        let image = match solution
            .services()
            .skeleton_builder()
            .build_skeleton(&compilation, cancel)
        {
            Ok(image) => Arc::new(image),
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                tracing::warn!(project = %project, error = %e, "skeleton build failed");
                return Ok(None);
            }
        };

        tracing::debug!(project = %project, version = %version, "built skeleton image");
        let reference = self.with_entry(|entry| {
            let mut fresh = SkeletonEntry {
                version,
                image,
                references: FxHashMap::default(),
            };
            let reference = fresh.reference(properties);
            *entry = Some(fresh);
            reference
        });
        Ok(Some(reference))
    }
}

impl Default for SkeletonReferenceCache {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for SkeletonReferenceCache {
    fn clone(&self) -> Self {
        Self {
            entry: Mutex::new(self.with_entry(|entry| entry.clone())),
            gate: tokio::sync::Mutex::new(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache_with_image(version: VersionStamp) -> SkeletonReferenceCache {
        let cache = SkeletonReferenceCache::new();
        cache.with_entry(|entry| {
            *entry = Some(SkeletonEntry {
                version,
                image: Arc::new(MetadataImage::new("lib", Vec::new())),
                references: FxHashMap::default(),
            })
        });
        cache
    }

    #[test]
    fn test_references_are_shared_per_properties() {
        let version = VersionStamp::new();
        let cache = cache_with_image(version);
        let plain = MetadataReferenceProperties::default();
        let aliased = MetadataReferenceProperties::default().with_alias("ext");

        let a = cache.try_get_reference(Some(version), &plain).unwrap();
        let b = cache.try_get_reference(Some(version), &plain).unwrap();
        let c = cache.try_get_reference(Some(version), &aliased).unwrap();
        assert!(a.same_target(&b));
        assert!(!a.same_target(&c));
        match (&a, &c) {
            (
                MetadataReference::Skeleton { image: x, .. },
                MetadataReference::Skeleton { image: y, .. },
            ) => assert!(Arc::ptr_eq(x, y)),
            _ => panic!("expected skeleton references"),
        }
    }

    #[test]
    fn test_version_mismatch_misses() {
        let cache = cache_with_image(VersionStamp::new());
        let properties = MetadataReferenceProperties::default();
        assert!(cache.try_get_reference(Some(VersionStamp::new()), &properties).is_none());
        assert!(cache.try_get_reference(None, &properties).is_some());
    }

    #[test]
    fn test_clone_is_a_snapshot() {
        let original = SkeletonReferenceCache::new();
        let snapshot = original.clone();
        original.with_entry(|entry| {
            *entry = Some(SkeletonEntry {
                version: VersionStamp::new(),
                image: Arc::new(MetadataImage::new("lib", Vec::new())),
                references: FxHashMap::default(),
            })
        });
        assert!(original.has_image());
        assert!(!snapshot.has_image());
    }
}
