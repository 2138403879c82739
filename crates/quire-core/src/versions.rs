//! Version and checksum propagation.
//!
//! Project-level values are computed once per project record. Dependent
//! values also fold in the project's references and are cached per tracker,
//! which is forked whenever a dependency changes.

use std::sync::{Arc, OnceLock};

use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::ids::{Checksum, VersionStamp};
use crate::lazy::AsyncLazy;
use crate::solution::{DocumentSet, ProjectParts, ProjectRecord, Solution};
use crate::tracker::CompilationTracker;

/// Newest text version among `sets`, or `version` if that is newer.
pub(crate) async fn latest_document_version(
    sets: &[DocumentSet],
    version: VersionStamp,
    cancel: &CancellationToken,
) -> Result<VersionStamp> {
    let mut latest = version;
    for document in sets.iter().flat_map(DocumentSet::iter) {
        latest = latest.newer(document.version_async(cancel).await?);
    }
    Ok(latest)
}

/// Newest version that changed the public shape of any document in `sets`.
pub(crate) async fn latest_top_level_version(
    sets: &[DocumentSet],
    version: VersionStamp,
    cancel: &CancellationToken,
) -> Result<VersionStamp> {
    let mut latest = version;
    for document in sets.iter().flat_map(DocumentSet::iter) {
        latest = latest.newer(document.top_level_version_async(cancel).await?);
    }
    Ok(latest)
}

/// Checksum of a project's attributes, documents and references.
pub(crate) async fn project_checksum(
    parts: &ProjectParts,
    cancel: &CancellationToken,
) -> Result<Checksum> {
    let mut components = vec![
        Checksum::of_str(&parts.name),
        Checksum::of_str(&parts.assembly_name),
        Checksum::of_str(parts.language.as_str()),
        Checksum::of_str(
            &parts
                .file_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
        ),
        parts.compilation_options.checksum(),
        Checksum::of_str(&format!("{:?}", parts.parse_options)),
        Checksum::of_bytes(&[parts.has_all_information as u8, parts.is_submission as u8]),
    ];

    for set in [&parts.documents, &parts.additional_documents, &parts.config_documents] {
        components.push(Checksum::of_bytes(&(set.len() as u64).to_le_bytes()));
        for document in set.iter() {
            components.push(document.checksum_async(cancel).await?);
        }
    }

    for reference in parts.project_references.iter() {
        components.push(Checksum::of_bytes(reference.project_id.as_uuid().as_bytes()));
        components.push(reference.properties.checksum());
    }
    for reference in parts.metadata_references.iter() {
        components.push(reference.checksum());
    }

    Ok(Checksum::combine(components))
}

/// Per-tracker cache of dependent values.
///
/// Each cell is created on first use. A dependent cell captures the cells of
/// the trackers it references, never trackers or solutions.
#[derive(Debug, Default)]
pub(crate) struct TrackerVersions {
    dependent_version: OnceLock<Arc<AsyncLazy<VersionStamp>>>,
    dependent_semantic_version: OnceLock<Arc<AsyncLazy<VersionStamp>>>,
    dependent_checksum: OnceLock<Arc<AsyncLazy<Checksum>>>,
}

/// Trackers of the projects `tracker` references directly and that exist in
/// `solution`.
fn referenced<'a>(
    tracker: &CompilationTracker,
    solution: &'a Solution,
) -> Vec<&'a Arc<CompilationTracker>> {
    tracker
        .project()
        .project_references()
        .iter()
        .filter_map(|reference| solution.tracker(reference.project_id))
        .collect()
}

fn dependent_version_cell(
    tracker: &CompilationTracker,
    solution: &Solution,
) -> Arc<AsyncLazy<VersionStamp>> {
    tracker
        .versions
        .dependent_version
        .get_or_init(|| {
            let project = tracker.project().clone();
            let dependencies: Vec<_> = referenced(tracker, solution)
                .into_iter()
                .map(|t| dependent_version_cell(t, solution))
                .collect();
            Arc::new(AsyncLazy::new(move |token| {
                let project = project.clone();
                let dependencies = dependencies.clone();
                async move {
                    let mut version = project.latest_document_version_async(&token).await?;
                    for dependency in &dependencies {
                        version = version.newer(dependency.get_value_async(&token).await?);
                    }
                    Ok(version)
                }
            }))
        })
        .clone()
}

fn dependent_semantic_version_cell(
    tracker: &CompilationTracker,
    solution: &Solution,
) -> Arc<AsyncLazy<VersionStamp>> {
    tracker
        .versions
        .dependent_semantic_version
        .get_or_init(|| {
            let project = tracker.project().clone();
            let dependencies: Vec<_> = referenced(tracker, solution)
                .into_iter()
                .map(|t| dependent_semantic_version_cell(t, solution))
                .collect();
            Arc::new(AsyncLazy::new(move |token| {
                let project = project.clone();
                let dependencies = dependencies.clone();
                async move {
                    let mut version = project.latest_top_level_version_async(&token).await?;
                    for dependency in &dependencies {
                        version = version.newer(dependency.get_value_async(&token).await?);
                    }
                    Ok(version)
                }
            }))
        })
        .clone()
}

fn dependent_checksum_cell(
    tracker: &CompilationTracker,
    solution: &Solution,
) -> Arc<AsyncLazy<Checksum>> {
    tracker
        .versions
        .dependent_checksum
        .get_or_init(|| {
            let project = tracker.project().clone();
            let mut dependencies: Vec<ProjectRecord> = solution
                .graph()
                .transitive_dependencies(project.id())
                .into_iter()
                .filter_map(|id| solution.project(id).cloned())
                .collect();
            dependencies.sort_by(|a, b| {
                (a.file_path(), a.name(), a.id()).cmp(&(b.file_path(), b.name(), b.id()))
            });
            Arc::new(AsyncLazy::new(move |token| {
                let project = project.clone();
                let dependencies = dependencies.clone();
                async move {
                    let mut components = vec![project.checksum_async(&token).await?];
                    for dependency in &dependencies {
                        components.push(dependency.checksum_async(&token).await?);
                    }
                    Ok(Checksum::combine(components))
                }
            }))
        })
        .clone()
}

/// Newest document version of the project and everything it references.
pub(crate) async fn dependent_version(
    tracker: &CompilationTracker,
    solution: &Solution,
    cancel: &CancellationToken,
) -> Result<VersionStamp> {
    dependent_version_cell(tracker, solution)
        .get_value_async(cancel)
        .await
}

/// Like [`dependent_version`], but only public-shape changes count.
pub(crate) async fn dependent_semantic_version(
    tracker: &CompilationTracker,
    solution: &Solution,
    cancel: &CancellationToken,
) -> Result<VersionStamp> {
    dependent_semantic_version_cell(tracker, solution)
        .get_value_async(cancel)
        .await
}

/// The project's checksum combined with those of all transitive
/// dependencies, ordered by file path, then name, then id.
pub(crate) async fn dependent_checksum(
    tracker: &CompilationTracker,
    solution: &Solution,
    cancel: &CancellationToken,
) -> Result<Checksum> {
    dependent_checksum_cell(tracker, solution)
        .get_value_async(cancel)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{DocumentId, ProjectId};
    use crate::solution::{DocumentInfo, ProjectInfo, ProjectReference};
    use crate::text::TextSource;
    use crate::workspace::WorkspaceServices;

    fn project(name: &str, text: &str) -> (ProjectInfo, DocumentId) {
        let id = ProjectId::new();
        let doc = DocumentId::new(id);
        let info = ProjectInfo::new(id, name, "rust")
            .with_document(DocumentInfo::new(doc, "lib.rs"), TextSource::constant(text));
        (info, doc)
    }

    #[tokio::test]
    async fn test_body_edit_keeps_semantic_version() {
        let (info, doc) = project("lib", "pub fn f() -> u8 { 1 }");
        let lib = info.id;
        let solution = Solution::new(WorkspaceServices::default_services())
            .add_project(info)
            .unwrap();
        let token = CancellationToken::new();

        let before = solution.dependent_semantic_version(lib, &token).await.unwrap();
        let solution = solution
            .with_document_text(doc, "pub fn f() -> u8 { 2 }")
            .unwrap();
        let after = solution.dependent_semantic_version(lib, &token).await.unwrap();
        assert_eq!(before, after);

        let solution = solution
            .with_document_text(doc, "pub fn f() -> u16 { 2 }")
            .unwrap();
        let changed = solution.dependent_semantic_version(lib, &token).await.unwrap();
        assert!(changed > after);
    }

    #[tokio::test]
    async fn test_dependency_edit_propagates() {
        let (lib_info, lib_doc) = project("lib", "pub struct A;");
        let lib = lib_info.id;
        let (app_info, _) = project("app", "pub struct B;");
        let app = app_info.id;
        let app_info = app_info.with_project_reference(ProjectReference::new(lib));

        let solution = Solution::new(WorkspaceServices::default_services())
            .add_project(lib_info)
            .unwrap()
            .add_project(app_info)
            .unwrap();
        let token = CancellationToken::new();

        let version = solution.dependent_version(app, &token).await.unwrap();
        let checksum = solution.dependent_checksum(app, &token).await.unwrap();

        let solution = solution.with_document_text(lib_doc, "pub struct A2;").unwrap();
        assert!(solution.dependent_version(app, &token).await.unwrap() > version);
        assert_ne!(solution.dependent_checksum(app, &token).await.unwrap(), checksum);
    }

    #[tokio::test]
    async fn test_checksum_is_content_based() {
        let (a, _) = project("lib", "pub struct A;");
        let id = a.id;
        let services = WorkspaceServices::default_services();
        let token = CancellationToken::new();

        let first = Solution::new(services.clone()).add_project(a).unwrap();
        let one = first.dependent_checksum(id, &token).await.unwrap();

        let renamed = first.with_project_name(id, "other").unwrap();
        let two = renamed.dependent_checksum(id, &token).await.unwrap();
        assert_ne!(one, two);

        let restored = renamed.with_project_name(id, "lib").unwrap();
        let three = restored.dependent_checksum(id, &token).await.unwrap();
        assert_eq!(one, three);
    }

    #[test]
    fn test_dependent_cells_follow_tracker_forks() {
        let (lib_info, lib_doc) = project("lib", "pub struct A;");
        let lib = lib_info.id;
        let (app_info, _) = project("app", "pub struct B;");
        let app = app_info.id;
        let app_info = app_info.with_project_reference(ProjectReference::new(lib));
        let solution = Solution::new(WorkspaceServices::default_services())
            .add_project(lib_info)
            .unwrap()
            .add_project(app_info)
            .unwrap();

        let app_tracker = solution.tracker(app).unwrap();
        let first = dependent_version_cell(app_tracker, &solution);
        assert!(Arc::ptr_eq(&first, &dependent_version_cell(app_tracker, &solution)));
        assert!(solution.tracker(lib).unwrap().versions.dependent_version.get().is_some());

        let edited = solution.with_document_text(lib_doc, "pub struct A2;").unwrap();
        let forked = dependent_version_cell(edited.tracker(app).unwrap(), &edited);
        assert!(!Arc::ptr_eq(&first, &forked));
    }

    #[tokio::test]
    async fn test_cancelled_request_does_not_poison() {
        let (info, _) = project("lib", "pub struct A;");
        let id = info.id;
        let solution = Solution::new(WorkspaceServices::default_services())
            .add_project(info)
            .unwrap();

        let cancelled = CancellationToken::new();
        cancelled.cancel();
        let err = solution.dependent_version(id, &cancelled).await.unwrap_err();
        assert!(err.is_cancelled());

        let token = CancellationToken::new();
        assert!(solution.dependent_version(id, &token).await.is_ok());
    }
}
