//! Resolution of project references into metadata references.

use tokio_util::sync::CancellationToken;

use crate::compilation::{Compilation, MetadataReference, RootedAssemblies};
use crate::error::Result;
use crate::policy::CreationMode;
use crate::solution::{ProjectRecord, Solution};

/// Project references of one project, resolved against a snapshot.
#[derive(Debug, Default)]
pub(crate) struct ResolvedReferences {
    /// Project-derived references, in declaration order.
    pub references: Vec<MetadataReference>,
    pub previous_submission: Option<Compilation>,
    pub rooted: RootedAssemblies,
    /// False if any project reference could not be resolved.
    pub all_resolved: bool,
}

/// Resolve every project reference of `project`, in declaration order.
///
/// Unresolvable references are skipped and clear `all_resolved`; only
/// cancellation aborts.
pub(crate) async fn resolve_project_references(
    project: &ProjectRecord,
    solution: &Solution,
    skeleton_mode: CreationMode,
    cancel: &CancellationToken,
) -> Result<ResolvedReferences> {
    let mut resolved = ResolvedReferences {
        all_resolved: true,
        ..Default::default()
    };

    for reference in project.project_references() {
        let referenced_id = reference.project_id;
        let (Some(referenced), Some(tracker)) = (
            solution.project(referenced_id),
            solution.tracker(referenced_id),
        ) else {
            tracing::warn!(
                project = %project.id(),
                referenced = %referenced_id,
                "referenced project is not in the solution"
            );
            resolved.all_resolved = false;
            continue;
        };

        if project.is_submission() && referenced.is_submission() {
            match fetch_compilation(tracker, solution, project, cancel).await? {
                Some(compilation) => {
                    resolved.rooted.root_compilation(&compilation, referenced_id);
                    resolved.previous_submission = Some(compilation);
                }
                None => resolved.all_resolved = false,
            }
            continue;
        }

        if referenced.language() == project.language() {
            match fetch_compilation(tracker, solution, project, cancel).await? {
                Some(compilation) => {
                    resolved.rooted.root_compilation(&compilation, referenced_id);
                    resolved
                        .references
                        .push(compilation.to_metadata_reference(reference.properties.clone()));
                }
                None => resolved.all_resolved = false,
            }
            continue;
        }

        let skeleton = tracker
            .skeletons()
            .get_or_build_reference(tracker, solution, &reference.properties, skeleton_mode, cancel)
            .await?;
        match skeleton {
            Some(reference) => {
                if let MetadataReference::Skeleton { image, .. } = &reference {
                    resolved.rooted.root_image(image, referenced_id);
                }
                resolved.references.push(reference);
            }
            None => {
                tracing::warn!(
                    project = %project.id(),
                    referenced = %referenced_id,
                    "no skeleton available for cross-language reference"
                );
                resolved.all_resolved = false;
            }
        }
    }

    Ok(resolved)
}

/// The referenced project's compilation, or `None` if its build failed.
async fn fetch_compilation(
    tracker: &super::CompilationTracker,
    solution: &Solution,
    from: &ProjectRecord,
    cancel: &CancellationToken,
) -> Result<Option<Compilation>> {
    match tracker.get_compilation_async(solution, cancel).await {
        Ok(compilation) => Ok(Some(compilation)),
        Err(e) if e.is_cancelled() => Err(e),
        Err(e) => {
            tracing::warn!(
                project = %from.id(),
                referenced = %tracker.project().id(),
                error = %e,
                "referenced project failed to build"
            );
            Ok(None)
        }
    }
}
