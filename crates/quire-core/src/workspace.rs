//! Host surface: shared services and the mutable current solution.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use rustc_hash::FxHashMap;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::fault::{FaultReporter, TracingFaultReporter};
use crate::ids::{DocumentId, LanguageId, VersionStamp};
use crate::solution::Solution;
use crate::syntax::{LanguageService, RustLanguage};
use crate::tracker::{DeclarationSkeletonBuilder, SkeletonBuilder};

// ============================================================================
// Services
// ============================================================================

/// Collaborators shared by every snapshot of a workspace.
pub struct WorkspaceServices {
    config: Arc<EngineConfig>,
    languages: FxHashMap<LanguageId, Arc<dyn LanguageService>>,
    skeleton_builder: Arc<dyn SkeletonBuilder>,
    fault_reporter: Arc<dyn FaultReporter>,
}

impl WorkspaceServices {
    /// Builder with the Rust language service, the declaration skeleton
    /// builder and the tracing fault reporter registered.
    pub fn builder() -> WorkspaceServicesBuilder {
        WorkspaceServicesBuilder::default()
    }

    pub fn default_services() -> Arc<Self> {
        Self::builder().build()
    }

    pub fn config(&self) -> &Arc<EngineConfig> {
        &self.config
    }

    /// The service registered for `language`.
    pub fn language(&self, language: &LanguageId) -> Result<Arc<dyn LanguageService>> {
        self.languages
            .get(language)
            .cloned()
            .ok_or_else(|| Error::UnknownLanguage(language.to_string()))
    }

    pub fn languages(&self) -> impl Iterator<Item = &LanguageId> {
        self.languages.keys()
    }

    pub fn skeleton_builder(&self) -> &Arc<dyn SkeletonBuilder> {
        &self.skeleton_builder
    }

    pub fn fault_reporter(&self) -> &Arc<dyn FaultReporter> {
        &self.fault_reporter
    }
}

impl fmt::Debug for WorkspaceServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkspaceServices")
            .field("config", &self.config)
            .field("languages", &self.languages.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Builder for [`WorkspaceServices`].
pub struct WorkspaceServicesBuilder {
    config: EngineConfig,
    languages: FxHashMap<LanguageId, Arc<dyn LanguageService>>,
    skeleton_builder: Arc<dyn SkeletonBuilder>,
    fault_reporter: Arc<dyn FaultReporter>,
}

impl Default for WorkspaceServicesBuilder {
    fn default() -> Self {
        let rust: Arc<dyn LanguageService> = Arc::new(RustLanguage::new());
        let mut languages = FxHashMap::default();
        languages.insert(rust.language(), rust);
        Self {
            config: EngineConfig::default(),
            languages,
            skeleton_builder: Arc::new(DeclarationSkeletonBuilder),
            fault_reporter: Arc::new(TracingFaultReporter),
        }
    }
}

impl WorkspaceServicesBuilder {
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a language service, replacing any service for the same
    /// language.
    pub fn with_language(mut self, service: Arc<dyn LanguageService>) -> Self {
        self.languages.insert(service.language(), service);
        self
    }

    pub fn with_skeleton_builder(mut self, builder: Arc<dyn SkeletonBuilder>) -> Self {
        self.skeleton_builder = builder;
        self
    }

    pub fn with_fault_reporter(mut self, reporter: Arc<dyn FaultReporter>) -> Self {
        self.fault_reporter = reporter;
        self
    }

    pub fn build(self) -> Arc<WorkspaceServices> {
        Arc::new(WorkspaceServices {
            config: Arc::new(self.config),
            languages: self.languages,
            skeleton_builder: self.skeleton_builder,
            fault_reporter: self.fault_reporter,
        })
    }
}

// ============================================================================
// Workspace
// ============================================================================

struct FrozenEntry {
    document: DocumentId,
    solution_version: VersionStamp,
    created: Instant,
    frozen: Solution,
}

/// Holder of the current solution.
///
/// Readers take snapshots without blocking; writers publish new snapshots
/// with compare-and-swap.
pub struct Workspace {
    current: ArcSwap<Solution>,
    frozen: Mutex<Option<FrozenEntry>>,
}

impl Workspace {
    pub fn new(services: Arc<WorkspaceServices>) -> Self {
        Self {
            current: ArcSwap::from_pointee(Solution::new(services)),
            frozen: Mutex::new(None),
        }
    }

    pub fn services(&self) -> Arc<WorkspaceServices> {
        self.current.load().services().clone()
    }

    pub fn current_solution(&self) -> Solution {
        (**self.current.load()).clone()
    }

    /// Publish `new` if the current solution is still `expected`.
    pub fn try_apply_changes(&self, expected: &Solution, new: Solution) -> bool {
        let current = self.current.load();
        if !current.ptr_eq(expected) {
            return false;
        }
        let version = new.version();
        let previous = self.current.compare_and_swap(&current, Arc::new(new));
        let applied = Arc::ptr_eq(&*previous, &*current);
        if applied {
            tracing::debug!(version = %version, "solution published");
        }
        applied
    }

    /// Apply `change` to the current solution, retrying if another writer
    /// got there first.
    pub fn apply(&self, change: impl Fn(&Solution) -> Result<Solution>) -> Result<Solution> {
        loop {
            let current = self.current_solution();
            let new = change(&current)?;
            if self.try_apply_changes(&current, new.clone()) {
                return Ok(new);
            }
            tracing::trace!("solution changed concurrently, retrying");
        }
    }

    /// A frozen snapshot of the current solution containing the current
    /// tree of `document`.
    ///
    /// Within the configured reuse window, a snapshot frozen earlier for the
    /// same document is handed out again as long as the document's text has
    /// not changed since.
    pub fn frozen_partial_for_document(
        &self,
        document: DocumentId,
        cancel: &CancellationToken,
    ) -> Result<Solution> {
        let current = self.current_solution();
        let window = Duration::from_millis(current.services().config().frozen_snapshot_reuse_ms);

        {
            let entry = self.frozen.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(entry) = entry.as_ref()
                && entry.document == document
                && (entry.solution_version == current.version()
                    || (entry.created.elapsed() < window
                        && same_text(&entry.frozen, &current, document)))
            {
                tracing::trace!(document = %document, "reusing frozen snapshot");
                return Ok(entry.frozen.clone());
            }
        }

        let frozen = current.with_frozen_partial_compilation_for_document(document, cancel)?;
        *self.frozen.lock().unwrap_or_else(PoisonError::into_inner) = Some(FrozenEntry {
            document,
            solution_version: current.version(),
            created: Instant::now(),
            frozen: frozen.clone(),
        });
        Ok(frozen)
    }
}

fn same_text(a: &Solution, b: &Solution, document: DocumentId) -> bool {
    let text = |s: &Solution| s.document(document).and_then(|d| d.try_get_text());
    match (text(a), text(b)) {
        (Some(a), Some(b)) => a.text.ptr_eq(&b.text) || a.text.content_equals(&b.text),
        _ => false,
    }
}

impl fmt::Debug for Workspace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workspace")
            .field("current", &**self.current.load())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::ProjectId;
    use crate::solution::{DocumentInfo, ProjectInfo};
    use crate::text::TextSource;

    #[test]
    fn test_unknown_language() {
        let services = WorkspaceServices::default_services();
        assert!(services.language(&LanguageId::new("rust")).is_ok());
        assert!(matches!(
            services.language(&LanguageId::new("cobol")),
            Err(Error::UnknownLanguage(_))
        ));
    }

    #[test]
    fn test_stale_apply_is_rejected() {
        let workspace = Workspace::new(WorkspaceServices::default_services());
        let base = workspace.current_solution();

        let first = base
            .add_project(ProjectInfo::new(ProjectId::new(), "a", "rust"))
            .unwrap();
        let second = base
            .add_project(ProjectInfo::new(ProjectId::new(), "b", "rust"))
            .unwrap();

        assert!(workspace.try_apply_changes(&base, first.clone()));
        assert!(!workspace.try_apply_changes(&base, second));
        assert!(workspace.current_solution().ptr_eq(&first));
    }

    #[test]
    fn test_apply_retries_on_latest() {
        let workspace = Workspace::new(WorkspaceServices::default_services());
        let a = ProjectId::new();
        let b = ProjectId::new();
        workspace
            .apply(|s| s.add_project(ProjectInfo::new(a, "a", "rust")))
            .unwrap();
        let solution = workspace
            .apply(|s| s.add_project(ProjectInfo::new(b, "b", "rust")))
            .unwrap();
        assert_eq!(solution.project_ids(), &[a, b]);
    }

    #[test]
    fn test_frozen_snapshot_reused_within_window() {
        let services = WorkspaceServices::builder()
            .with_config(EngineConfig {
                frozen_snapshot_reuse_ms: 60_000,
                ..Default::default()
            })
            .build();
        let workspace = Workspace::new(services);
        let project = ProjectId::new();
        let doc = DocumentId::new(project);
        let other = DocumentId::new(project);
        workspace
            .apply(|s| {
                s.add_project(
                    ProjectInfo::new(project, "app", "rust")
                        .with_document(
                            DocumentInfo::new(doc, "a.rs"),
                            TextSource::constant("pub struct A;"),
                        )
                        .with_document(
                            DocumentInfo::new(other, "b.rs"),
                            TextSource::constant("pub struct B;"),
                        ),
                )
            })
            .unwrap();
        let token = CancellationToken::new();

        let first = workspace.frozen_partial_for_document(doc, &token).unwrap();
        workspace
            .apply(|s| s.with_document_text(other, "pub struct B2;"))
            .unwrap();
        let second = workspace.frozen_partial_for_document(doc, &token).unwrap();
        assert!(first.ptr_eq(&second));

        workspace
            .apply(|s| s.with_document_text(doc, "pub struct A2;"))
            .unwrap();
        let third = workspace.frozen_partial_for_document(doc, &token).unwrap();
        assert!(!third.ptr_eq(&first));
    }
}
