//! Immutable solution snapshots.

use std::fmt;
use std::sync::{Arc, OnceLock};

use rustc_hash::FxHashMap;
use tokio_util::sync::CancellationToken;

use super::document::{DocumentInfo, DocumentKind, DocumentRecord, TreeServices};
use super::graph::ProjectDependencyGraph;
use super::project::{ProjectInfo, ProjectRecord, ProjectReference};
use crate::compilation::{AssemblyOwners, Compilation, CompilationOptions, MetadataReference};
use crate::error::{Error, Result};
use crate::generators::{GeneratedDocument, GeneratedDocuments, GeneratorDriver};
use crate::ids::{Checksum, DocumentId, ProjectId, VersionStamp};
use crate::policy::CreationPolicy;
use crate::syntax::{ParseOptions, SyntaxTree};
use crate::text::{SourceText, TextLoader, TextSource};
use crate::tracker::{ActionKind, CompilationTracker, TranslationAction};
use crate::workspace::WorkspaceServices;

/// An immutable snapshot of every project in a workspace.
///
/// Cloning is cheap. Every change returns a new snapshot that shares all
/// unchanged projects, documents and trackers with this one.
#[derive(Clone)]
pub struct Solution(Arc<SolutionInner>);

struct SolutionInner {
    version: VersionStamp,
    services: Arc<WorkspaceServices>,
    project_ids: Arc<Vec<ProjectId>>,
    projects: Arc<FxHashMap<ProjectId, ProjectRecord>>,
    trackers: Arc<FxHashMap<ProjectId, Arc<CompilationTracker>>>,
    graph: ProjectDependencyGraph,
    frozen: bool,
    frozen_partial: OnceLock<Solution>,
}

/// Tracker and record updates produced by one change.
struct Change {
    projects: FxHashMap<ProjectId, ProjectRecord>,
    trackers: FxHashMap<ProjectId, Arc<CompilationTracker>>,
}

impl Solution {
    /// An empty solution.
    pub fn new(services: Arc<WorkspaceServices>) -> Self {
        Self(Arc::new(SolutionInner {
            version: VersionStamp::new(),
            services,
            project_ids: Arc::new(Vec::new()),
            projects: Arc::new(FxHashMap::default()),
            trackers: Arc::new(FxHashMap::default()),
            graph: ProjectDependencyGraph::default(),
            frozen: false,
            frozen_partial: OnceLock::new(),
        }))
    }

    pub fn services(&self) -> &Arc<WorkspaceServices> {
        &self.0.services
    }

    pub fn version(&self) -> VersionStamp {
        self.0.version
    }

    /// Project ids in the order the projects were added.
    pub fn project_ids(&self) -> &[ProjectId] {
        &self.0.project_ids
    }

    pub fn projects(&self) -> impl Iterator<Item = &ProjectRecord> {
        self.0.project_ids.iter().filter_map(|id| self.0.projects.get(id))
    }

    pub fn project(&self, id: ProjectId) -> Option<&ProjectRecord> {
        self.0.projects.get(&id)
    }

    pub fn contains_project(&self, id: ProjectId) -> bool {
        self.0.projects.contains_key(&id)
    }

    pub fn tracker(&self, id: ProjectId) -> Option<&Arc<CompilationTracker>> {
        self.0.trackers.get(&id)
    }

    pub fn graph(&self) -> &ProjectDependencyGraph {
        &self.0.graph
    }

    /// A document of any kind.
    pub fn document(&self, id: DocumentId) -> Option<&DocumentRecord> {
        self.project(id.project_id())?.document(id)
    }

    /// Whether this snapshot was produced by freezing partial compilations.
    pub fn is_frozen(&self) -> bool {
        self.0.frozen
    }

    pub fn ptr_eq(&self, other: &Solution) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn require_project(&self, id: ProjectId) -> Result<&ProjectRecord> {
        self.project(id).ok_or(Error::ProjectNotFound(id))
    }

    fn require_tracker(&self, id: ProjectId) -> Result<&Arc<CompilationTracker>> {
        self.tracker(id).ok_or(Error::ProjectNotFound(id))
    }

    fn require_document(&self, id: DocumentId) -> Result<&DocumentRecord> {
        self.document(id).ok_or(Error::DocumentNotFound(id))
    }

    fn tree_services(&self, info: &ProjectInfo) -> Result<TreeServices> {
        let services = &self.0.services;
        Ok(TreeServices {
            language: services.language(&info.language)?,
            parse_options: info.parse_options.clone(),
            reporter: services.fault_reporter().clone(),
            config: services.config().clone(),
        })
    }

    // ========================================================================
    // Branching
    // ========================================================================

    fn branch(
        &self,
        project_ids: Arc<Vec<ProjectId>>,
        projects: Arc<FxHashMap<ProjectId, ProjectRecord>>,
        trackers: Arc<FxHashMap<ProjectId, Arc<CompilationTracker>>>,
        graph: ProjectDependencyGraph,
        frozen: bool,
    ) -> Self {
        Self(Arc::new(SolutionInner {
            version: VersionStamp::new(),
            services: self.0.services.clone(),
            project_ids,
            projects,
            trackers,
            graph,
            frozen,
            frozen_partial: OnceLock::new(),
        }))
    }

    fn empty_change(&self) -> Change {
        Change {
            projects: FxHashMap::default(),
            trackers: FxHashMap::default(),
        }
    }

    /// Fork the trackers of every project that depends on `project` so that
    /// their references are resolved again.
    fn fork_dependents(
        &self,
        project: ProjectId,
        graph: &ProjectDependencyGraph,
        change: &mut Change,
    ) {
        for dependent in graph.transitive_dependents(project) {
            if change.trackers.contains_key(&dependent) {
                continue;
            }
            if let Some(tracker) = self.tracker(dependent) {
                let record = tracker.project().clone();
                change
                    .trackers
                    .insert(dependent, Arc::new(tracker.fork(record, None)));
            }
        }
    }

    fn apply(&self, change: Change, graph: ProjectDependencyGraph) -> Self {
        let mut projects = (*self.0.projects).clone();
        projects.extend(change.projects);
        let mut trackers = (*self.0.trackers).clone();
        trackers.extend(change.trackers);
        self.branch(
            self.0.project_ids.clone(),
            Arc::new(projects),
            Arc::new(trackers),
            graph,
            self.0.frozen,
        )
    }

    /// Replace one project record, queueing `actions` on its tracker and
    /// forking every dependent.
    fn with_project_change(
        &self,
        old: &ProjectRecord,
        new: ProjectRecord,
        actions: Vec<ActionKind>,
    ) -> Result<Self> {
        self.with_project_change_in(old, new, actions, self.0.graph.clone())
    }

    fn with_project_change_in(
        &self,
        old: &ProjectRecord,
        new: ProjectRecord,
        actions: Vec<ActionKind>,
        graph: ProjectDependencyGraph,
    ) -> Result<Self> {
        let id = new.id();
        let mut tracker = self.require_tracker(id)?.clone();
        if actions.is_empty() {
            tracker = Arc::new(tracker.fork(new.clone(), None));
        }
        for kind in actions {
            let action = TranslationAction::new(old.clone(), new.clone(), kind);
            tracing::trace!(project = %id, action = action.name(), "queueing action");
            tracker = Arc::new(tracker.fork(new.clone(), Some(action)));
        }

        let mut change = self.empty_change();
        change.projects.insert(id, new);
        change.trackers.insert(id, tracker);
        self.fork_dependents(id, &graph, &mut change);
        Ok(self.apply(change, graph))
    }

    fn rebuild_graph(
        projects: &FxHashMap<ProjectId, ProjectRecord>,
        order: &[ProjectId],
    ) -> ProjectDependencyGraph {
        ProjectDependencyGraph::from_projects(order.iter().filter_map(|id| {
            projects
                .get(id)
                .map(|p| (*id, p.project_references().iter().map(|r| &r.project_id)))
        }))
    }

    // ========================================================================
    // Projects
    // ========================================================================

    /// A snapshot with one more project.
    pub fn add_project(&self, info: ProjectInfo) -> Result<Self> {
        let id = info.id;
        if self.contains_project(id) {
            return Err(Error::DuplicateProject(id));
        }
        let tree_services = self.tree_services(&info)?;
        let references: Vec<ProjectId> =
            info.project_references.iter().map(|r| r.project_id).collect();

        let mut projects = (*self.0.projects).clone();
        let record = ProjectRecord::from_info(info, tree_services);
        projects.insert(id, record.clone());
        let mut project_ids = (*self.0.project_ids).clone();
        project_ids.push(id);

        // Projects that referenced `id` before it existed gain an edge now.
        let graph = Self::rebuild_graph(&projects, &project_ids).with_references(id, &references)?;

        let mut trackers = (*self.0.trackers).clone();
        trackers.insert(id, Arc::new(CompilationTracker::new(record)));
        for dependent in graph.transitive_dependents(id) {
            if let Some(tracker) = trackers.get(&dependent).cloned() {
                let record = tracker.project().clone();
                trackers.insert(dependent, Arc::new(tracker.fork(record, None)));
            }
        }

        tracing::debug!(project = %id, projects = project_ids.len(), "project added");
        Ok(self.branch(
            Arc::new(project_ids),
            Arc::new(projects),
            Arc::new(trackers),
            graph,
            self.0.frozen,
        ))
    }

    /// A snapshot without `id`. Projects that referenced it keep the
    /// reference, which no longer resolves.
    pub fn remove_project(&self, id: ProjectId) -> Result<Self> {
        self.require_project(id)?;
        let dependents = self.0.graph.transitive_dependents(id);

        let mut projects = (*self.0.projects).clone();
        projects.remove(&id);
        let mut trackers = (*self.0.trackers).clone();
        trackers.remove(&id);
        for dependent in dependents {
            if let Some(tracker) = trackers.get(&dependent).cloned() {
                let record = tracker.project().clone();
                trackers.insert(dependent, Arc::new(tracker.fork(record, None)));
            }
        }
        let project_ids: Vec<ProjectId> =
            self.0.project_ids.iter().copied().filter(|p| *p != id).collect();
        let graph = Self::rebuild_graph(&projects, &project_ids);

        tracing::debug!(project = %id, projects = project_ids.len(), "project removed");
        Ok(self.branch(
            Arc::new(project_ids),
            Arc::new(projects),
            Arc::new(trackers),
            graph,
            self.0.frozen,
        ))
    }

    pub fn with_project_name(&self, id: ProjectId, name: impl Into<String>) -> Result<Self> {
        let old = self.require_project(id)?;
        let name = name.into();
        if old.name() == name {
            return Ok(self.clone());
        }
        self.with_project_change(old, old.with_name(name), Vec::new())
    }

    pub fn with_assembly_name(
        &self,
        id: ProjectId,
        assembly_name: impl Into<String>,
    ) -> Result<Self> {
        let old = self.require_project(id)?;
        let assembly_name = assembly_name.into();
        if old.assembly_name() == assembly_name {
            return Ok(self.clone());
        }
        self.with_project_change(
            old,
            old.with_assembly_name(assembly_name),
            vec![ActionKind::AssemblyName],
        )
    }

    pub fn with_compilation_options(
        &self,
        id: ProjectId,
        options: CompilationOptions,
    ) -> Result<Self> {
        let old = self.require_project(id)?;
        if *old.compilation_options() == options {
            return Ok(self.clone());
        }
        self.with_project_change(
            old,
            old.with_compilation_options(options),
            vec![ActionKind::CompilationOptions],
        )
    }

    /// New parse options. Every source document is reparsed.
    pub fn with_parse_options(&self, id: ProjectId, options: ParseOptions) -> Result<Self> {
        let old = self.require_project(id)?;
        if *old.parse_options() == options {
            return Ok(self.clone());
        }
        let mut new = old.with_parse_options(options.clone());
        if let Some(driver) = new.generator_driver().and_then(|d| d.with_parse_options(&options)) {
            new = new.with_generator_driver(Some(driver));
        }
        self.with_project_change(old, new, vec![ActionKind::ReplaceAllSyntaxTrees])
    }

    pub fn with_has_all_information(
        &self,
        id: ProjectId,
        has_all_information: bool,
    ) -> Result<Self> {
        let old = self.require_project(id)?;
        if old.has_all_information() == has_all_information {
            return Ok(self.clone());
        }
        self.with_project_change(old, old.with_has_all_information(has_all_information), Vec::new())
    }

    /// Install or remove the project's generator driver.
    pub fn with_generator_driver(
        &self,
        id: ProjectId,
        driver: Option<Arc<dyn GeneratorDriver>>,
    ) -> Result<Self> {
        let old = self.require_project(id)?;
        let unchanged = match (old.generator_driver(), &driver) {
            (None, None) => true,
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        };
        if unchanged {
            return Ok(self.clone());
        }
        self.with_project_change(
            old,
            old.with_generator_driver(driver),
            vec![ActionKind::GeneratorsChanged],
        )
    }

    /// Run the project's generators again on the next build, even if their
    /// output was final. `force` also discards the driver's incremental
    /// state.
    pub fn rerun_generators(&self, id: ProjectId, force: bool) -> Result<Self> {
        let tracker = self.require_tracker(id)?;
        let mut change = self.empty_change();
        change.trackers.insert(
            id,
            Arc::new(tracker.with_creation_policy(CreationPolicy::CREATE, force)),
        );
        self.fork_dependents(id, &self.0.graph, &mut change);
        tracing::debug!(project = %id, force, "generators scheduled to rerun");
        Ok(self.apply(change, self.0.graph.clone()))
    }

    // ========================================================================
    // References
    // ========================================================================

    pub fn add_project_reference(
        &self,
        id: ProjectId,
        reference: ProjectReference,
    ) -> Result<Self> {
        let old = self.require_project(id)?;
        self.require_project(reference.project_id)?;
        if old.project_references().iter().any(|r| r.project_id == reference.project_id) {
            return Err(Error::InvalidOperation(format!(
                "{} already references {}",
                id, reference.project_id
            )));
        }
        if self.0.graph.would_create_cycle(id, reference.project_id) {
            return Err(Error::CyclicReference(format!(
                "{} -> {} closes a cycle",
                id, reference.project_id
            )));
        }
        let mut references = old.project_references().to_vec();
        references.push(reference);
        self.with_project_references(id, references)
    }

    pub fn remove_project_reference(&self, id: ProjectId, referenced: ProjectId) -> Result<Self> {
        let old = self.require_project(id)?;
        let references: Vec<ProjectReference> = old
            .project_references()
            .iter()
            .filter(|r| r.project_id != referenced)
            .cloned()
            .collect();
        if references.len() == old.project_references().len() {
            return Err(Error::InvalidOperation(format!(
                "{} does not reference {}",
                id, referenced
            )));
        }
        self.with_project_references(id, references)
    }

    /// Replace all project references of `id`.
    pub fn with_project_references(
        &self,
        id: ProjectId,
        references: Vec<ProjectReference>,
    ) -> Result<Self> {
        let old = self.require_project(id)?;
        let targets: Vec<ProjectId> = references.iter().map(|r| r.project_id).collect();
        let graph = self.0.graph.with_references(id, &targets)?;
        let new = old.with_project_references(references);
        self.with_project_change_in(old, new, vec![ActionKind::ReferencesChanged], graph)
    }

    pub fn add_metadata_reference(
        &self,
        id: ProjectId,
        reference: MetadataReference,
    ) -> Result<Self> {
        let old = self.require_project(id)?;
        let mut references = old.metadata_references().to_vec();
        references.push(reference);
        self.with_metadata_references(id, references)
    }

    pub fn remove_metadata_reference(
        &self,
        id: ProjectId,
        reference: &MetadataReference,
    ) -> Result<Self> {
        let old = self.require_project(id)?;
        let mut references = old.metadata_references().to_vec();
        let Some(index) = references
            .iter()
            .position(|r| r.same_target(reference) && r.properties() == reference.properties())
        else {
            return Err(Error::InvalidOperation(format!(
                "{} does not reference {}",
                id,
                reference.display_name()
            )));
        };
        references.remove(index);
        self.with_metadata_references(id, references)
    }

    pub fn with_metadata_references(
        &self,
        id: ProjectId,
        references: Vec<MetadataReference>,
    ) -> Result<Self> {
        let old = self.require_project(id)?;
        self.with_project_change(
            old,
            old.with_metadata_references(references),
            vec![ActionKind::ReferencesChanged],
        )
    }

    // ========================================================================
    // Documents
    // ========================================================================

    pub fn add_document(&self, info: DocumentInfo, text: TextSource) -> Result<Self> {
        self.add_documents(vec![(info, text)])
    }

    /// Add documents of any kind, possibly to several projects.
    pub fn add_documents(&self, documents: Vec<(DocumentInfo, TextSource)>) -> Result<Self> {
        let mut by_project: Vec<(ProjectId, Vec<(DocumentInfo, TextSource)>)> = Vec::new();
        for (info, text) in documents {
            let project = info.id.project_id();
            match by_project.iter_mut().find(|(id, _)| *id == project) {
                Some((_, group)) => group.push((info, text)),
                None => by_project.push((project, vec![(info, text)])),
            }
        }

        let mut solution = self.clone();
        for (project_id, group) in by_project {
            let old = solution.require_project(project_id)?.clone();
            let services = old.tree_services().clone();
            let mut records = Vec::with_capacity(group.len());
            for (info, text) in group {
                if old.contains_document(info.id)
                    || records.iter().any(|r: &DocumentRecord| r.id() == info.id)
                {
                    return Err(Error::DuplicateDocument(info.id));
                }
                records.push(DocumentRecord::new(info, text, Some(services.clone())));
            }

            let source: Vec<DocumentRecord> = records
                .iter()
                .filter(|r| r.kind() == DocumentKind::Source)
                .cloned()
                .collect();
            let mut actions = Vec::new();
            if !source.is_empty() {
                actions.push(ActionKind::AddDocuments(source));
            }
            if records.iter().any(|r| r.kind() != DocumentKind::Source) {
                actions.push(ActionKind::AdditionalDocumentsChanged);
            }

            tracing::debug!(project = %project_id, documents = records.len(), "documents added");
            let new = old.with_documents_added(records);
            solution = solution.with_project_change(&old, new, actions)?;
        }
        Ok(solution)
    }

    /// Remove documents of any kind, possibly from several projects.
    pub fn remove_documents(&self, ids: &[DocumentId]) -> Result<Self> {
        let mut by_project: Vec<(ProjectId, Vec<DocumentId>)> = Vec::new();
        for id in ids {
            self.require_document(*id)?;
            match by_project.iter_mut().find(|(p, _)| *p == id.project_id()) {
                Some((_, group)) => group.push(*id),
                None => by_project.push((id.project_id(), vec![*id])),
            }
        }

        let mut solution = self.clone();
        for (project_id, group) in by_project {
            let old = solution.require_project(project_id)?.clone();
            let removed: Vec<DocumentRecord> = group
                .iter()
                .filter_map(|id| old.document(*id).cloned())
                .collect();
            let source: Vec<DocumentRecord> = removed
                .iter()
                .filter(|r| r.kind() == DocumentKind::Source)
                .cloned()
                .collect();
            let mut actions = Vec::new();
            if !source.is_empty() {
                actions.push(ActionKind::RemoveDocuments(source));
            }
            if removed.iter().any(|r| r.kind() != DocumentKind::Source) {
                actions.push(ActionKind::AdditionalDocumentsChanged);
            }

            tracing::debug!(project = %project_id, documents = group.len(), "documents removed");
            let new = old.with_documents_removed(&group);
            solution = solution.with_project_change(&old, new, actions)?;
        }
        Ok(solution)
    }

    pub fn remove_document(&self, id: DocumentId) -> Result<Self> {
        self.remove_documents(&[id])
    }

    /// Swap one document record for an updated one of the same kind.
    fn with_document_record(&self, new_document: DocumentRecord) -> Result<Self> {
        let old_document = self.require_document(new_document.id())?;
        let old = self.require_project(new_document.id().project_id())?;
        let kind = match old_document.kind() {
            DocumentKind::Source => ActionKind::TouchDocument {
                old: old_document.clone(),
                new: new_document.clone(),
            },
            DocumentKind::Additional | DocumentKind::Config => {
                ActionKind::AdditionalDocumentsChanged
            }
        };
        self.with_project_change(old, old.with_document_replaced(new_document), vec![kind])
    }

    pub fn with_document_text(&self, id: DocumentId, text: impl Into<SourceText>) -> Result<Self> {
        let document = self.require_document(id)?;
        let text = text.into();
        if document.try_get_text().is_some_and(|current| current.text.ptr_eq(&text)) {
            return Ok(self.clone());
        }
        self.with_document_record(document.with_text(text))
    }

    pub fn with_document_text_source(&self, id: DocumentId, text: TextSource) -> Result<Self> {
        let document = self.require_document(id)?;
        self.with_document_record(document.with_text_source(text))
    }

    pub fn with_document_loader(
        &self,
        id: DocumentId,
        loader: Arc<dyn TextLoader>,
    ) -> Result<Self> {
        self.with_document_text_source(id, TextSource::from_loader(loader))
    }

    /// New attributes for a document. The kind cannot change.
    pub fn with_document_info(&self, info: DocumentInfo) -> Result<Self> {
        let document = self.require_document(info.id)?;
        if document.kind() != info.kind {
            return Err(Error::InvalidOperation(format!(
                "cannot change the kind of {}",
                info.id
            )));
        }
        if *document.info() == info {
            return Ok(self.clone());
        }
        self.with_document_record(document.with_info(info))
    }

    /// Reload a document whose text comes from a reloadable loader.
    pub fn reload_document(&self, id: DocumentId) -> Result<Self> {
        let document = self.require_document(id)?;
        if !document.text_source().is_reloadable() {
            return Ok(self.clone());
        }
        self.with_document_record(document.reload())
    }

    // ========================================================================
    // Compilations
    // ========================================================================

    pub async fn get_compilation_async(
        &self,
        id: ProjectId,
        cancel: &CancellationToken,
    ) -> Result<Compilation> {
        self.require_tracker(id)?.get_compilation_async(self, cancel).await
    }

    pub fn try_get_compilation(&self, id: ProjectId) -> Option<Compilation> {
        self.tracker(id)?.try_get_compilation()
    }

    /// Whether `id` and everything it depends on loaded successfully.
    pub async fn has_successfully_loaded_async(
        &self,
        id: ProjectId,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let tracker = self.require_tracker(id)?;
        if !tracker.has_successfully_loaded_async(self, cancel).await? {
            return Ok(false);
        }
        for dependency in self.0.graph.transitive_dependencies(id) {
            let Some(tracker) = self.tracker(dependency) else {
                return Ok(false);
            };
            if !tracker.has_successfully_loaded_async(self, cancel).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub async fn generated_documents_async(
        &self,
        id: ProjectId,
        cancel: &CancellationToken,
    ) -> Result<GeneratedDocuments> {
        self.require_tracker(id)?.generated_documents_async(self, cancel).await
    }

    pub async fn generator_diagnostics_async(
        &self,
        id: ProjectId,
        cancel: &CancellationToken,
    ) -> Result<Arc<Vec<String>>> {
        self.require_tracker(id)?.generator_diagnostics_async(self, cancel).await
    }

    /// A generated document from whatever generator output the project's
    /// tracker currently holds. Never runs generators.
    pub fn try_get_generated_document(&self, id: DocumentId) -> Option<GeneratedDocument> {
        self.tracker(id.project_id())?.try_get_generated_document(id)
    }

    pub async fn dependent_version(
        &self,
        id: ProjectId,
        cancel: &CancellationToken,
    ) -> Result<VersionStamp> {
        self.require_tracker(id)?.dependent_version(self, cancel).await
    }

    pub async fn dependent_semantic_version(
        &self,
        id: ProjectId,
        cancel: &CancellationToken,
    ) -> Result<VersionStamp> {
        self.require_tracker(id)?.dependent_semantic_version(self, cancel).await
    }

    pub async fn dependent_checksum(
        &self,
        id: ProjectId,
        cancel: &CancellationToken,
    ) -> Result<Checksum> {
        self.require_tracker(id)?.dependent_checksum(self, cancel).await
    }

    /// The project in this snapshot that produced `compilation`.
    pub fn owning_project(&self, compilation: &Compilation) -> Option<ProjectId> {
        AssemblyOwners::owner_of_compilation(compilation).filter(|id| self.contains_project(*id))
    }

    /// The project in this snapshot a metadata reference points at.
    pub fn owning_project_of_reference(&self, reference: &MetadataReference) -> Option<ProjectId> {
        AssemblyOwners::owner_of_reference(reference).filter(|id| self.contains_project(*id))
    }

    // ========================================================================
    // Freezing
    // ========================================================================

    /// A snapshot in which every project is final with whatever compilation
    /// it has right now. Never waits for a build. Memoized per snapshot.
    pub fn with_frozen_partial_compilations(&self) -> Solution {
        if self.0.frozen {
            return self.clone();
        }
        self.0
            .frozen_partial
            .get_or_init(|| self.freeze_all(None))
            .clone()
    }

    /// Like [`with_frozen_partial_compilations`](Self::with_frozen_partial_compilations),
    /// but the document's project is guaranteed to contain the document's
    /// current tree. Parses the document if needed.
    pub fn with_frozen_partial_compilation_for_document(
        &self,
        id: DocumentId,
        cancel: &CancellationToken,
    ) -> Result<Solution> {
        let document = self.require_document(id)?;
        let tree = document.get_tree(cancel)?;
        Ok(self.freeze_all(Some((document, tree))))
    }

    fn freeze_all(&self, with_tree: Option<(&DocumentRecord, SyntaxTree)>) -> Solution {
        let mut projects = FxHashMap::default();
        let mut trackers = FxHashMap::default();
        for (id, tracker) in self.0.trackers.iter() {
            let (frozen, record) = match &with_tree {
                Some((document, tree)) if document.id().project_id() == *id => {
                    tracker.freeze_partial_with_tree(self, document, tree)
                }
                _ => tracker.freeze_partial(self),
            };
            projects.insert(*id, record);
            trackers.insert(*id, Arc::new(frozen));
        }
        tracing::debug!(
            projects = projects.len(),
            document = ?with_tree.as_ref().map(|(d, _)| d.id()),
            "froze solution"
        );
        self.branch(
            self.0.project_ids.clone(),
            Arc::new(projects),
            Arc::new(trackers),
            self.0.graph.clone(),
            true,
        )
    }
}

impl fmt::Debug for Solution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Solution")
            .field("version", &self.0.version)
            .field("projects", &self.0.project_ids.len())
            .field("frozen", &self.0.frozen)
            .finish()
    }
}
