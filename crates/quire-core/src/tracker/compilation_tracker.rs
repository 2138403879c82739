//! The per-project compilation state machine.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use arc_swap::ArcSwap;
use futures::future::{BoxFuture, FutureExt};
use rustc_hash::FxHashSet;
use tokio_util::sync::CancellationToken;

use super::actions::{ActionKind, TranslationAction};
use super::references::resolve_project_references;
use super::skeleton::SkeletonReferenceCache;
use super::state::{FinalState, TrackerState};
use crate::compilation::{AssemblyOwners, Compilation, MetadataReference, RootedAssemblies};
use crate::error::{Error, Result};
use crate::fault::{Fault, FaultSeverity};
use crate::generators::{
    GeneratedDocument, GeneratedDocuments, GeneratorInputs, GeneratorState, run_generators,
};
use crate::ids::{Checksum, DocumentId, VersionStamp};
use crate::policy::{CreationMode, CreationPolicy};
use crate::solution::{DocumentRecord, DocumentSet, ProjectRecord, ProjectReference, Solution};
use crate::syntax::SyntaxTree;
use crate::versions::{self, TrackerVersions};

/// Owns the evolving compilation of one project.
///
/// A tracker is tied to one project record. Every project change forks a
/// new tracker; the old one keeps serving the snapshots that hold it.
pub struct CompilationTracker {
    project: ProjectRecord,
    state: ArcSwap<TrackerState>,
    build_gate: tokio::sync::Mutex<()>,
    skeletons: SkeletonReferenceCache,
    creation_policy: CreationPolicy,
    pub(crate) versions: TrackerVersions,
}

impl CompilationTracker {
    /// A tracker for a project that has never been built.
    pub fn new(project: ProjectRecord) -> Self {
        let generator = GeneratorState::new(project.generator_driver().cloned());
        Self::with_state(
            project,
            TrackerState::Empty { generator },
            SkeletonReferenceCache::new(),
            CreationPolicy::CREATE,
        )
    }

    fn with_state(
        project: ProjectRecord,
        state: TrackerState,
        skeletons: SkeletonReferenceCache,
        creation_policy: CreationPolicy,
    ) -> Self {
        Self {
            project,
            state: ArcSwap::from_pointee(state),
            build_gate: tokio::sync::Mutex::new(()),
            skeletons,
            creation_policy,
            versions: TrackerVersions::default(),
        }
    }

    pub fn project(&self) -> &ProjectRecord {
        &self.project
    }

    /// Current state. Never blocks.
    pub fn state(&self) -> Arc<TrackerState> {
        self.state.load_full()
    }

    pub fn creation_policy(&self) -> CreationPolicy {
        self.creation_policy
    }

    pub(crate) fn skeletons(&self) -> &SkeletonReferenceCache {
        &self.skeletons
    }

    fn publish(&self, state: TrackerState) {
        tracing::trace!(
            project = %self.project.id(),
            state = state.name(),
            pending = state.pending_actions().len(),
            "publishing tracker state"
        );
        self.state.store(Arc::new(state));
    }

    // ========================================================================
    // Forking
    // ========================================================================

    /// A tracker for `new_project` with `action` queued.
    ///
    /// Forking never produces a final state. A tracker that has done no work
    /// stays empty and only carries the generator driver forward.
    pub fn fork(
        &self,
        new_project: ProjectRecord,
        action: Option<TranslationAction>,
    ) -> CompilationTracker {
        let state = self.state.load_full();
        let mut forked = state.fork(action);
        if let TrackerState::Empty { generator } = &mut forked {
            *generator = generator.with_driver(new_project.generator_driver().cloned());
        }
        Self::with_state(
            new_project,
            forked,
            self.skeletons.clone(),
            self.creation_policy,
        )
    }

    /// Same project with a different creation policy.
    ///
    /// With generated-document creation allowed, a final state is reopened
    /// so that the next build runs generators again. `force_regeneration`
    /// additionally drops the driver's accumulated state.
    pub fn with_creation_policy(
        &self,
        policy: CreationPolicy,
        force_regeneration: bool,
    ) -> CompilationTracker {
        let state = self.state.load_full();
        let reopen = policy.generated_documents != CreationMode::DoNotCreate;

        let mut next = match &*state {
            TrackerState::Final(_) if reopen => state.fork(None),
            other => other.clone(),
        };
        if reopen {
            let driver = self.project.generator_driver().cloned();
            let reset = |generator: &mut GeneratorState| {
                *generator = generator.with_documents_are_final(false);
                if force_regeneration {
                    *generator = generator.with_driver(driver.clone());
                }
            };
            match &mut next {
                TrackerState::Empty { generator }
                | TrackerState::AllTreesAssembled { generator, .. }
                | TrackerState::InProgress { generator, .. } => reset(generator),
                TrackerState::Final(_) => {}
            }
        }

        Self::with_state(self.project.clone(), next, self.skeletons.clone(), policy)
    }

    /// Same project, but later builds neither run generators nor build new
    /// skeletons.
    pub fn with_frozen_policy(&self) -> CompilationTracker {
        self.with_creation_policy(CreationPolicy::DO_NOT_CREATE, false)
    }

    // ========================================================================
    // Reading
    // ========================================================================

    /// The final compilation, if the tracker is final. Never blocks.
    pub fn try_get_compilation(&self) -> Option<Compilation> {
        match &*self.state.load_full() {
            TrackerState::Final(state) => Some(state.with_generated.clone()),
            _ => None,
        }
    }

    /// The final compilation, building it if necessary.
    pub fn get_compilation_async<'a>(
        &'a self,
        solution: &'a Solution,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Compilation>> {
        async move {
            let state = self.get_final_state_async(solution, cancel).await?;
            Ok(state.with_generated.clone())
        }
        .boxed()
    }

    pub async fn has_successfully_loaded_async(
        &self,
        solution: &Solution,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        Ok(self
            .get_final_state_async(solution, cancel)
            .await?
            .has_successfully_loaded)
    }

    pub async fn generated_documents_async(
        &self,
        solution: &Solution,
        cancel: &CancellationToken,
    ) -> Result<GeneratedDocuments> {
        Ok(self
            .get_final_state_async(solution, cancel)
            .await?
            .generator
            .documents
            .clone())
    }

    pub async fn generator_diagnostics_async(
        &self,
        solution: &Solution,
        cancel: &CancellationToken,
    ) -> Result<Arc<Vec<String>>> {
        Ok(self
            .get_final_state_async(solution, cancel)
            .await?
            .generator
            .diagnostics
            .clone())
    }

    /// A generated document from whatever state the tracker is in.
    pub fn try_get_generated_document(&self, id: DocumentId) -> Option<GeneratedDocument> {
        self.state.load_full().generator().documents.get(id).cloned()
    }

    /// A reference to whatever draft compilation exists, for a project of
    /// the same language. Never blocks.
    pub fn get_partial_metadata_reference(
        &self,
        from_project: &ProjectRecord,
        reference: &ProjectReference,
    ) -> Option<MetadataReference> {
        if from_project.language() != self.project.language() {
            return None;
        }
        let state = self.state.load_full();
        let compilation = match &*state {
            TrackerState::Final(state) => Some(&state.with_generated),
            other => other.draft(),
        }?;
        Some(compilation.to_metadata_reference(reference.properties.clone()))
    }

    // ========================================================================
    // Versions
    // ========================================================================

    pub async fn dependent_version(
        &self,
        solution: &Solution,
        cancel: &CancellationToken,
    ) -> Result<VersionStamp> {
        versions::dependent_version(self, solution, cancel).await
    }

    pub async fn dependent_semantic_version(
        &self,
        solution: &Solution,
        cancel: &CancellationToken,
    ) -> Result<VersionStamp> {
        versions::dependent_semantic_version(self, solution, cancel).await
    }

    pub async fn dependent_checksum(
        &self,
        solution: &Solution,
        cancel: &CancellationToken,
    ) -> Result<Checksum> {
        versions::dependent_checksum(self, solution, cancel).await
    }

    // ========================================================================
    // Building
    // ========================================================================

    /// The final state, building it if necessary.
    ///
    /// One builder at a time drains the queue; concurrent callers wait on the
    /// build gate and then observe the published final state.
    pub fn get_final_state_async<'a>(
        &'a self,
        solution: &'a Solution,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Arc<FinalState>>> {
        async move {
            if let TrackerState::Final(state) = &*self.state.load_full() {
                return Ok(state.clone());
            }

            let _gate = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                gate = self.build_gate.lock() => gate,
            };

            if let TrackerState::Final(state) = &*self.state.load_full() {
                return Ok(state.clone());
            }

            let project = self.project.id();
            let outcome = AssertUnwindSafe(self.build_final_state(solution, cancel))
                .catch_unwind()
                .await;

            let error = match outcome {
                Ok(Ok(state)) => return Ok(state),
                Ok(Err(e)) if e.is_cancelled() => return Err(e),
                Ok(Err(e)) => e,
                Err(panic) => {
                    let message = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    Error::Unreachable(format!("build panicked: {}", message))
                }
            };

            solution.services().fault_reporter().report(&Fault::new(
                FaultSeverity::Critical,
                format!("building {}", project),
                error.clone(),
            ));
            Err(match error {
                Error::Unreachable(_) => error,
                other => Error::Unreachable(format!("build of {} failed: {}", project, other)),
            })
        }
        .boxed()
    }

    async fn build_final_state(
        &self,
        solution: &Solution,
        cancel: &CancellationToken,
    ) -> Result<Arc<FinalState>> {
        let config = solution.services().config().clone();
        let project = &self.project;

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let state = self.state.load_full();
            match &*state {
                TrackerState::Final(state) => return Ok(state.clone()),

                TrackerState::Empty { generator } => {
                    let compilation = Compilation::new(
                        project.assembly_name(),
                        project.language().clone(),
                        project.compilation_options().clone(),
                    );
                    let documents: Vec<DocumentRecord> =
                        project.documents().iter().cloned().collect();
                    let pending: Vec<TranslationAction> = documents
                        .chunks(config.add_documents_batch_size.max(1))
                        .map(|batch| {
                            TranslationAction::new(
                                project.clone(),
                                project.clone(),
                                ActionKind::AddDocuments(batch.to_vec()),
                            )
                        })
                        .collect();
                    tracing::debug!(
                        project = %project.id(),
                        documents = documents.len(),
                        batches = pending.len(),
                        "building compilation from scratch"
                    );
                    self.publish(TrackerState::InProgress {
                        compilation,
                        stale_generated: None,
                        generator: generator.clone(),
                        pending: Arc::new(pending),
                    });
                }

                TrackerState::InProgress {
                    compilation,
                    stale_generated,
                    generator,
                    pending,
                } => {
                    let Some((action, rest)) = pending.split_first() else {
                        self.publish(TrackerState::AllTreesAssembled {
                            compilation: compilation.clone(),
                            stale_generated: stale_generated.clone(),
                            generator: generator.clone(),
                        });
                        continue;
                    };

                    tracing::trace!(
                        project = %project.id(),
                        action = action.name(),
                        "applying action"
                    );
                    let next = action
                        .transform_compilation(compilation.clone(), &config, cancel)
                        .await?;
                    let next_stale = match stale_generated {
                        Some(stale)
                            if generator.has_generators()
                                && action.can_update_stale_generated_compilation() =>
                        {
                            Some(
                                action
                                    .transform_compilation(stale.clone(), &config, cancel)
                                    .await?,
                            )
                        }
                        _ => None,
                    };

                    self.publish(TrackerState::InProgress {
                        compilation: next,
                        stale_generated: next_stale,
                        generator: generator.clone(),
                        pending: Arc::new(rest.to_vec()),
                    });
                }

                TrackerState::AllTreesAssembled {
                    compilation,
                    stale_generated,
                    generator,
                } => {
                    let final_state = self
                        .finalize(
                            solution,
                            compilation.clone(),
                            stale_generated.clone(),
                            generator.clone(),
                            cancel,
                        )
                        .await?;
                    if config.validate_states {
                        final_state.validate()?;
                    }
                    let final_state = Arc::new(final_state);
                    self.publish(TrackerState::Final(final_state.clone()));
                    tracing::debug!(
                        project = %project.id(),
                        trees = final_state.with_generated.syntax_trees().len(),
                        has_successfully_loaded = final_state.has_successfully_loaded,
                        "compilation finalized"
                    );
                    return Ok(final_state);
                }
            }
        }
    }

    /// Resolve references, run generators and assemble the final state.
    async fn finalize(
        &self,
        solution: &Solution,
        compilation: Compilation,
        stale_generated: Option<Compilation>,
        generator: GeneratorState,
        cancel: &CancellationToken,
    ) -> Result<FinalState> {
        let project = &self.project;
        let services = solution.services();
        let language = services.language(project.language())?;

        let resolved = resolve_project_references(
            project,
            solution,
            self.creation_policy.skeleton_references,
            cancel,
        )
        .await?;

        let mut references = project.metadata_references().to_vec();
        references.extend(resolved.references);
        let base = compilation
            .with_references(references)
            .with_previous_submission(resolved.previous_submission);

        let has_successfully_loaded = resolved.all_resolved
            && project.has_all_information()
            && (!base.references().is_empty()
                || language
                    .defines_root_object_type(&base, &services.config().root_object_type_name));

        let additional_texts = if generator.has_generators() {
            project.additional_texts_async(cancel).await?
        } else {
            Vec::new()
        };
        let outcome = run_generators(
            &base,
            stale_generated,
            generator,
            GeneratorInputs {
                project: project.id(),
                language: language.as_ref(),
                parse_options: project.parse_options(),
                additional_texts: &additional_texts,
                mode: self.creation_policy.generated_documents,
            },
            cancel,
        )
        .await?;

        AssemblyOwners::record_compilation(&base, project.id());
        AssemblyOwners::record_compilation(&outcome.with_generated, project.id());

        Ok(FinalState {
            with_generated: outcome.with_generated,
            without_generated: base,
            generator: outcome.state,
            rooted: resolved.rooted,
            has_successfully_loaded,
            has_complete_references: true,
        })
    }

    // ========================================================================
    // Freezing
    // ========================================================================

    /// A final tracker built from whatever draft exists, without waiting for
    /// pending work. References are best effort and generators do not run.
    ///
    /// Returns the frozen tracker and the project record that matches its
    /// compilation exactly.
    pub fn freeze_partial(&self, solution: &Solution) -> (CompilationTracker, ProjectRecord) {
        self.freeze(solution, None)
    }

    /// Like [`freeze_partial`](Self::freeze_partial), but the frozen
    /// compilation is guaranteed to contain `tree` for `document`.
    pub fn freeze_partial_with_tree(
        &self,
        solution: &Solution,
        document: &DocumentRecord,
        tree: &SyntaxTree,
    ) -> (CompilationTracker, ProjectRecord) {
        self.freeze(solution, Some((document, tree)))
    }

    fn freeze(
        &self,
        solution: &Solution,
        with_tree: Option<(&DocumentRecord, &SyntaxTree)>,
    ) -> (CompilationTracker, ProjectRecord) {
        let state = self.state.load_full();

        if let TrackerState::Final(final_state) = &*state
            && with_tree
                .is_none_or(|(_, tree)| final_state.without_generated.contains_syntax_tree(tree))
        {
            let tracker = Self::with_state(
                self.project.clone(),
                TrackerState::Final(final_state.clone()),
                self.skeletons.clone(),
                CreationPolicy::DO_NOT_CREATE,
            );
            return (tracker, self.project.clone());
        }

        let (mut compilation, generator, from_final) = match &*state {
            TrackerState::Final(final_state) => (
                final_state.without_generated.clone(),
                final_state.generator.clone(),
                Some(final_state.clone()),
            ),
            TrackerState::Empty { generator } => (
                Compilation::new(
                    self.project.assembly_name(),
                    self.project.language().clone(),
                    self.project.compilation_options().clone(),
                )
                .add_syntax_trees(
                    self.project
                        .documents()
                        .iter()
                        .filter_map(DocumentRecord::try_get_tree),
                ),
                generator.clone(),
                None,
            ),
            TrackerState::AllTreesAssembled {
                compilation,
                generator,
                ..
            }
            | TrackerState::InProgress {
                compilation,
                generator,
                ..
            } => (compilation.clone(), generator.clone(), None),
        };

        if let Some((document, tree)) = with_tree {
            compilation = include_tree(compilation, document.id(), tree);
        }

        let (compilation, documents) = self.match_documents(compilation, with_tree.map(|(d, _)| d));
        let frozen_project = self.project.with_source_documents(documents);

        let compilation = match &from_final {
            Some(_) => compilation,
            None => {
                let mut references = self.project.metadata_references().to_vec();
                for reference in self.project.project_references() {
                    let Some(tracker) = solution.tracker(reference.project_id) else {
                        continue;
                    };
                    let partial = tracker
                        .get_partial_metadata_reference(&self.project, reference)
                        .or_else(|| {
                            tracker
                                .skeletons()
                                .try_get_reference(None, &reference.properties)
                        });
                    if let Some(partial) = partial {
                        references.push(partial);
                    }
                }
                compilation.with_references(references)
            }
        };

        let with_generated = if generator.documents.is_empty() {
            compilation.clone()
        } else {
            compilation.add_syntax_trees(generator.documents.trees())
        };

        AssemblyOwners::record_compilation(&compilation, self.project.id());
        AssemblyOwners::record_compilation(&with_generated, self.project.id());

        let final_state = FinalState {
            with_generated,
            without_generated: compilation,
            generator: generator.with_documents_are_final(true),
            rooted: from_final
                .as_ref()
                .map(|f| f.rooted.clone())
                .unwrap_or_else(RootedAssemblies::new),
            has_successfully_loaded: from_final.as_ref().is_some_and(|f| f.has_successfully_loaded),
            has_complete_references: false,
        };

        tracing::debug!(
            project = %self.project.id(),
            from = state.name(),
            trees = final_state.without_generated.syntax_trees().len(),
            "froze partial compilation"
        );

        let tracker = Self::with_state(
            frozen_project.clone(),
            TrackerState::Final(Arc::new(final_state)),
            self.skeletons.clone(),
            CreationPolicy::DO_NOT_CREATE,
        );
        (tracker, frozen_project)
    }

    /// Pair every tree of `compilation` with a document record. Trees whose
    /// document is gone are dropped from the compilation, and documents
    /// without a tree are dropped from the project.
    fn match_documents(
        &self,
        compilation: Compilation,
        requested: Option<&DocumentRecord>,
    ) -> (Compilation, DocumentSet) {
        let mut seen = FxHashSet::default();
        let mut records = Vec::new();
        let mut orphans = Vec::new();

        for tree in compilation.syntax_trees() {
            let record = tree.owner_document().and_then(|id| match requested {
                Some(document) if document.id() == id => Some(document.clone()),
                _ => self.project.documents().get(id).cloned(),
            });
            match record {
                Some(record) if seen.insert(record.id()) => {
                    let current = record.try_get_tree().is_some_and(|t| t.ptr_eq(tree));
                    records.push(if current {
                        record
                    } else {
                        record.with_frozen_tree(tree.clone())
                    });
                }
                _ => orphans.push(tree.clone()),
            }
        }

        let compilation = compilation.remove_syntax_trees(&orphans);
        (compilation, DocumentSet::from_records(records))
    }
}

/// Put `tree` into `compilation` for `document`: replace the document's
/// current tree, else evict a tree with the same file path, else add.
fn include_tree(compilation: Compilation, document: DocumentId, tree: &SyntaxTree) -> Compilation {
    if compilation.contains_syntax_tree(tree) {
        return compilation;
    }
    let by_document = compilation
        .syntax_trees()
        .iter()
        .find(|t| t.owner_document() == Some(document))
        .cloned();
    if let Some(old) = by_document {
        return compilation.replace_syntax_tree(&old, tree.clone());
    }
    let by_path = tree.file_path().and_then(|path| {
        compilation
            .syntax_trees()
            .iter()
            .find(|t| t.file_path() == Some(path))
            .cloned()
    });
    match by_path {
        Some(old) => compilation.replace_syntax_tree(&old, tree.clone()),
        None => compilation.add_syntax_trees([tree.clone()]),
    }
}

impl std::fmt::Debug for CompilationTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompilationTracker")
            .field("project", &self.project.id())
            .field("state", &self.state.load().name())
            .field("creation_policy", &self.creation_policy)
            .finish()
    }
}
