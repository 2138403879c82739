//! Pending edits applied lazily to a draft compilation.

use std::fmt;

use rayon::prelude::*;
use tokio_util::sync::CancellationToken;

use crate::compilation::Compilation;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::generators::GeneratorState;
use crate::solution::{DocumentRecord, ProjectRecord};
use crate::syntax::SyntaxTree;

/// What changed.
#[derive(Clone)]
pub enum ActionKind {
    /// Source documents were added, in order.
    AddDocuments(Vec<DocumentRecord>),
    /// Source documents were removed.
    RemoveDocuments(Vec<DocumentRecord>),
    /// One source document's text changed.
    TouchDocument {
        old: DocumentRecord,
        new: DocumentRecord,
    },
    /// Additional or config documents were added, removed or edited.
    AdditionalDocumentsChanged,
    /// Parse options changed; every tree is replaced.
    ReplaceAllSyntaxTrees,
    CompilationOptions,
    ReferencesChanged,
    GeneratorsChanged,
    AssemblyName,
}

impl ActionKind {
    fn name(&self) -> &'static str {
        match self {
            Self::AddDocuments(_) => "add_documents",
            Self::RemoveDocuments(_) => "remove_documents",
            Self::TouchDocument { .. } => "touch_document",
            Self::AdditionalDocumentsChanged => "additional_documents_changed",
            Self::ReplaceAllSyntaxTrees => "replace_all_syntax_trees",
            Self::CompilationOptions => "compilation_options",
            Self::ReferencesChanged => "references_changed",
            Self::GeneratorsChanged => "generators_changed",
            Self::AssemblyName => "assembly_name",
        }
    }
}

/// One queued edit: the project before and after, and what changed.
#[derive(Clone)]
pub struct TranslationAction {
    pub old_project: ProjectRecord,
    pub new_project: ProjectRecord,
    pub kind: ActionKind,
}

impl TranslationAction {
    pub fn new(old_project: ProjectRecord, new_project: ProjectRecord, kind: ActionKind) -> Self {
        Self {
            old_project,
            new_project,
            kind,
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    /// Whether applying this action to a stale generator-augmented
    /// compilation keeps it usable: the action must leave the generated
    /// trees valid as they are.
    pub fn can_update_stale_generated_compilation(&self) -> bool {
        !matches!(
            self.kind,
            ActionKind::ReplaceAllSyntaxTrees | ActionKind::GeneratorsChanged
        )
    }

    /// Apply the action to a draft compilation.
    pub async fn transform_compilation(
        &self,
        compilation: Compilation,
        config: &EngineConfig,
        cancel: &CancellationToken,
    ) -> Result<Compilation> {
        match &self.kind {
            ActionKind::AddDocuments(documents) => {
                let trees = get_trees(documents, config, cancel).await?;
                Ok(compilation.add_syntax_trees(trees))
            }
            ActionKind::RemoveDocuments(documents) => {
                let mut trees = Vec::with_capacity(documents.len());
                for document in documents {
                    trees.push(document.get_tree_async(cancel).await?);
                }
                Ok(compilation.remove_syntax_trees(&trees))
            }
            ActionKind::TouchDocument { old, new } => {
                let old_tree = old.get_tree_async(cancel).await?;
                let new_tree = new.get_tree_async(cancel).await?;
                Ok(compilation.replace_syntax_tree(&old_tree, new_tree))
            }
            ActionKind::ReplaceAllSyntaxTrees => {
                let documents: Vec<DocumentRecord> =
                    self.new_project.documents().iter().cloned().collect();
                let trees = get_trees(&documents, config, cancel).await?;
                Ok(compilation.remove_all_syntax_trees().add_syntax_trees(trees))
            }
            ActionKind::CompilationOptions => {
                Ok(compilation.with_options(self.new_project.compilation_options().clone()))
            }
            ActionKind::AssemblyName => {
                Ok(compilation.with_assembly_name(self.new_project.assembly_name()))
            }
            ActionKind::AdditionalDocumentsChanged
            | ActionKind::ReferencesChanged
            | ActionKind::GeneratorsChanged => Ok(compilation),
        }
    }

    /// Update generator bookkeeping for this action.
    ///
    /// Any edit invalidates the finality of previously generated documents.
    pub fn transform_generator_state(&self, state: &GeneratorState) -> GeneratorState {
        let state = state.with_documents_are_final(false);
        match &self.kind {
            ActionKind::GeneratorsChanged => {
                state.with_driver(self.new_project.generator_driver().cloned())
            }
            _ => state,
        }
    }

    /// Merge `self`, queued right after `prior`, into a single action.
    pub fn try_merge(&self, prior: &TranslationAction) -> Option<TranslationAction> {
        let kind = match (&prior.kind, &self.kind) {
            (
                ActionKind::TouchDocument {
                    old,
                    new: prior_new,
                },
                ActionKind::TouchDocument { old: next_old, new },
            ) if prior_new.id() == next_old.id() => ActionKind::TouchDocument {
                old: old.clone(),
                new: new.clone(),
            },
            (ActionKind::CompilationOptions, ActionKind::CompilationOptions) => {
                ActionKind::CompilationOptions
            }
            (ActionKind::ReferencesChanged, ActionKind::ReferencesChanged) => {
                ActionKind::ReferencesChanged
            }
            (ActionKind::AdditionalDocumentsChanged, ActionKind::AdditionalDocumentsChanged) => {
                ActionKind::AdditionalDocumentsChanged
            }
            (ActionKind::AssemblyName, ActionKind::AssemblyName) => ActionKind::AssemblyName,
            _ => return None,
        };
        Some(TranslationAction::new(
            prior.old_project.clone(),
            self.new_project.clone(),
            kind,
        ))
    }
}

impl fmt::Debug for TranslationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TranslationAction")
            .field("kind", &self.name())
            .field("project", &self.new_project.id())
            .finish()
    }
}

/// Trees for `documents`, in order. Large batches are parsed on the rayon
/// pool; the trees are memoized in the documents either way.
async fn get_trees(
    documents: &[DocumentRecord],
    config: &EngineConfig,
    cancel: &CancellationToken,
) -> Result<Vec<SyntaxTree>> {
    let pending = documents
        .iter()
        .filter(|d| d.try_get_tree().is_none())
        .count();

    if pending < config.parallel_parse_threshold.max(2) {
        let mut trees = Vec::with_capacity(documents.len());
        for document in documents {
            trees.push(document.get_tree_async(cancel).await?);
        }
        return Ok(trees);
    }

    // Load texts asynchronously first so the blocking pool never waits on I/O.
    for document in documents {
        document.get_text_async(cancel).await?;
    }

    let documents = documents.to_vec();
    let token = cancel.clone();
    tokio::task::spawn_blocking(move || {
        documents
            .par_iter()
            .map(|document| document.get_tree(&token))
            .collect::<Result<Vec<_>>>()
    })
    .await
    .map_err(|e| Error::Unreachable(format!("parse task failed: {}", e)))?
}
