//! Compilation tracker states.

use std::fmt;
use std::sync::Arc;

use super::actions::TranslationAction;
use crate::compilation::{Compilation, RootedAssemblies};
use crate::error::{Error, Result};
use crate::generators::GeneratorState;

/// A fully reference-resolved, generator-expanded compilation.
#[derive(Debug, Clone)]
pub struct FinalState {
    /// Compilation including generated documents.
    pub with_generated: Compilation,
    /// Compilation without generated documents.
    pub without_generated: Compilation,
    pub generator: GeneratorState,
    /// Assemblies this compilation references, kept alive for reverse lookup.
    pub rooted: RootedAssemblies,
    pub has_successfully_loaded: bool,
    /// False for frozen snapshots, whose references are best effort.
    pub has_complete_references: bool,
}

impl FinalState {
    /// Check that generated documents and compilation trees agree.
    pub fn validate(&self) -> Result<()> {
        for document in self.generator.documents.iter() {
            if !self.with_generated.contains_syntax_tree(document.tree()) {
                return Err(Error::Integrity(format!(
                    "generated document {} is missing from its compilation",
                    document.id()
                )));
            }
        }
        let expected = self.without_generated.syntax_trees().len() + self.generator.documents.len();
        if self.with_generated.syntax_trees().len() != expected {
            return Err(Error::Integrity(format!(
                "compilation has {} trees, expected {}",
                self.with_generated.syntax_trees().len(),
                expected
            )));
        }
        for tree in self.without_generated.syntax_trees() {
            if !self.with_generated.contains_syntax_tree(tree) {
                return Err(Error::Integrity(format!(
                    "tree {} is missing from the generated compilation",
                    tree.id()
                )));
            }
        }
        Ok(())
    }
}

/// State of one project's compilation.
#[derive(Clone)]
pub enum TrackerState {
    /// Nothing built yet.
    Empty { generator: GeneratorState },
    /// Every document's tree is in the compilation; references and
    /// generators are not.
    AllTreesAssembled {
        compilation: Compilation,
        stale_generated: Option<Compilation>,
        generator: GeneratorState,
    },
    /// A draft compilation with edits still to apply, in order.
    InProgress {
        compilation: Compilation,
        stale_generated: Option<Compilation>,
        generator: GeneratorState,
        pending: Arc<Vec<TranslationAction>>,
    },
    Final(Arc<FinalState>),
}

impl TrackerState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Empty { .. } => "empty",
            Self::AllTreesAssembled { .. } => "all_trees_assembled",
            Self::InProgress { .. } => "in_progress",
            Self::Final(_) => "final",
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, Self::Final(_))
    }

    /// The best compilation without generated documents, if any work has
    /// been done.
    pub fn draft(&self) -> Option<&Compilation> {
        match self {
            Self::Empty { .. } => None,
            Self::AllTreesAssembled { compilation, .. } | Self::InProgress { compilation, .. } => {
                Some(compilation)
            }
            Self::Final(state) => Some(&state.without_generated),
        }
    }

    pub fn generator(&self) -> &GeneratorState {
        match self {
            Self::Empty { generator }
            | Self::AllTreesAssembled { generator, .. }
            | Self::InProgress { generator, .. } => generator,
            Self::Final(state) => &state.generator,
        }
    }

    pub fn pending_actions(&self) -> &[TranslationAction] {
        match self {
            Self::InProgress { pending, .. } => pending,
            _ => &[],
        }
    }

    /// The state after queuing `action`. Never final.
    pub fn fork(&self, action: Option<TranslationAction>) -> TrackerState {
        let generator = match &action {
            Some(action) => action.transform_generator_state(self.generator()),
            None => self.generator().clone(),
        };

        let (compilation, stale_generated, pending) = match self {
            Self::Empty { .. } => return Self::Empty { generator },
            Self::AllTreesAssembled {
                compilation,
                stale_generated,
                ..
            } => (compilation.clone(), stale_generated.clone(), Vec::new()),
            Self::InProgress {
                compilation,
                stale_generated,
                pending,
                ..
            } => (compilation.clone(), stale_generated.clone(), pending.to_vec()),
            Self::Final(state) => {
                let stale = state
                    .generator
                    .has_generators()
                    .then(|| state.with_generated.clone());
                (state.without_generated.clone(), stale, Vec::new())
            }
        };

        let mut pending = pending;
        if let Some(action) = action {
            match pending.last().and_then(|prior| action.try_merge(prior)) {
                Some(merged) => {
                    pending.pop();
                    pending.push(merged);
                }
                None => pending.push(action),
            }
        }

        Self::InProgress {
            compilation,
            stale_generated,
            generator,
            pending: Arc::new(pending),
        }
    }
}

impl fmt::Debug for TrackerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackerState")
            .field("state", &self.name())
            .field("pending", &self.pending_actions().len())
            .field("generator", self.generator())
            .finish()
    }
}
