//! Syntax trees and the language service seam.
//!
//! The engine never looks inside a tree beyond its declaration summary.
//! Parsing is delegated to a [`LanguageService`] registered per language.

mod rust;

pub use rust::{RUST_LANGUAGE, RustLanguage};

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::compilation::Compilation;
use crate::error::Result;
use crate::ids::{DocumentId, LanguageId};
use crate::text::SourceText;

/// How a document's text should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SourceKind {
    /// A regular source file made of items.
    #[default]
    Regular,
    /// An interactive submission: statements and items.
    Script,
}

/// Options handed to the parser for every document of a project.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ParseOptions {
    pub kind: SourceKind,
    /// Enabled conditional-compilation features.
    pub features: Vec<String>,
}

impl ParseOptions {
    pub fn script() -> Self {
        Self {
            kind: SourceKind::Script,
            ..Default::default()
        }
    }

    pub fn with_feature(mut self, feature: impl Into<String>) -> Self {
        self.features.push(feature.into());
        self
    }
}

/// Kind of a top-level declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeclarationKind {
    Function,
    Struct,
    Enum,
    Union,
    Trait,
    Impl,
    TypeAlias,
    Const,
    Static,
    Module,
    Use,
    Macro,
    Other,
}

impl DeclarationKind {
    /// True for declarations that introduce a named type.
    pub fn is_type(self) -> bool {
        matches!(
            self,
            Self::Struct | Self::Enum | Self::Union | Self::Trait | Self::TypeAlias
        )
    }
}

/// The public shape of one declaration: what other code can observe.
///
/// Function bodies are not part of the shape, so editing a body leaves the
/// declaration unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Declaration {
    pub kind: DeclarationKind,
    pub name: String,
    pub signature: String,
}

/// A parse error attached to a tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxDiagnostic {
    pub message: String,
    /// 1-based line and 0-based column, when known.
    pub position: Option<(usize, usize)>,
}

static NEXT_TREE_ID: AtomicU64 = AtomicU64::new(1);

/// An immutable syntax tree.
///
/// A tree is produced even for text with syntax errors; the errors are
/// carried as diagnostics. Clones share the same tree object, which
/// [`SyntaxTree::ptr_eq`] observes.
#[derive(Clone)]
pub struct SyntaxTree(Arc<SyntaxTreeInner>);

struct SyntaxTreeInner {
    id: u64,
    file_path: Option<PathBuf>,
    text: SourceText,
    options: ParseOptions,
    declarations: Vec<Declaration>,
    diagnostics: Vec<SyntaxDiagnostic>,
    owner: OnceLock<DocumentId>,
}

impl SyntaxTree {
    pub fn new(
        text: SourceText,
        file_path: Option<PathBuf>,
        options: ParseOptions,
        declarations: Vec<Declaration>,
        diagnostics: Vec<SyntaxDiagnostic>,
    ) -> Self {
        Self(Arc::new(SyntaxTreeInner {
            id: NEXT_TREE_ID.fetch_add(1, Ordering::Relaxed),
            file_path,
            text,
            options,
            declarations,
            diagnostics,
            owner: OnceLock::new(),
        }))
    }

    /// Process-unique id of this tree object.
    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn file_path(&self) -> Option<&Path> {
        self.0.file_path.as_deref()
    }

    pub fn text(&self) -> &SourceText {
        &self.0.text
    }

    /// Length of the text the tree covers, in bytes.
    pub fn len(&self) -> usize {
        self.0.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.text.is_empty()
    }

    pub fn options(&self) -> &ParseOptions {
        &self.0.options
    }

    pub fn declarations(&self) -> &[Declaration] {
        &self.0.declarations
    }

    pub fn diagnostics(&self) -> &[SyntaxDiagnostic] {
        &self.0.diagnostics
    }

    pub fn has_errors(&self) -> bool {
        !self.0.diagnostics.is_empty()
    }

    /// True if the tree declares a type called `name` at any nesting level.
    pub fn declares_type(&self, name: &str) -> bool {
        self.0.declarations.iter().any(|d| {
            d.kind.is_type() && (d.name == name || d.name.rsplit("::").next() == Some(name))
        })
    }

    /// The document this tree was produced for, if any document has
    /// claimed it.
    pub fn owner_document(&self) -> Option<DocumentId> {
        self.0.owner.get().copied()
    }

    /// Record `document` as the owner. The first claim wins; returns the
    /// owner on record afterwards.
    pub(crate) fn claim_owner(&self, document: DocumentId) -> DocumentId {
        *self.0.owner.get_or_init(|| document)
    }

    pub fn ptr_eq(&self, other: &SyntaxTree) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for SyntaxTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyntaxTree")
            .field("id", &self.0.id)
            .field("file_path", &self.0.file_path)
            .field("len", &self.len())
            .field("declarations", &self.0.declarations.len())
            .field("diagnostics", &self.0.diagnostics.len())
            .finish()
    }
}

/// Parser collaborator for one language.
pub trait LanguageService: Send + Sync {
    fn language(&self) -> LanguageId;

    /// Parse `text` into a tree.
    ///
    /// Syntax errors must not fail the call; they belong in the tree's
    /// diagnostics. `Err` is reserved for cancellation and genuine faults.
    fn parse(
        &self,
        text: &SourceText,
        file_path: Option<&Path>,
        options: &ParseOptions,
        cancel: &CancellationToken,
    ) -> Result<SyntaxTree>;

    /// Whether `new` has the same public shape as `old`.
    fn is_structurally_equivalent(&self, old: &SyntaxTree, new: &SyntaxTree) -> bool {
        old.declarations() == new.declarations()
    }

    /// Whether the compilation declares the root object type itself, which
    /// makes it loadable without any metadata references.
    fn defines_root_object_type(&self, compilation: &Compilation, root_type_name: &str) -> bool {
        compilation
            .syntax_trees()
            .iter()
            .any(|tree| tree.declares_type(root_type_name))
    }
}

impl fmt::Debug for dyn LanguageService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LanguageService({})", self.language())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(declarations: Vec<Declaration>) -> SyntaxTree {
        SyntaxTree::new(
            SourceText::new("x"),
            None,
            ParseOptions::default(),
            declarations,
            Vec::new(),
        )
    }

    #[test]
    fn test_trees_have_distinct_identity() {
        let a = tree(Vec::new());
        let b = tree(Vec::new());
        assert!(!a.ptr_eq(&b));
        assert!(a.ptr_eq(&a.clone()));
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_declares_type_matches_nested_names() {
        let t = tree(vec![
            Declaration {
                kind: DeclarationKind::Struct,
                name: "core::Object".into(),
                signature: "pub struct Object".into(),
            },
            Declaration {
                kind: DeclarationKind::Function,
                name: "Value".into(),
                signature: "fn Value()".into(),
            },
        ]);
        assert!(t.declares_type("Object"));
        assert!(!t.declares_type("Value"));
    }
}
