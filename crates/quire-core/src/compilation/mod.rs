//! Immutable compilation values.
//!
//! A [`Compilation`] is a set of syntax trees, a set of metadata references
//! and options. Every operation returns a new value; existing compilations
//! are never modified, so any snapshot can keep handing out the compilation
//! it observed.

mod identity;

pub use identity::{AssemblyOwners, RootedAssemblies};

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::ids::{Checksum, LanguageId};
use crate::syntax::{Declaration, SyntaxTree};

// ============================================================================
// Options
// ============================================================================

/// Kind of artifact a project produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum OutputKind {
    #[default]
    Library,
    Executable,
}

/// Options that apply to a whole compilation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct CompilationOptions {
    pub output_kind: OutputKind,
    pub optimize: bool,
    pub warnings_as_errors: bool,
}

impl CompilationOptions {
    pub fn checksum(&self) -> Checksum {
        Checksum::of_str(&format!("{:?}", self))
    }
}

/// Properties of a metadata reference that change how it is bound.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct MetadataReferenceProperties {
    pub aliases: Vec<String>,
    pub embed_interop_types: bool,
}

impl MetadataReferenceProperties {
    pub fn checksum(&self) -> Checksum {
        Checksum::of_str(&format!("{:?}", self))
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    pub fn with_embed_interop_types(mut self, embed: bool) -> Self {
        self.embed_interop_types = embed;
        self
    }
}

// ============================================================================
// Metadata images and references
// ============================================================================

static NEXT_ASSEMBLY_ID: AtomicU64 = AtomicU64::new(1);

fn next_assembly_id() -> u64 {
    NEXT_ASSEMBLY_ID.fetch_add(1, Ordering::Relaxed)
}

/// A metadata-only image of a compilation: its public declarations and
/// nothing else.
#[derive(Debug)]
pub struct MetadataImage {
    id: u64,
    pub assembly_name: String,
    pub declarations: Vec<Declaration>,
    pub checksum: Checksum,
}

impl MetadataImage {
    pub fn new(assembly_name: impl Into<String>, declarations: Vec<Declaration>) -> Self {
        let checksum = Checksum::combine(
            declarations
                .iter()
                .map(|d| Checksum::of_str(&format!("{:?}:{}:{}", d.kind, d.name, d.signature))),
        );
        Self {
            id: next_assembly_id(),
            assembly_name: assembly_name.into(),
            declarations,
            checksum,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

/// A reference from one compilation to an external assembly.
#[derive(Clone)]
pub enum MetadataReference {
    /// Direct reference to another compilation of the same language.
    Compilation {
        compilation: Compilation,
        properties: MetadataReferenceProperties,
    },
    /// Reference to a metadata-only skeleton image.
    Skeleton {
        image: Arc<MetadataImage>,
        properties: MetadataReferenceProperties,
    },
    /// Reference to a prebuilt library on disk.
    File {
        path: PathBuf,
        properties: MetadataReferenceProperties,
    },
}

impl MetadataReference {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File {
            path: path.into(),
            properties: MetadataReferenceProperties::default(),
        }
    }

    pub fn properties(&self) -> &MetadataReferenceProperties {
        match self {
            Self::Compilation { properties, .. }
            | Self::Skeleton { properties, .. }
            | Self::File { properties, .. } => properties,
        }
    }

    pub fn display_name(&self) -> String {
        match self {
            Self::Compilation { compilation, .. } => compilation.assembly_name().to_string(),
            Self::Skeleton { image, .. } => image.assembly_name.clone(),
            Self::File { path, .. } => path.display().to_string(),
        }
    }

    /// Whether both references point at the same target object with the
    /// same properties.
    pub fn same_target(&self, other: &MetadataReference) -> bool {
        let same = match (self, other) {
            (
                Self::Compilation { compilation: a, .. },
                Self::Compilation { compilation: b, .. },
            ) => a.ptr_eq(b),
            (Self::Skeleton { image: a, .. }, Self::Skeleton { image: b, .. }) => Arc::ptr_eq(a, b),
            (Self::File { path: a, .. }, Self::File { path: b, .. }) => a == b,
            _ => false,
        };
        same && self.properties() == other.properties()
    }

    /// Stable checksum of what the reference points at.
    pub fn checksum(&self) -> Checksum {
        let target = match self {
            Self::Compilation { compilation, .. } => Checksum::of_str(compilation.assembly_name()),
            Self::Skeleton { image, .. } => image.checksum,
            Self::File { path, .. } => Checksum::of_str(&path.display().to_string()),
        };
        Checksum::combine([target, Checksum::of_str(&format!("{:?}", self.properties()))])
    }
}

impl fmt::Debug for MetadataReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Self::Compilation { .. } => "Compilation",
            Self::Skeleton { .. } => "Skeleton",
            Self::File { .. } => "File",
        };
        f.debug_struct("MetadataReference")
            .field("kind", &kind)
            .field("target", &self.display_name())
            .field("properties", self.properties())
            .finish()
    }
}

// ============================================================================
// Compilation
// ============================================================================

/// An immutable compilation.
#[derive(Clone)]
pub struct Compilation(Arc<CompilationInner>);

struct CompilationInner {
    id: u64,
    assembly_name: String,
    language: LanguageId,
    options: CompilationOptions,
    trees: Arc<Vec<SyntaxTree>>,
    references: Arc<Vec<MetadataReference>>,
    previous_submission: Option<Compilation>,
}

impl Compilation {
    /// An empty compilation.
    pub fn new(
        assembly_name: impl Into<String>,
        language: LanguageId,
        options: CompilationOptions,
    ) -> Self {
        Self(Arc::new(CompilationInner {
            id: next_assembly_id(),
            assembly_name: assembly_name.into(),
            language,
            options,
            trees: Arc::new(Vec::new()),
            references: Arc::new(Vec::new()),
            previous_submission: None,
        }))
    }

    fn derive(&self, change: impl FnOnce(&mut CompilationInner)) -> Self {
        let mut inner = CompilationInner {
            id: next_assembly_id(),
            assembly_name: self.0.assembly_name.clone(),
            language: self.0.language.clone(),
            options: self.0.options.clone(),
            trees: self.0.trees.clone(),
            references: self.0.references.clone(),
            previous_submission: self.0.previous_submission.clone(),
        };
        change(&mut inner);
        Self(Arc::new(inner))
    }

    /// Process-unique id of this compilation object.
    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn assembly_name(&self) -> &str {
        &self.0.assembly_name
    }

    pub fn language(&self) -> &LanguageId {
        &self.0.language
    }

    pub fn options(&self) -> &CompilationOptions {
        &self.0.options
    }

    /// Trees in the order they were added.
    pub fn syntax_trees(&self) -> &[SyntaxTree] {
        &self.0.trees
    }

    pub fn references(&self) -> &[MetadataReference] {
        &self.0.references
    }

    pub fn previous_submission(&self) -> Option<&Compilation> {
        self.0.previous_submission.as_ref()
    }

    pub fn contains_syntax_tree(&self, tree: &SyntaxTree) -> bool {
        self.0.trees.iter().any(|t| t.ptr_eq(tree))
    }

    pub fn ptr_eq(&self, other: &Compilation) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn add_syntax_trees(&self, trees: impl IntoIterator<Item = SyntaxTree>) -> Self {
        let mut trees = trees.into_iter().peekable();
        if trees.peek().is_none() {
            return self.clone();
        }
        self.derive(|inner| Arc::make_mut(&mut inner.trees).extend(trees))
    }

    /// Remove trees by identity. Trees not in the compilation are ignored.
    pub fn remove_syntax_trees(&self, trees: &[SyntaxTree]) -> Self {
        if trees.is_empty() {
            return self.clone();
        }
        self.derive(|inner| {
            Arc::make_mut(&mut inner.trees).retain(|t| !trees.iter().any(|r| r.ptr_eq(t)))
        })
    }

    pub fn remove_all_syntax_trees(&self) -> Self {
        self.derive(|inner| inner.trees = Arc::new(Vec::new()))
    }

    /// Replace `old` with `new` in place, keeping tree order. If `old` is not
    /// present, `new` is appended.
    pub fn replace_syntax_tree(&self, old: &SyntaxTree, new: SyntaxTree) -> Self {
        if old.ptr_eq(&new) && self.contains_syntax_tree(&new) {
            return self.clone();
        }
        self.derive(|inner| {
            let trees = Arc::make_mut(&mut inner.trees);
            match trees.iter().position(|t| t.ptr_eq(old)) {
                Some(index) => trees[index] = new,
                None => trees.push(new),
            }
        })
    }

    pub fn with_references(&self, references: Vec<MetadataReference>) -> Self {
        self.derive(|inner| inner.references = Arc::new(references))
    }

    pub fn with_options(&self, options: CompilationOptions) -> Self {
        self.derive(|inner| inner.options = options)
    }

    pub fn with_assembly_name(&self, assembly_name: impl Into<String>) -> Self {
        let assembly_name = assembly_name.into();
        self.derive(|inner| inner.assembly_name = assembly_name)
    }

    pub fn with_previous_submission(&self, previous: Option<Compilation>) -> Self {
        self.derive(|inner| inner.previous_submission = previous)
    }

    /// A direct reference to this compilation.
    pub fn to_metadata_reference(
        &self,
        properties: MetadataReferenceProperties,
    ) -> MetadataReference {
        MetadataReference::Compilation {
            compilation: self.clone(),
            properties,
        }
    }

    /// Every declaration of every tree, in tree order.
    pub fn declarations(&self) -> impl Iterator<Item = &Declaration> {
        self.0.trees.iter().flat_map(|t| t.declarations().iter())
    }
}

impl fmt::Debug for Compilation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Compilation")
            .field("id", &self.0.id)
            .field("assembly_name", &self.0.assembly_name)
            .field("language", &self.0.language)
            .field("trees", &self.0.trees.len())
            .field("references", &self.0.references)
            .finish()
    }
}
