//! Immutable document records.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::fault::{Fault, FaultReporter, FaultSeverity};
use crate::ids::{Checksum, DocumentId, VersionStamp};
use crate::lazy::AsyncLazy;
use crate::syntax::{LanguageService, ParseOptions, SyntaxTree};
use crate::text::{SourceText, TextAndVersion, TextSource};

/// What role a document plays in its project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentKind {
    /// Parsed and compiled.
    Source,
    /// Non-source input visible to generators.
    Additional,
    /// Configuration input visible to generators.
    Config,
}

/// Document attributes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentInfo {
    pub id: DocumentId,
    pub name: String,
    pub file_path: Option<PathBuf>,
    pub folders: Vec<String>,
    pub kind: DocumentKind,
}

impl DocumentInfo {
    pub fn new(id: DocumentId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            file_path: None,
            folders: Vec::new(),
            kind: DocumentKind::Source,
        }
    }

    pub fn with_file_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    pub fn with_folders(mut self, folders: Vec<String>) -> Self {
        self.folders = folders;
        self
    }

    pub fn with_kind(mut self, kind: DocumentKind) -> Self {
        self.kind = kind;
        self
    }

    fn checksum(&self) -> Checksum {
        Checksum::of_str(&format!(
            "{}|{:?}|{:?}|{:?}",
            self.name, self.file_path, self.folders, self.kind
        ))
    }
}

/// A tree paired with the versions it was computed at.
#[derive(Debug, Clone)]
pub struct TreeAndVersion {
    pub tree: SyntaxTree,
    /// Version of the text the tree was parsed from.
    pub text_version: VersionStamp,
    /// Version of the last edit that changed the document's public shape.
    pub top_level_version: VersionStamp,
}

/// What a source document needs to produce its tree.
#[derive(Clone)]
pub(crate) struct TreeServices {
    pub language: Arc<dyn LanguageService>,
    pub parse_options: ParseOptions,
    pub reporter: Arc<dyn FaultReporter>,
    pub config: Arc<EngineConfig>,
}

/// An immutable document record.
#[derive(Clone)]
pub struct DocumentRecord(Arc<DocumentInner>);

struct DocumentInner {
    info: DocumentInfo,
    text: TextSource,
    tree: Option<Arc<AsyncLazy<TreeAndVersion>>>,
    services: Option<TreeServices>,
    attribute_version: VersionStamp,
}

impl DocumentRecord {
    pub(crate) fn new(
        info: DocumentInfo,
        text: TextSource,
        services: Option<TreeServices>,
    ) -> Self {
        Self::build(info, text, services, None, VersionStamp::new())
    }

    fn build(
        info: DocumentInfo,
        text: TextSource,
        services: Option<TreeServices>,
        previous: Option<TreeAndVersion>,
        attribute_version: VersionStamp,
    ) -> Self {
        let services = services.filter(|_| info.kind == DocumentKind::Source);
        let tree = services.as_ref().map(|services| {
            Arc::new(tree_lazy(
                info.id,
                info.file_path.clone(),
                text.clone(),
                services.clone(),
                previous,
                attribute_version,
            ))
        });
        Self(Arc::new(DocumentInner {
            info,
            text,
            tree,
            services,
            attribute_version,
        }))
    }

    pub fn id(&self) -> DocumentId {
        self.0.info.id
    }

    pub fn info(&self) -> &DocumentInfo {
        &self.0.info
    }

    pub fn name(&self) -> &str {
        &self.0.info.name
    }

    pub fn file_path(&self) -> Option<&Path> {
        self.0.info.file_path.as_deref()
    }

    pub fn kind(&self) -> DocumentKind {
        self.0.info.kind
    }

    pub fn supports_syntax_tree(&self) -> bool {
        self.0.tree.is_some()
    }

    pub fn ptr_eq(&self, other: &DocumentRecord) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    // ------------------------------------------------------------------
    // Text
    // ------------------------------------------------------------------

    pub fn text_source(&self) -> &TextSource {
        &self.0.text
    }

    pub fn try_get_text(&self) -> Option<TextAndVersion> {
        self.0.text.try_get()
    }

    pub fn get_text(&self, cancel: &CancellationToken) -> Result<TextAndVersion> {
        self.0.text.get(cancel)
    }

    pub async fn get_text_async(&self, cancel: &CancellationToken) -> Result<TextAndVersion> {
        self.0.text.get_async(cancel).await
    }

    /// Version of the text, or of the attributes if they changed later.
    pub async fn version_async(&self, cancel: &CancellationToken) -> Result<VersionStamp> {
        let text = self.get_text_async(cancel).await?;
        Ok(text.version.newer(self.0.attribute_version))
    }

    // ------------------------------------------------------------------
    // Trees
    // ------------------------------------------------------------------

    fn tree_cell(&self) -> Result<&Arc<AsyncLazy<TreeAndVersion>>> {
        self.0.tree.as_ref().ok_or_else(|| {
            Error::InvalidOperation(format!(
                "document {} does not support syntax trees",
                self.0.info.id
            ))
        })
    }

    pub fn try_get_tree(&self) -> Option<SyntaxTree> {
        self.try_get_tree_and_version().map(|tv| tv.tree)
    }

    pub fn try_get_tree_and_version(&self) -> Option<TreeAndVersion> {
        self.0.tree.as_ref().and_then(|cell| cell.try_get_value())
    }

    pub fn get_tree(&self, cancel: &CancellationToken) -> Result<SyntaxTree> {
        Ok(self.tree_cell()?.get_value(cancel)?.tree)
    }

    pub async fn get_tree_async(&self, cancel: &CancellationToken) -> Result<SyntaxTree> {
        Ok(self.get_tree_and_version_async(cancel).await?.tree)
    }

    pub async fn get_tree_and_version_async(
        &self,
        cancel: &CancellationToken,
    ) -> Result<TreeAndVersion> {
        self.tree_cell()?.get_value_async(cancel).await
    }

    /// Version of the last change to the document's public shape. Documents
    /// without trees report their text version.
    pub async fn top_level_version_async(
        &self,
        cancel: &CancellationToken,
    ) -> Result<VersionStamp> {
        match &self.0.tree {
            Some(cell) => Ok(cell.get_value_async(cancel).await?.top_level_version),
            None => self.version_async(cancel).await,
        }
    }

    pub async fn checksum_async(&self, cancel: &CancellationToken) -> Result<Checksum> {
        let text = self.get_text_async(cancel).await?;
        Ok(Checksum::combine([self.0.info.checksum(), text.text.checksum()]))
    }

    // ------------------------------------------------------------------
    // Forks
    // ------------------------------------------------------------------

    /// Same document with new text. The previous tree, if already computed,
    /// is used to decide whether the edit changed the public shape.
    pub(crate) fn with_text_source(&self, text: TextSource) -> Self {
        Self::build(
            self.0.info.clone(),
            text,
            self.0.services.clone(),
            self.try_get_tree_and_version(),
            self.0.attribute_version,
        )
    }

    pub(crate) fn with_text(&self, text: SourceText) -> Self {
        let path = self.0.info.file_path.clone();
        self.with_text_source(TextSource::from_text(text, VersionStamp::new(), path))
    }

    pub(crate) fn with_info(&self, info: DocumentInfo) -> Self {
        Self::build(
            info,
            self.0.text.clone(),
            self.0.services.clone(),
            None,
            VersionStamp::new(),
        )
    }

    /// Same text, reparsed with new options. Always a structural change.
    pub(crate) fn with_tree_services(&self, services: TreeServices) -> Self {
        Self::build(
            self.0.info.clone(),
            self.0.text.clone(),
            Some(services),
            None,
            VersionStamp::new(),
        )
    }

    /// Text and tree pinned to an existing tree. Used by frozen snapshots so
    /// that a document matches the tree its compilation contains.
    pub(crate) fn with_frozen_tree(&self, tree: SyntaxTree) -> Self {
        let text_version = self
            .try_get_text()
            .filter(|t| t.text.ptr_eq(tree.text()))
            .map(|t| t.version)
            .unwrap_or_else(VersionStamp::new);
        let text = TextSource::from_text(
            tree.text().clone(),
            text_version,
            self.0.info.file_path.clone(),
        );
        let tree_and_version = TreeAndVersion {
            tree,
            text_version,
            top_level_version: text_version,
        };
        Self(Arc::new(DocumentInner {
            info: self.0.info.clone(),
            text,
            tree: Some(Arc::new(AsyncLazy::from_value(tree_and_version))),
            services: self.0.services.clone(),
            attribute_version: self.0.attribute_version,
        }))
    }

    /// Same document with a fresh load of reloadable text.
    pub(crate) fn reload(&self) -> Self {
        if !self.0.text.is_reloadable() {
            return self.clone();
        }
        self.with_text_source(self.0.text.reload())
    }
}

impl fmt::Debug for DocumentRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentRecord")
            .field("info", &self.0.info)
            .field("text", &self.0.text)
            .finish()
    }
}

fn tree_lazy(
    id: DocumentId,
    file_path: Option<PathBuf>,
    text: TextSource,
    services: TreeServices,
    previous: Option<TreeAndVersion>,
    attribute_version: VersionStamp,
) -> AsyncLazy<TreeAndVersion> {
    let sync_text = text.clone();
    let sync_services = services.clone();
    let sync_previous = previous.clone();
    let sync_path = file_path.clone();

    AsyncLazy::with_sync(
        move |token| {
            let text = text.clone();
            let services = services.clone();
            let previous = previous.clone();
            let file_path = file_path.clone();
            async move {
                let loaded = text.get_async(&token).await?;
                build_tree(
                    id,
                    file_path.as_deref(),
                    loaded,
                    &services,
                    previous.as_ref(),
                    attribute_version,
                    &token,
                )
            }
        },
        move |token| {
            let loaded = sync_text.get(token)?;
            build_tree(
                id,
                sync_path.as_deref(),
                loaded,
                &sync_services,
                sync_previous.as_ref(),
                attribute_version,
                token,
            )
        },
    )
}

fn build_tree(
    id: DocumentId,
    file_path: Option<&Path>,
    loaded: TextAndVersion,
    services: &TreeServices,
    previous: Option<&TreeAndVersion>,
    attribute_version: VersionStamp,
    cancel: &CancellationToken,
) -> Result<TreeAndVersion> {
    let tree = services
        .language
        .parse(&loaded.text, file_path, &services.parse_options, cancel)?;
    tree.claim_owner(id);

    if tree.len() != loaded.text.len() {
        services.reporter.report(&Fault::new(
            FaultSeverity::Diagnostic,
            format!("parsing {}", id),
            Error::Integrity(format!(
                "tree length {} does not match text length {}",
                tree.len(),
                loaded.text.len()
            )),
        ));
    }

    let text_version = loaded.version.newer(attribute_version);
    let top_level_version = match previous {
        Some(previous) if is_cosmetic_edit(previous, &tree, &loaded.text, services) => {
            previous.top_level_version
        }
        _ => text_version,
    };

    Ok(TreeAndVersion {
        tree,
        text_version,
        top_level_version,
    })
}

/// Small edits to small files are compared structurally; anything larger is
/// assumed to change the public shape.
fn is_cosmetic_edit(
    previous: &TreeAndVersion,
    tree: &SyntaxTree,
    text: &SourceText,
    services: &TreeServices,
) -> bool {
    if text.len() > services.config.structural_check_max_text_len {
        return false;
    }
    if text.changed_len_from(previous.tree.text()) > services.config.structural_check_max_edit_len {
        return false;
    }
    services
        .language
        .is_structurally_equivalent(&previous.tree, tree)
}
