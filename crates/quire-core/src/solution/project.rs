//! Immutable project records.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustc_hash::FxHashMap;
use tokio_util::sync::CancellationToken;

use super::document::{DocumentInfo, DocumentKind, DocumentRecord, TreeServices};
use crate::compilation::{CompilationOptions, MetadataReference, MetadataReferenceProperties};
use crate::error::Result;
use crate::generators::{AdditionalText, GeneratorDriver};
use crate::ids::{Checksum, DocumentId, LanguageId, ProjectId, VersionStamp};
use crate::lazy::AsyncLazy;
use crate::syntax::ParseOptions;
use crate::text::TextSource;
use crate::versions;

/// A reference from one project to another.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProjectReference {
    pub project_id: ProjectId,
    pub properties: MetadataReferenceProperties,
}

impl ProjectReference {
    pub fn new(project_id: ProjectId) -> Self {
        Self {
            project_id,
            properties: MetadataReferenceProperties::default(),
        }
    }

    pub fn with_properties(mut self, properties: MetadataReferenceProperties) -> Self {
        self.properties = properties;
        self
    }
}

/// Everything needed to add a project to a solution.
#[derive(Clone)]
pub struct ProjectInfo {
    pub id: ProjectId,
    pub name: String,
    pub assembly_name: String,
    pub language: LanguageId,
    pub file_path: Option<PathBuf>,
    pub compilation_options: CompilationOptions,
    pub parse_options: ParseOptions,
    pub documents: Vec<(DocumentInfo, TextSource)>,
    pub project_references: Vec<ProjectReference>,
    pub metadata_references: Vec<MetadataReference>,
    pub generator_driver: Option<Arc<dyn GeneratorDriver>>,
    pub has_all_information: bool,
    pub is_submission: bool,
}

impl ProjectInfo {
    pub fn new(id: ProjectId, name: impl Into<String>, language: impl Into<LanguageId>) -> Self {
        let name = name.into();
        Self {
            id,
            assembly_name: name.clone(),
            name,
            language: language.into(),
            file_path: None,
            compilation_options: CompilationOptions::default(),
            parse_options: ParseOptions::default(),
            documents: Vec::new(),
            project_references: Vec::new(),
            metadata_references: Vec::new(),
            generator_driver: None,
            has_all_information: true,
            is_submission: false,
        }
    }

    pub fn with_file_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    pub fn with_assembly_name(mut self, assembly_name: impl Into<String>) -> Self {
        self.assembly_name = assembly_name.into();
        self
    }

    pub fn with_compilation_options(mut self, options: CompilationOptions) -> Self {
        self.compilation_options = options;
        self
    }

    pub fn with_parse_options(mut self, options: ParseOptions) -> Self {
        self.parse_options = options;
        self
    }

    pub fn with_document(mut self, info: DocumentInfo, text: TextSource) -> Self {
        self.documents.push((info, text));
        self
    }

    pub fn with_project_reference(mut self, reference: ProjectReference) -> Self {
        self.project_references.push(reference);
        self
    }

    pub fn with_metadata_reference(mut self, reference: MetadataReference) -> Self {
        self.metadata_references.push(reference);
        self
    }

    pub fn with_generator_driver(mut self, driver: Arc<dyn GeneratorDriver>) -> Self {
        self.generator_driver = Some(driver);
        self
    }

    pub fn with_has_all_information(mut self, has_all_information: bool) -> Self {
        self.has_all_information = has_all_information;
        self
    }

    pub fn as_submission(mut self) -> Self {
        self.is_submission = true;
        self
    }
}

/// Ordered, immutable set of document records.
#[derive(Clone, Default)]
pub struct DocumentSet {
    order: Arc<Vec<DocumentId>>,
    records: Arc<FxHashMap<DocumentId, DocumentRecord>>,
}

impl DocumentSet {
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn get(&self, id: DocumentId) -> Option<&DocumentRecord> {
        self.records.get(&id)
    }

    pub fn contains(&self, id: DocumentId) -> bool {
        self.records.contains_key(&id)
    }

    pub fn ids(&self) -> &[DocumentId] {
        &self.order
    }

    /// Records in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &DocumentRecord> {
        self.order.iter().filter_map(|id| self.records.get(id))
    }

    pub(crate) fn from_records(records: impl IntoIterator<Item = DocumentRecord>) -> Self {
        let mut set = Self::default();
        set.extend(records);
        set
    }

    fn extend(&mut self, records: impl IntoIterator<Item = DocumentRecord>) {
        let order = Arc::make_mut(&mut self.order);
        let map = Arc::make_mut(&mut self.records);
        for record in records {
            if map.insert(record.id(), record.clone()).is_none() {
                order.push(record.id());
            }
        }
    }

    fn with_added(&self, records: impl IntoIterator<Item = DocumentRecord>) -> Self {
        let mut set = self.clone();
        set.extend(records);
        set
    }

    fn with_removed(&self, ids: &[DocumentId]) -> Self {
        let mut set = self.clone();
        Arc::make_mut(&mut set.order).retain(|id| !ids.contains(id));
        let map = Arc::make_mut(&mut set.records);
        for id in ids {
            map.remove(id);
        }
        set
    }

    fn with_replaced(&self, record: DocumentRecord) -> Self {
        let mut set = self.clone();
        Arc::make_mut(&mut set.records).insert(record.id(), record);
        set
    }

    fn map(&self, f: impl Fn(&DocumentRecord) -> DocumentRecord) -> Self {
        Self::from_records(self.iter().map(f))
    }
}

impl fmt::Debug for DocumentSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter().map(|d| d.name())).finish()
    }
}

/// Plain attributes of a project record.
#[derive(Clone)]
pub(crate) struct ProjectParts {
    pub id: ProjectId,
    pub name: String,
    pub assembly_name: String,
    pub language: LanguageId,
    pub file_path: Option<PathBuf>,
    pub compilation_options: CompilationOptions,
    pub parse_options: ParseOptions,
    pub documents: DocumentSet,
    pub additional_documents: DocumentSet,
    pub config_documents: DocumentSet,
    pub project_references: Arc<Vec<ProjectReference>>,
    pub metadata_references: Arc<Vec<MetadataReference>>,
    pub generator_driver: Option<Arc<dyn GeneratorDriver>>,
    pub has_all_information: bool,
    pub is_submission: bool,
    pub version: VersionStamp,
    pub tree_services: TreeServices,
}

/// An immutable project record.
#[derive(Clone)]
pub struct ProjectRecord(Arc<ProjectInner>);

struct ProjectInner {
    parts: ProjectParts,
    latest_document_version: AsyncLazy<VersionStamp>,
    latest_top_level_version: AsyncLazy<VersionStamp>,
    checksum: AsyncLazy<Checksum>,
}

impl ProjectRecord {
    pub(crate) fn from_info(info: ProjectInfo, tree_services: TreeServices) -> Self {
        let document_tree_services = tree_services.clone();
        let documents = info
            .documents
            .into_iter()
            .map(move |(doc, text)| DocumentRecord::new(doc, text, Some(document_tree_services.clone())));
        let mut parts = ProjectParts {
            id: info.id,
            name: info.name,
            assembly_name: info.assembly_name,
            language: info.language,
            file_path: info.file_path,
            compilation_options: info.compilation_options,
            parse_options: info.parse_options,
            documents: DocumentSet::default(),
            additional_documents: DocumentSet::default(),
            config_documents: DocumentSet::default(),
            project_references: Arc::new(info.project_references),
            metadata_references: Arc::new(info.metadata_references),
            generator_driver: info.generator_driver,
            has_all_information: info.has_all_information,
            is_submission: info.is_submission,
            version: VersionStamp::new(),
            tree_services,
        };
        add_to_sets(&mut parts, documents);
        Self::from_parts(parts)
    }

    fn from_parts(parts: ProjectParts) -> Self {
        let latest_document_version = {
            let sets = [
                parts.documents.clone(),
                parts.additional_documents.clone(),
                parts.config_documents.clone(),
            ];
            let version = parts.version;
            AsyncLazy::new(move |token| {
                let sets = sets.clone();
                async move { versions::latest_document_version(&sets, version, &token).await }
            })
        };
        let latest_top_level_version = {
            let sets = [
                parts.documents.clone(),
                parts.additional_documents.clone(),
                parts.config_documents.clone(),
            ];
            let version = parts.version;
            AsyncLazy::new(move |token| {
                let sets = sets.clone();
                async move { versions::latest_top_level_version(&sets, version, &token).await }
            })
        };
        let checksum = {
            let snapshot = parts.clone();
            AsyncLazy::new(move |token| {
                let parts = snapshot.clone();
                async move { versions::project_checksum(&parts, &token).await }
            })
        };

        Self(Arc::new(ProjectInner {
            parts,
            latest_document_version,
            latest_top_level_version,
            checksum,
        }))
    }

    /// A new record with `change` applied and the version bumped.
    fn fork(&self, change: impl FnOnce(&mut ProjectParts)) -> Self {
        let mut parts = self.0.parts.clone();
        change(&mut parts);
        parts.version = VersionStamp::new();
        Self::from_parts(parts)
    }

    pub(crate) fn parts(&self) -> &ProjectParts {
        &self.0.parts
    }

    pub fn id(&self) -> ProjectId {
        self.0.parts.id
    }

    pub fn name(&self) -> &str {
        &self.0.parts.name
    }

    pub fn assembly_name(&self) -> &str {
        &self.0.parts.assembly_name
    }

    pub fn language(&self) -> &LanguageId {
        &self.0.parts.language
    }

    pub fn file_path(&self) -> Option<&Path> {
        self.0.parts.file_path.as_deref()
    }

    pub fn compilation_options(&self) -> &CompilationOptions {
        &self.0.parts.compilation_options
    }

    pub fn parse_options(&self) -> &ParseOptions {
        &self.0.parts.parse_options
    }

    /// Version bumped on every attribute change of this record.
    pub fn version(&self) -> VersionStamp {
        self.0.parts.version
    }

    pub fn has_all_information(&self) -> bool {
        self.0.parts.has_all_information
    }

    pub fn is_submission(&self) -> bool {
        self.0.parts.is_submission
    }

    pub fn generator_driver(&self) -> Option<&Arc<dyn GeneratorDriver>> {
        self.0.parts.generator_driver.as_ref()
    }

    /// Source documents.
    pub fn documents(&self) -> &DocumentSet {
        &self.0.parts.documents
    }

    pub fn additional_documents(&self) -> &DocumentSet {
        &self.0.parts.additional_documents
    }

    pub fn config_documents(&self) -> &DocumentSet {
        &self.0.parts.config_documents
    }

    /// Any document of any kind.
    pub fn document(&self, id: DocumentId) -> Option<&DocumentRecord> {
        let parts = &self.0.parts;
        parts
            .documents
            .get(id)
            .or_else(|| parts.additional_documents.get(id))
            .or_else(|| parts.config_documents.get(id))
    }

    pub fn contains_document(&self, id: DocumentId) -> bool {
        self.document(id).is_some()
    }

    pub fn project_references(&self) -> &[ProjectReference] {
        &self.0.parts.project_references
    }

    pub fn metadata_references(&self) -> &[MetadataReference] {
        &self.0.parts.metadata_references
    }

    pub(crate) fn tree_services(&self) -> &TreeServices {
        &self.0.parts.tree_services
    }

    pub fn ptr_eq(&self, other: &ProjectRecord) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    // ------------------------------------------------------------------
    // Versions
    // ------------------------------------------------------------------

    /// Newest text version among all documents, and the record version.
    pub async fn latest_document_version_async(
        &self,
        cancel: &CancellationToken,
    ) -> Result<VersionStamp> {
        self.0.latest_document_version.get_value_async(cancel).await
    }

    /// Newest version that changed the public shape of any document.
    pub async fn latest_top_level_version_async(
        &self,
        cancel: &CancellationToken,
    ) -> Result<VersionStamp> {
        self.0.latest_top_level_version.get_value_async(cancel).await
    }

    /// Checksum of the project's own content and attributes.
    pub async fn checksum_async(&self, cancel: &CancellationToken) -> Result<Checksum> {
        self.0.checksum.get_value_async(cancel).await
    }

    /// Texts of additional and config documents, in order.
    pub async fn additional_texts_async(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<AdditionalText>> {
        let parts = &self.0.parts;
        let mut texts = Vec::new();
        for doc in parts.additional_documents.iter().chain(parts.config_documents.iter()) {
            let loaded = doc.get_text_async(cancel).await?;
            texts.push(AdditionalText {
                name: doc.name().to_string(),
                path: doc.file_path().map(Path::to_path_buf),
                text: loaded.text,
            });
        }
        Ok(texts)
    }

    // ------------------------------------------------------------------
    // Forks
    // ------------------------------------------------------------------

    pub(crate) fn with_documents_added(&self, records: Vec<DocumentRecord>) -> Self {
        self.fork(|parts| add_to_sets(parts, records))
    }

    pub(crate) fn with_documents_removed(&self, ids: &[DocumentId]) -> Self {
        self.fork(|parts| {
            parts.documents = parts.documents.with_removed(ids);
            parts.additional_documents = parts.additional_documents.with_removed(ids);
            parts.config_documents = parts.config_documents.with_removed(ids);
        })
    }

    /// Same project with one document swapped. The record version is kept;
    /// the document carries its own versions.
    pub(crate) fn with_document_replaced(&self, record: DocumentRecord) -> Self {
        let mut parts = self.0.parts.clone();
        let set = match record.kind() {
            DocumentKind::Source => &mut parts.documents,
            DocumentKind::Additional => &mut parts.additional_documents,
            DocumentKind::Config => &mut parts.config_documents,
        };
        *set = set.with_replaced(record);
        Self::from_parts(parts)
    }

    pub(crate) fn with_source_documents(&self, documents: DocumentSet) -> Self {
        self.fork(|parts| parts.documents = documents)
    }

    pub(crate) fn with_compilation_options(&self, options: CompilationOptions) -> Self {
        self.fork(|parts| parts.compilation_options = options)
    }

    /// New parse options; every source document is reparsed.
    pub(crate) fn with_parse_options(&self, options: ParseOptions) -> Self {
        self.fork(|parts| {
            parts.tree_services.parse_options = options.clone();
            parts.parse_options = options;
            let services = parts.tree_services.clone();
            parts.documents = parts
                .documents
                .map(|doc| doc.with_tree_services(services.clone()));
        })
    }

    pub(crate) fn with_project_references(&self, references: Vec<ProjectReference>) -> Self {
        self.fork(|parts| parts.project_references = Arc::new(references))
    }

    pub(crate) fn with_metadata_references(&self, references: Vec<MetadataReference>) -> Self {
        self.fork(|parts| parts.metadata_references = Arc::new(references))
    }

    pub(crate) fn with_generator_driver(&self, driver: Option<Arc<dyn GeneratorDriver>>) -> Self {
        self.fork(|parts| parts.generator_driver = driver)
    }

    pub(crate) fn with_has_all_information(&self, has_all_information: bool) -> Self {
        self.fork(|parts| parts.has_all_information = has_all_information)
    }

    pub(crate) fn with_assembly_name(&self, assembly_name: String) -> Self {
        self.fork(|parts| parts.assembly_name = assembly_name)
    }

    pub(crate) fn with_name(&self, name: String) -> Self {
        self.fork(|parts| parts.name = name)
    }
}

fn add_to_sets(parts: &mut ProjectParts, records: impl IntoIterator<Item = DocumentRecord>) {
    let mut source = Vec::new();
    let mut additional = Vec::new();
    let mut config = Vec::new();
    for record in records {
        match record.kind() {
            DocumentKind::Source => source.push(record),
            DocumentKind::Additional => additional.push(record),
            DocumentKind::Config => config.push(record),
        }
    }
    parts.documents = parts.documents.with_added(source);
    parts.additional_documents = parts.additional_documents.with_added(additional);
    parts.config_documents = parts.config_documents.with_added(config);
}

impl fmt::Debug for ProjectRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts = &self.0.parts;
        f.debug_struct("ProjectRecord")
            .field("id", &parts.id)
            .field("name", &parts.name)
            .field("language", &parts.language)
            .field("version", &parts.version)
            .field("documents", &parts.documents)
            .field("project_references", &parts.project_references)
            .finish()
    }
}
