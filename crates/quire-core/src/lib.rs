//! Incremental compilation core for multi-project source workspaces.
//!
//! This crate provides:
//! - Immutable, versioned solution snapshots with copy-on-write forking
//! - A per-project compilation state machine fed by a queue of edits
//! - Source generator integration with stable generated-document identity
//! - Cross-project and cross-language (skeleton) reference resolution
//! - A cancellable, single-flight lazy cache cell
//! - Dependent version and checksum propagation

pub mod compilation;
pub mod config;
pub mod error;
pub mod fault;
pub mod generators;
pub mod ids;
pub mod lazy;
pub mod policy;
pub mod solution;
pub mod syntax;
pub mod text;
pub mod tracker;
mod versions;
pub mod workspace;

pub use compilation::{
    AssemblyOwners, Compilation, CompilationOptions, MetadataImage, MetadataReference,
    MetadataReferenceProperties, OutputKind, RootedAssemblies,
};
pub use config::EngineConfig;
pub use error::{Error, Result};
pub use fault::{Fault, FaultReporter, FaultSeverity, RecordingFaultReporter, TracingFaultReporter};
pub use generators::{
    AdditionalText, FnGeneratorDriver, GeneratedDocument, GeneratedDocuments, GeneratedSource,
    GeneratorDriver, GeneratorId, GeneratorRun, GeneratorRunResult, GeneratorState,
};
pub use ids::{Checksum, DocumentId, LanguageId, ProjectId, VersionStamp};
pub use lazy::AsyncLazy;
pub use policy::{CreationMode, CreationPolicy};
pub use solution::{
    DocumentInfo, DocumentKind, DocumentRecord, DocumentSet, ProjectDependencyGraph, ProjectInfo,
    ProjectRecord, ProjectReference, Solution, TreeAndVersion,
};
pub use syntax::{
    Declaration, DeclarationKind, LanguageService, ParseOptions, RUST_LANGUAGE, RustLanguage,
    SourceKind, SyntaxDiagnostic, SyntaxTree,
};
pub use text::{
    ConstantTextLoader, FileTextLoader, SourceText, TextAndVersion, TextLoader, TextSource,
};
pub use tracker::{
    ActionKind, CompilationTracker, DeclarationSkeletonBuilder, FinalState, SkeletonBuilder,
    SkeletonReferenceCache, TrackerState, TranslationAction,
};
pub use workspace::{Workspace, WorkspaceServices, WorkspaceServicesBuilder};
