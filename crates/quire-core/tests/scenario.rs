//! End-to-end editing session against a small two-project workspace.

mod common;

use std::sync::Arc;

use quire_core::{
    EngineConfig, MetadataReference, ProjectReference, RUST_LANGUAGE, Workspace,
};
use tokio_util::sync::CancellationToken;

use common::{project, services, tree_texts};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_editing_session() {
    common::init_tracing();
    let test = services(&[], EngineConfig::default());
    let workspace = Workspace::new(test.services.clone());
    let token = CancellationToken::new();

    // One project, one document.
    let (info, docs) = project("calc", RUST_LANGUAGE, &["pub fn answer() -> u32 { 41 + 1 }"]);
    let calc = info.id;
    let doc = docs[0];
    let info = info.with_metadata_reference(MetadataReference::file("/sdk/core.meta"));
    workspace.apply(|s| s.add_project(info.clone())).unwrap();

    let solution = workspace.current_solution();
    let compilation = solution.get_compilation_async(calc, &token).await.unwrap();
    assert_eq!(compilation.syntax_trees().len(), 1);
    assert!(solution.has_successfully_loaded_async(calc, &token).await.unwrap());
    let version = solution.dependent_semantic_version(calc, &token).await.unwrap();

    // A body-only edit keeps the public shape.
    let solution = workspace
        .apply(|s| s.with_document_text(doc, "pub fn answer() -> u32 { 42 }"))
        .unwrap();
    let compilation = solution.get_compilation_async(calc, &token).await.unwrap();
    assert_eq!(tree_texts(&compilation), vec!["pub fn answer() -> u32 { 42 }"]);
    assert_eq!(solution.dependent_semantic_version(calc, &token).await.unwrap(), version);

    // A syntax error still produces a compilation.
    let solution = workspace
        .apply(|s| s.with_document_text(doc, "pub fn answer( -> u32 { 42 }"))
        .unwrap();
    let compilation = solution.get_compilation_async(calc, &token).await.unwrap();
    assert_eq!(compilation.syntax_trees().len(), 1);
    assert!(compilation.syntax_trees()[0].has_errors());
    assert!(test.faults.is_empty());

    // A dependent project loads while its reference resolves, and stops
    // loading successfully once the referenced project is gone.
    let (app, _) = project("app", RUST_LANGUAGE, &["pub struct App;"]);
    let app_id = app.id;
    let app = app.with_project_reference(ProjectReference::new(calc));
    let solution = workspace.apply(|s| s.add_project(app.clone())).unwrap();

    let app_compilation = solution.get_compilation_async(app_id, &token).await.unwrap();
    assert_eq!(app_compilation.references().len(), 1);
    assert_eq!(solution.owning_project_of_reference(&app_compilation.references()[0]), Some(calc));
    assert!(solution.has_successfully_loaded_async(app_id, &token).await.unwrap());

    let solution = workspace.apply(|s| s.remove_project(calc)).unwrap();
    assert!(!solution.has_successfully_loaded_async(app_id, &token).await.unwrap());
    let app_compilation = solution.get_compilation_async(app_id, &token).await.unwrap();
    assert!(app_compilation.references().is_empty());
}

#[tokio::test]
async fn test_file_backed_document_reloads() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lib.rs");
    std::fs::write(&path, "pub struct Before;").unwrap();

    let test = services(&[], EngineConfig::default());
    let (info, _) = project("disk", RUST_LANGUAGE, &[]);
    let id = info.id;
    let doc = quire_core::DocumentId::new(id);
    let info = info.with_document(
        quire_core::DocumentInfo::new(doc, "lib.rs").with_file_path(&path),
        quire_core::TextSource::from_loader(Arc::new(quire_core::FileTextLoader::new(&path))),
    );
    let solution = quire_core::Solution::new(test.services.clone()).add_project(info).unwrap();
    let token = CancellationToken::new();

    let compilation = solution.get_compilation_async(id, &token).await.unwrap();
    assert_eq!(tree_texts(&compilation), vec!["pub struct Before;"]);

    std::fs::write(&path, "pub struct After;").unwrap();
    let reloaded = solution.reload_document(doc).unwrap();
    let compilation = reloaded.get_compilation_async(id, &token).await.unwrap();
    assert_eq!(tree_texts(&compilation), vec!["pub struct After;"]);

    // The old snapshot is untouched.
    let old = solution.get_compilation_async(id, &token).await.unwrap();
    assert_eq!(tree_texts(&old), vec!["pub struct Before;"]);
}
