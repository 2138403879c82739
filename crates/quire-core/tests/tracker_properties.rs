//! Behavioral properties of compilation trackers observed through solutions.

mod common;

use std::sync::Arc;
use std::time::Duration;

use quire_core::{
    DocumentId, DocumentInfo, EngineConfig, Error, FaultSeverity, MetadataReference,
    ProjectReference, RUST_LANGUAGE, Solution, TextSource, TrackerState,
};
use tokio_util::sync::CancellationToken;

use common::{Gate, TestGenerator, TestLanguage, project, services, tree_texts};

// =============================================================================
// Single flight
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_share_one_build() {
    let test = services(&[], EngineConfig::default());
    let generator = TestGenerator::new("pub struct Generated;");
    let (info, _) = project("app", RUST_LANGUAGE, &["pub struct A;", "pub struct B;"]);
    let id = info.id;
    let info = info.with_generator_driver(generator.driver());
    let solution = Solution::new(test.services.clone()).add_project(info).unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let solution = solution.clone();
        handles.push(tokio::spawn(async move {
            let token = CancellationToken::new();
            solution.get_compilation_async(id, &token).await.unwrap()
        }));
    }
    let mut compilations = Vec::new();
    for handle in handles {
        compilations.push(handle.await.unwrap());
    }

    assert_eq!(generator.run_count(), 1);
    for compilation in &compilations[1..] {
        assert!(compilation.ptr_eq(&compilations[0]));
    }
    assert_eq!(compilations[0].syntax_trees().len(), 3);
}

#[tokio::test]
async fn test_cancelled_request_is_not_reported() {
    let test = services(&[], EngineConfig::default());
    let (info, _) = project("app", RUST_LANGUAGE, &["pub struct A;"]);
    let id = info.id;
    let solution = Solution::new(test.services.clone()).add_project(info).unwrap();

    let cancelled = CancellationToken::new();
    cancelled.cancel();
    let err = solution.get_compilation_async(id, &cancelled).await.unwrap_err();
    assert!(err.is_cancelled());
    assert!(test.faults.is_empty());

    // A later request still builds.
    let token = CancellationToken::new();
    assert!(solution.get_compilation_async(id, &token).await.is_ok());
}

#[tokio::test]
async fn test_collaborator_failure_is_reported_once() {
    let language = TestLanguage::new("failing");
    let test = services(&[language.clone()], EngineConfig::default());
    let (info, _) = project("broken", "failing", &["FAIL"]);
    let id = info.id;
    let solution = Solution::new(test.services.clone()).add_project(info).unwrap();
    let token = CancellationToken::new();

    let err = solution.get_compilation_async(id, &token).await.unwrap_err();
    assert!(matches!(err, Error::Unreachable(_)));
    let faults = test.faults.faults();
    assert_eq!(faults.len(), 1);
    assert_eq!(faults[0].severity, FaultSeverity::Critical);
}

// =============================================================================
// Fork isolation and finality
// =============================================================================

#[tokio::test]
async fn test_fork_isolation_and_monotonic_finality() {
    let test = services(&[], EngineConfig::default());
    let (info, docs) = project("app", RUST_LANGUAGE, &["pub struct A;", "pub struct B;"]);
    let id = info.id;
    let old = Solution::new(test.services.clone()).add_project(info).unwrap();
    let token = CancellationToken::new();

    let old_compilation = old.get_compilation_async(id, &token).await.unwrap();
    assert!(old.tracker(id).unwrap().state().is_final());

    let new = old.with_document_text(docs[0], "pub struct A2;").unwrap();
    assert!(!new.tracker(id).unwrap().state().is_final());
    assert!(new.try_get_compilation(id).is_none());

    let new_compilation = new.get_compilation_async(id, &token).await.unwrap();
    assert_eq!(tree_texts(&new_compilation), vec!["pub struct A2;", "pub struct B;"]);

    // The old snapshot still serves the exact same compilation.
    assert!(old.try_get_compilation(id).unwrap().ptr_eq(&old_compilation));
    assert_eq!(tree_texts(&old_compilation), vec!["pub struct A;", "pub struct B;"]);
    // Untouched trees are shared between the two compilations.
    assert!(old_compilation.syntax_trees()[1].ptr_eq(&new_compilation.syntax_trees()[1]));
}

#[tokio::test]
async fn test_queue_drains_to_same_result_as_fresh_build() {
    let test = services(&[], EngineConfig::default());
    let (info, docs) = project(
        "app",
        RUST_LANGUAGE,
        &["pub struct A;", "pub struct B;", "pub struct C;"],
    );
    let id = info.id;
    let token = CancellationToken::new();
    let solution = Solution::new(test.services.clone()).add_project(info).unwrap();
    solution.get_compilation_async(id, &token).await.unwrap();

    let added = DocumentId::new(id);
    let edited = solution
        .with_document_text(docs[0], "pub struct A1;")
        .unwrap()
        .with_document_text(docs[0], "pub struct A2;")
        .unwrap()
        .remove_document(docs[1])
        .unwrap()
        .add_document(DocumentInfo::new(added, "d.rs"), TextSource::constant("pub struct D;"))
        .unwrap()
        .with_document_text(docs[2], "pub struct C2;")
        .unwrap();

    let pending = edited.tracker(id).unwrap().state().pending_actions().len();
    assert_eq!(pending, 4, "touches of one document merge");

    let incremental = edited.get_compilation_async(id, &token).await.unwrap();

    let (fresh_info, _) = project(
        "app",
        RUST_LANGUAGE,
        &["pub struct A2;", "pub struct C2;", "pub struct D;"],
    );
    let fresh_id = fresh_info.id;
    let fresh = Solution::new(test.services.clone()).add_project(fresh_info).unwrap();
    let scratch = fresh.get_compilation_async(fresh_id, &token).await.unwrap();

    assert_eq!(tree_texts(&incremental), tree_texts(&scratch));
}

// =============================================================================
// Generators
// =============================================================================

#[tokio::test]
async fn test_generated_document_identity_is_stable() {
    let test = services(&[], EngineConfig::default());
    let generator = TestGenerator::new("pub struct Generated;");
    let (info, docs) = project("app", RUST_LANGUAGE, &["pub struct A;"]);
    let id = info.id;
    let info = info.with_generator_driver(generator.driver());
    let token = CancellationToken::new();

    let first = Solution::new(test.services.clone()).add_project(info).unwrap();
    let generated = first.generated_documents_async(id, &token).await.unwrap();
    assert_eq!(generated.len(), 1);
    let original = generated.iter().next().unwrap().clone();
    assert!(first.try_get_generated_document(original.id()).is_some());

    // Same output: same document, same tree.
    let second = first.with_document_text(docs[0], "pub struct A2;").unwrap();
    let compilation = second.get_compilation_async(id, &token).await.unwrap();
    let regenerated = second.generated_documents_async(id, &token).await.unwrap();
    let same = regenerated.get(original.id()).unwrap();
    assert!(same.tree().ptr_eq(original.tree()));
    assert!(compilation.contains_syntax_tree(original.tree()));
    assert_eq!(generator.run_count(), 2);

    // New output: same document id, new tree.
    generator.set_output("pub struct Generated2;");
    let third = second.with_document_text(docs[0], "pub struct A3;").unwrap();
    let compilation = third.get_compilation_async(id, &token).await.unwrap();
    let changed = third.generated_documents_async(id, &token).await.unwrap();
    let updated = changed.get(original.id()).unwrap();
    assert!(!updated.tree().ptr_eq(original.tree()));
    assert!(compilation.contains_syntax_tree(updated.tree()));
    assert!(!compilation.contains_syntax_tree(original.tree()));
    assert_eq!(compilation.syntax_trees().len(), 2);
}

#[tokio::test]
async fn test_final_generated_documents_are_reused_until_rerun() {
    let test = services(&[], EngineConfig::default());
    let generator = TestGenerator::new("pub struct Generated;");
    let (info, _) = project("app", RUST_LANGUAGE, &["pub struct A;"]);
    let id = info.id;
    let info = info.with_generator_driver(generator.driver());
    let token = CancellationToken::new();

    let solution = Solution::new(test.services.clone()).add_project(info).unwrap();
    solution.get_compilation_async(id, &token).await.unwrap();
    assert_eq!(generator.run_count(), 1);

    // Rerunning reopens the final tracker so the driver runs again.
    let rerun = solution.rerun_generators(id, false).unwrap();
    rerun.get_compilation_async(id, &token).await.unwrap();
    assert_eq!(generator.run_count(), 2);

    let forced = rerun.rerun_generators(id, true).unwrap();
    forced.get_compilation_async(id, &token).await.unwrap();
    assert_eq!(generator.run_count(), 3);
}

#[tokio::test]
async fn test_no_generators_shares_compilations() {
    let test = services(&[], EngineConfig::default());
    let (info, _) = project("app", RUST_LANGUAGE, &["pub struct A;"]);
    let id = info.id;
    let solution = Solution::new(test.services.clone()).add_project(info).unwrap();
    let token = CancellationToken::new();

    solution.get_compilation_async(id, &token).await.unwrap();
    let state = solution.tracker(id).unwrap().state();
    let TrackerState::Final(final_state) = &*state else {
        panic!("expected a final state");
    };
    assert!(final_state.with_generated.ptr_eq(&final_state.without_generated));
    assert!(final_state.generator.documents.is_empty());
}

// =============================================================================
// References
// =============================================================================

#[tokio::test]
async fn test_reference_completeness() {
    let test = services(&[], EngineConfig::default());
    let (lib, _) = project("lib", RUST_LANGUAGE, &["pub struct Object;"]);
    let lib_id = lib.id;
    let (app, _) = project("app", RUST_LANGUAGE, &["pub struct App;"]);
    let app_id = app.id;
    let app = app.with_project_reference(ProjectReference::new(lib_id));
    let token = CancellationToken::new();

    let solution = Solution::new(test.services.clone())
        .add_project(lib.clone())
        .unwrap()
        .add_project(app)
        .unwrap();

    // Frozen snapshots never claim complete references.
    let frozen = solution.with_frozen_partial_compilations();
    let frozen_state = frozen.tracker(app_id).unwrap().state();
    let TrackerState::Final(frozen_final) = &*frozen_state else {
        panic!("frozen trackers are final");
    };
    assert!(!frozen_final.has_complete_references);
    assert!(!frozen.has_successfully_loaded_async(app_id, &token).await.unwrap());

    assert!(solution.has_successfully_loaded_async(app_id, &token).await.unwrap());
    let state = solution.tracker(app_id).unwrap().state();
    let TrackerState::Final(full) = &*state else {
        panic!("expected a final state");
    };
    assert!(full.has_complete_references);
    assert_eq!(full.rooted.len(), 1);

    let removed = solution.remove_project(lib_id).unwrap();
    assert!(!removed.has_successfully_loaded_async(app_id, &token).await.unwrap());

    let restored = removed.add_project(lib).unwrap();
    assert!(restored.has_successfully_loaded_async(app_id, &token).await.unwrap());
}

#[tokio::test]
async fn test_missing_information_blocks_loading() {
    let test = services(&[], EngineConfig::default());
    let (info, _) = project("app", RUST_LANGUAGE, &["pub struct A;"]);
    let id = info.id;
    let info = info.with_metadata_reference(MetadataReference::file("/sdk/core.meta"));
    let token = CancellationToken::new();

    let solution = Solution::new(test.services.clone()).add_project(info).unwrap();
    assert!(solution.has_successfully_loaded_async(id, &token).await.unwrap());
    let partial = solution.with_has_all_information(id, false).unwrap();
    assert!(!partial.has_successfully_loaded_async(id, &token).await.unwrap());
}

#[tokio::test]
async fn test_cross_language_reference_uses_cached_skeleton() {
    let script = TestLanguage::new("script");
    let test = services(&[script], EngineConfig::default());
    let (lib, lib_docs) =
        project("lib", "script", &["pub fn area(r: f64) -> f64 { r * r * 3.14 }"]);
    let lib_id = lib.id;
    let (app, _) = project("app", RUST_LANGUAGE, &["pub struct App;"]);
    let app_id = app.id;
    let app = app.with_project_reference(ProjectReference::new(lib_id));
    let token = CancellationToken::new();

    let solution = Solution::new(test.services.clone())
        .add_project(lib)
        .unwrap()
        .add_project(app)
        .unwrap();

    let image = |compilation: &quire_core::Compilation| match &compilation.references()[0] {
        MetadataReference::Skeleton { image, .. } => image.clone(),
        other => panic!("expected a skeleton reference, got {}", other.display_name()),
    };

    let app_compilation = solution.get_compilation_async(app_id, &token).await.unwrap();
    let first = image(&app_compilation);
    assert_eq!(
        solution.owning_project_of_reference(&app_compilation.references()[0]),
        Some(lib_id)
    );

    // Body-only edit: the skeleton image is reused.
    let body = solution
        .with_document_text(lib_docs[0], "pub fn area(r: f64) -> f64 { 3.14 * r * r }")
        .unwrap();
    let second = image(&body.get_compilation_async(app_id, &token).await.unwrap());
    assert!(Arc::ptr_eq(&first, &second));

    // Signature edit: a new image.
    let signature = body
        .with_document_text(lib_docs[0], "pub fn area(r: f32) -> f32 { 3.14 * r * r }")
        .unwrap();
    let third = image(&signature.get_compilation_async(app_id, &token).await.unwrap());
    assert!(!Arc::ptr_eq(&second, &third));
}

// =============================================================================
// Freezing
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_freeze_mid_build_contains_requested_tree() {
    let gate = Arc::new(Gate::default());
    let language = TestLanguage::gated("gated", gate.clone());
    let config = EngineConfig {
        add_documents_batch_size: 1,
        ..Default::default()
    };
    let test = services(&[language], config);
    let (info, docs) = project(
        "app",
        "gated",
        &["pub struct A;", "pub struct GATE;", "pub struct C;"],
    );
    let id = info.id;
    let solution = Solution::new(test.services.clone()).add_project(info).unwrap();

    let build = {
        let solution = solution.clone();
        tokio::spawn(async move {
            let token = CancellationToken::new();
            solution.get_compilation_async(id, &token).await
        })
    };

    // Wait until the first document is in the draft and the build is stuck.
    let mut drafted = false;
    for _ in 0..500 {
        let state = solution.tracker(id).unwrap().state();
        if state.draft().is_some_and(|c| c.syntax_trees().len() == 1) {
            drafted = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(drafted, "build never reached the second document");

    let token = CancellationToken::new();
    let frozen = solution
        .with_frozen_partial_compilation_for_document(docs[2], &token)
        .unwrap();
    let compilation = frozen.try_get_compilation(id).unwrap();
    assert_eq!(tree_texts(&compilation), vec!["pub struct A;", "pub struct C;"]);

    let frozen_project = frozen.project(id).unwrap();
    assert!(frozen_project.contains_document(docs[0]));
    assert!(!frozen_project.contains_document(docs[1]));
    assert!(frozen_project.contains_document(docs[2]));

    gate.open();
    let full = build.await.unwrap().unwrap();
    assert_eq!(full.syntax_trees().len(), 3);
}

#[test]
fn test_freeze_before_build_keeps_parsed_trees() {
    let test = services(&[], EngineConfig::default());
    let (info, docs) = project(
        "app",
        RUST_LANGUAGE,
        &["pub struct A;", "pub struct B;", "pub struct C;"],
    );
    let id = info.id;
    let solution = Solution::new(test.services.clone()).add_project(info).unwrap();
    let token = CancellationToken::new();

    for doc in &docs[..2] {
        solution.document(*doc).unwrap().get_tree(&token).unwrap();
    }
    assert!(matches!(*solution.tracker(id).unwrap().state(), TrackerState::Empty { .. }));

    let frozen = solution
        .with_frozen_partial_compilation_for_document(docs[2], &token)
        .unwrap();
    let compilation = frozen.try_get_compilation(id).unwrap();
    assert_eq!(
        tree_texts(&compilation),
        vec!["pub struct A;", "pub struct B;", "pub struct C;"]
    );
    assert_eq!(frozen.project(id).unwrap().documents().ids(), &docs[..]);
}

#[tokio::test]
async fn test_freeze_final_state_with_new_tree() {
    let test = services(&[], EngineConfig::default());
    let (info, docs) = project("app", RUST_LANGUAGE, &["pub struct A;", "pub struct B;"]);
    let id = info.id;
    let solution = Solution::new(test.services.clone()).add_project(info).unwrap();
    let token = CancellationToken::new();
    solution.get_compilation_async(id, &token).await.unwrap();
    let tracker = solution.tracker(id).unwrap();

    // Edited text of an existing document replaces that document's tree.
    let edited = solution.with_document_text(docs[0], "pub struct A2;").unwrap();
    let document = edited.document(docs[0]).unwrap();
    let tree = document.get_tree(&token).unwrap();
    let (frozen, record) = tracker.freeze_partial_with_tree(&solution, document, &tree);
    let compilation = frozen.try_get_compilation().unwrap();
    assert_eq!(tree_texts(&compilation), vec!["pub struct A2;", "pub struct B;"]);
    assert_eq!(record.documents().ids(), &docs[..]);
    let state = frozen.state();
    let TrackerState::Final(final_state) = &*state else {
        panic!("frozen trackers are final");
    };
    assert!(!final_state.has_complete_references);

    // A new document at an existing path evicts the tree at that path.
    let moved = DocumentId::new(id);
    let added = solution
        .add_document(
            DocumentInfo::new(moved, "f0.rs").with_file_path("/src/app/f0.rs"),
            TextSource::constant("pub struct Moved;"),
        )
        .unwrap();
    let document = added.document(moved).unwrap();
    let tree = document.get_tree(&token).unwrap();
    let (frozen, record) = tracker.freeze_partial_with_tree(&solution, document, &tree);
    let compilation = frozen.try_get_compilation().unwrap();
    assert_eq!(tree_texts(&compilation), vec!["pub struct Moved;", "pub struct B;"]);
    assert_eq!(record.documents().ids(), &[moved, docs[1]]);
}
