//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use quire_core::{
    DocumentId, DocumentInfo, EngineConfig, Error, FnGeneratorDriver, GeneratedSource,
    GeneratorDriver, GeneratorId, LanguageId, LanguageService, ParseOptions, ProjectId,
    ProjectInfo, RecordingFaultReporter, Result, RustLanguage, SourceText, SyntaxTree,
    TextSource, WorkspaceServices,
};
use tokio_util::sync::CancellationToken;

/// Route engine logs to the test output. Filter with `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_test_writer()
        .try_init();
}

// =============================================================================
// Language services
// =============================================================================

/// Blocks parses of texts containing `GATE` until opened.
#[derive(Default)]
pub struct Gate {
    open: Mutex<bool>,
    opened: Condvar,
}

impl Gate {
    pub fn open(&self) {
        *self.open.lock().unwrap() = true;
        self.opened.notify_all();
    }

    fn wait(&self) {
        let mut open = self.open.lock().unwrap();
        while !*open {
            open = self.opened.wait(open).unwrap();
        }
    }
}

/// `syn`-backed language that counts parses and can fail or block on
/// marked texts.
pub struct TestLanguage {
    inner: RustLanguage,
    pub parses: AtomicUsize,
    gate: Option<Arc<Gate>>,
}

impl TestLanguage {
    pub fn new(language: &str) -> Arc<Self> {
        Arc::new(Self {
            inner: RustLanguage::with_language(language),
            parses: AtomicUsize::new(0),
            gate: None,
        })
    }

    pub fn gated(language: &str, gate: Arc<Gate>) -> Arc<Self> {
        Arc::new(Self {
            inner: RustLanguage::with_language(language),
            parses: AtomicUsize::new(0),
            gate: Some(gate),
        })
    }

    pub fn parse_count(&self) -> usize {
        self.parses.load(Ordering::SeqCst)
    }
}

impl LanguageService for TestLanguage {
    fn language(&self) -> LanguageId {
        self.inner.language()
    }

    fn parse(
        &self,
        text: &SourceText,
        file_path: Option<&Path>,
        options: &ParseOptions,
        cancel: &CancellationToken,
    ) -> Result<SyntaxTree> {
        self.parses.fetch_add(1, Ordering::SeqCst);
        if text.as_str().contains("FAIL") {
            return Err(Error::Parse("refusing to parse".to_string()));
        }
        if text.as_str().contains("GATE")
            && let Some(gate) = &self.gate
        {
            gate.wait();
        }
        self.inner.parse(text, file_path, options, cancel)
    }
}

// =============================================================================
// Generators
// =============================================================================

/// Generator emitting one file whose text is set by the test.
pub struct TestGenerator {
    pub runs: Arc<AtomicUsize>,
    pub output: Arc<Mutex<String>>,
}

impl TestGenerator {
    pub fn new(initial: &str) -> Self {
        Self {
            runs: Arc::new(AtomicUsize::new(0)),
            output: Arc::new(Mutex::new(initial.to_string())),
        }
    }

    pub fn driver(&self) -> Arc<dyn GeneratorDriver> {
        let runs = self.runs.clone();
        let output = self.output.clone();
        FnGeneratorDriver::new(GeneratorId::new("test"), move |_, _| {
            runs.fetch_add(1, Ordering::SeqCst);
            let text = output.lock().unwrap().clone();
            Ok(vec![GeneratedSource::new(GeneratorId::new("test"), "generated.rs", text)])
        })
        .into_driver()
    }

    pub fn run_count(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    pub fn set_output(&self, text: &str) {
        *self.output.lock().unwrap() = text.to_string();
    }
}

// =============================================================================
// Builders
// =============================================================================

pub struct TestServices {
    pub services: Arc<WorkspaceServices>,
    pub faults: Arc<RecordingFaultReporter>,
}

/// Services with the given extra languages and a recording fault reporter.
pub fn services(languages: &[Arc<TestLanguage>], config: EngineConfig) -> TestServices {
    let faults = Arc::new(RecordingFaultReporter::new());
    let mut builder = WorkspaceServices::builder()
        .with_config(config)
        .with_fault_reporter(faults.clone());
    for language in languages {
        builder = builder.with_language(language.clone());
    }
    TestServices {
        services: builder.build(),
        faults,
    }
}

/// Project info with one source document per text, named `f0.rs`, `f1.rs`...
pub fn project(name: &str, language: &str, texts: &[&str]) -> (ProjectInfo, Vec<DocumentId>) {
    let id = ProjectId::new();
    let mut info = ProjectInfo::new(id, name, language);
    let mut documents = Vec::new();
    for (i, text) in texts.iter().enumerate() {
        let doc = DocumentId::new(id);
        documents.push(doc);
        info = info.with_document(
            DocumentInfo::new(doc, format!("f{}.rs", i))
                .with_file_path(format!("/src/{}/f{}.rs", name, i)),
            TextSource::constant(*text),
        );
    }
    (info, documents)
}

pub fn tree_texts(compilation: &quire_core::Compilation) -> Vec<String> {
    compilation
        .syntax_trees()
        .iter()
        .map(|t| t.text().as_str().to_string())
        .collect()
}
