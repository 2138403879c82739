//! Generated documents and reconciliation of generator output.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use rustc_hash::FxHashSet;
use tokio_util::sync::CancellationToken;

use super::{AdditionalText, GeneratedSource, GeneratorDriver, GeneratorId};
use crate::compilation::Compilation;
use crate::error::Result;
use crate::ids::{DocumentId, ProjectId};
use crate::policy::CreationMode;
use crate::syntax::{LanguageService, ParseOptions, SyntaxTree};
use crate::text::SourceText;

/// A document produced by a generator.
#[derive(Debug, Clone)]
pub struct GeneratedDocument {
    id: DocumentId,
    generator: GeneratorId,
    hint_name: String,
    text: SourceText,
    tree: SyntaxTree,
}

impl GeneratedDocument {
    pub fn id(&self) -> DocumentId {
        self.id
    }

    pub fn generator(&self) -> &GeneratorId {
        &self.generator
    }

    pub fn hint_name(&self) -> &str {
        &self.hint_name
    }

    pub fn text(&self) -> &SourceText {
        &self.text
    }

    pub fn tree(&self) -> &SyntaxTree {
        &self.tree
    }

    fn has_key(&self, generator: &GeneratorId, hint_name: &str) -> bool {
        self.generator == *generator && self.hint_name == hint_name
    }
}

/// Path under which a generated document is exposed.
fn generated_path(generator: &GeneratorId, hint_name: &str) -> PathBuf {
    PathBuf::from(format!("generated/{}/{}", generator, hint_name))
}

/// Ordered, immutable set of generated documents.
#[derive(Debug, Clone, Default)]
pub struct GeneratedDocuments(Arc<Vec<GeneratedDocument>>);

impl GeneratedDocuments {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &GeneratedDocument> {
        self.0.iter()
    }

    pub fn get(&self, id: DocumentId) -> Option<&GeneratedDocument> {
        self.0.iter().find(|d| d.id == id)
    }

    pub fn get_by_key(
        &self,
        generator: &GeneratorId,
        hint_name: &str,
    ) -> Option<&GeneratedDocument> {
        self.0.iter().find(|d| d.has_key(generator, hint_name))
    }

    pub fn trees(&self) -> impl Iterator<Item = SyntaxTree> + '_ {
        self.0.iter().map(|d| d.tree.clone())
    }

    /// Same keys in the same order.
    fn same_keys(&self, other: &GeneratedDocuments) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .zip(other.iter())
                .all(|(a, b)| a.has_key(&b.generator, &b.hint_name))
    }
}

/// Generator bookkeeping carried by every tracker state.
#[derive(Clone, Default)]
pub struct GeneratorState {
    pub documents: GeneratedDocuments,
    pub driver: Option<Arc<dyn GeneratorDriver>>,
    /// Documents must be reused as they are, without running generators.
    pub documents_are_final: bool,
    pub diagnostics: Arc<Vec<String>>,
}

impl GeneratorState {
    pub fn new(driver: Option<Arc<dyn GeneratorDriver>>) -> Self {
        Self {
            driver,
            ..Default::default()
        }
    }

    pub fn has_generators(&self) -> bool {
        self.driver.is_some()
    }

    pub fn with_driver(&self, driver: Option<Arc<dyn GeneratorDriver>>) -> Self {
        Self {
            driver,
            ..self.clone()
        }
    }

    pub fn with_documents_are_final(&self, documents_are_final: bool) -> Self {
        Self {
            documents_are_final,
            ..self.clone()
        }
    }
}

impl fmt::Debug for GeneratorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratorState")
            .field("documents", &self.documents.len())
            .field("has_generators", &self.has_generators())
            .field("documents_are_final", &self.documents_are_final)
            .finish()
    }
}

/// Everything a generator step needs besides compilations.
pub(crate) struct GeneratorInputs<'a> {
    pub project: ProjectId,
    pub language: &'a dyn LanguageService,
    pub parse_options: &'a ParseOptions,
    pub additional_texts: &'a [AdditionalText],
    pub mode: CreationMode,
}

pub(crate) struct GeneratorOutcome {
    pub state: GeneratorState,
    pub with_generated: Compilation,
}

/// Run the generator step against a reference-complete base compilation.
///
/// `stale` is a generated-augmented compilation kept in step with `base`
/// while actions were drained, if any.
pub(crate) async fn run_generators(
    base: &Compilation,
    stale: Option<Compilation>,
    state: GeneratorState,
    inputs: GeneratorInputs<'_>,
    cancel: &CancellationToken,
) -> Result<GeneratorOutcome> {
    let Some(driver) = state.driver.clone() else {
        return Ok(GeneratorOutcome {
            state: GeneratorState {
                documents: GeneratedDocuments::default(),
                ..state
            },
            with_generated: base.clone(),
        });
    };

    if state.documents_are_final || !inputs.mode.allows_creation(!state.documents.is_empty()) {
        tracing::trace!(project = %inputs.project, "reusing generated documents");
        let with_generated = augment(base, stale, &state.documents, &state.documents);
        return Ok(GeneratorOutcome {
            state,
            with_generated,
        });
    }

    let driver = driver
        .with_parse_options(inputs.parse_options)
        .unwrap_or(driver);
    let driver = driver
        .with_additional_texts(inputs.additional_texts)
        .unwrap_or(driver);

    let run = match driver.run_generators(base.clone(), cancel.clone()).await {
        Ok(run) => run,
        Err(e) if e.is_cancelled() => return Err(e),
        Err(e) => {
            tracing::warn!(
                project = %inputs.project,
                error = %e,
                "generator run failed, keeping previous output"
            );
            let with_generated = augment(base, stale, &state.documents, &state.documents);
            return Ok(GeneratorOutcome {
                state: GeneratorState {
                    driver: Some(driver),
                    diagnostics: Arc::new(vec![e.to_string()]),
                    ..state
                },
                with_generated,
            });
        }
    };

    let driver = run.driver.unwrap_or(driver);
    let documents = reconcile(&state.documents, run.result.sources, &inputs, cancel)?;
    let with_generated = augment(base, stale, &state.documents, &documents);

    tracing::debug!(
        project = %inputs.project,
        generated = documents.len(),
        "generators ran"
    );

    Ok(GeneratorOutcome {
        state: GeneratorState {
            documents,
            driver: Some(driver),
            documents_are_final: false,
            diagnostics: Arc::new(run.result.diagnostics),
        },
        with_generated,
    })
}

/// Match new generator output against the previous documents by
/// (generator, hint name).
fn reconcile(
    previous: &GeneratedDocuments,
    sources: Vec<GeneratedSource>,
    inputs: &GeneratorInputs<'_>,
    cancel: &CancellationToken,
) -> Result<GeneratedDocuments> {
    let mut seen = FxHashSet::default();
    let mut documents = Vec::with_capacity(sources.len());

    for source in sources {
        if !seen.insert((source.generator.clone(), source.hint_name.clone())) {
            tracing::warn!(
                generator = %source.generator,
                hint_name = %source.hint_name,
                "duplicate generated hint name ignored"
            );
            continue;
        }

        let prior = previous.get_by_key(&source.generator, &source.hint_name);
        if let Some(prior) = prior
            && prior.text.content_equals(&source.text)
            && prior.tree.options() == inputs.parse_options
        {
            documents.push(prior.clone());
            continue;
        }

        let id = match prior {
            Some(prior) => prior.id,
            None => DocumentId::deterministic(
                inputs.project,
                &format!("generated/{}/{}", source.generator, source.hint_name),
            ),
        };
        let path = generated_path(&source.generator, &source.hint_name);
        let tree = inputs
            .language
            .parse(&source.text, Some(&path), inputs.parse_options, cancel)?;
        documents.push(GeneratedDocument {
            id,
            generator: source.generator,
            hint_name: source.hint_name,
            text: source.text,
            tree,
        });
    }

    Ok(GeneratedDocuments(Arc::new(documents)))
}

/// Build the generated-augmented compilation.
///
/// The stale compilation is reused only when its trees are exactly the base
/// trees followed by the old generated trees and the key set is unchanged;
/// any other case rebuilds from the base.
fn augment(
    base: &Compilation,
    stale: Option<Compilation>,
    old: &GeneratedDocuments,
    new: &GeneratedDocuments,
) -> Compilation {
    if new.is_empty() {
        return base.clone();
    }

    if let Some(stale) = stale
        && old.same_keys(new)
        && stale_matches_base(&stale, base, old)
    {
        let mut compilation = stale;
        for (before, after) in old.iter().zip(new.iter()) {
            if !before.tree.ptr_eq(&after.tree) {
                compilation = compilation.replace_syntax_tree(&before.tree, after.tree.clone());
            }
        }
        return compilation
            .with_references(base.references().to_vec())
            .with_previous_submission(base.previous_submission().cloned());
    }

    base.add_syntax_trees(new.trees())
}

fn stale_matches_base(stale: &Compilation, base: &Compilation, old: &GeneratedDocuments) -> bool {
    let stale_trees = stale.syntax_trees();
    let base_trees = base.syntax_trees();
    stale_trees.len() == base_trees.len() + old.len()
        && stale.options() == base.options()
        && stale.assembly_name() == base.assembly_name()
        && stale_trees
            .iter()
            .zip(base_trees.iter().chain(old.iter().map(|d| &d.tree)))
            .all(|(a, b)| a.ptr_eq(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compilation::CompilationOptions;
    use crate::generators::FnGeneratorDriver;
    use crate::ids::LanguageId;
    use crate::syntax::RustLanguage;
    use std::sync::Mutex;

    fn base() -> Compilation {
        let language = RustLanguage::new();
        let tree = language
            .parse(
                &SourceText::new("pub struct User;"),
                None,
                &ParseOptions::default(),
                &CancellationToken::new(),
            )
            .unwrap();
        Compilation::new("app", LanguageId::new("rust"), CompilationOptions::default())
            .add_syntax_trees([tree])
    }

    /// Driver whose output is whatever the shared list holds.
    fn scripted_driver(
        output: Arc<Mutex<Vec<(&'static str, String)>>>,
    ) -> Arc<dyn GeneratorDriver> {
        FnGeneratorDriver::new(GeneratorId::new("scripted"), move |_, _| {
            Ok(output
                .lock()
                .unwrap()
                .iter()
                .map(|(hint, text)| {
                    GeneratedSource::new(GeneratorId::new("scripted"), *hint, text.as_str())
                })
                .collect())
        })
        .into_driver()
    }

    async fn run(
        base: &Compilation,
        stale: Option<Compilation>,
        state: GeneratorState,
        project: ProjectId,
    ) -> GeneratorOutcome {
        let language = RustLanguage::new();
        let options = ParseOptions::default();
        run_generators(
            base,
            stale,
            state,
            GeneratorInputs {
                project,
                language: &language,
                parse_options: &options,
                additional_texts: &[],
                mode: CreationMode::Create,
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_no_driver_uses_base_compilation() {
        let base = base();
        let outcome = run(&base, None, GeneratorState::default(), ProjectId::new()).await;
        assert!(outcome.with_generated.ptr_eq(&base));
        assert!(outcome.state.documents.is_empty());
    }

    #[tokio::test]
    async fn test_identical_output_keeps_identity() {
        let output = Arc::new(Mutex::new(vec![("a.rs", "pub struct A;".to_string())]));
        let project = ProjectId::new();
        let base = base();

        let state = GeneratorState::new(Some(scripted_driver(output.clone())));
        let first = run(&base, None, state, project).await;
        assert_eq!(first.with_generated.syntax_trees().len(), 2);

        let second = run(
            &base,
            Some(first.with_generated.clone()),
            first.state.clone(),
            project,
        )
        .await;
        let before = first.state.documents.iter().next().unwrap();
        let after = second.state.documents.iter().next().unwrap();
        assert_eq!(before.id(), after.id());
        assert!(before.tree().ptr_eq(after.tree()));
    }

    #[tokio::test]
    async fn test_changed_output_keeps_id_but_not_tree() {
        let output = Arc::new(Mutex::new(vec![("a.rs", "pub struct A;".to_string())]));
        let project = ProjectId::new();
        let base = base();

        let state = GeneratorState::new(Some(scripted_driver(output.clone())));
        let first = run(&base, None, state, project).await;
        output.lock().unwrap()[0].1 = "pub struct A2;".to_string();
        let second = run(
            &base,
            Some(first.with_generated.clone()),
            first.state.clone(),
            project,
        )
        .await;

        let before = first.state.documents.iter().next().unwrap();
        let after = second.state.documents.iter().next().unwrap();
        assert_eq!(before.id(), after.id());
        assert!(!before.tree().ptr_eq(after.tree()));
        assert!(second.with_generated.contains_syntax_tree(after.tree()));
        assert!(!second.with_generated.contains_syntax_tree(before.tree()));
        assert_eq!(second.with_generated.syntax_trees().len(), 2);
    }

    #[tokio::test]
    async fn test_key_set_change_rebuilds_from_base() {
        let output = Arc::new(Mutex::new(vec![("a.rs", "pub struct A;".to_string())]));
        let project = ProjectId::new();
        let base = base();

        let state = GeneratorState::new(Some(scripted_driver(output.clone())));
        let first = run(&base, None, state, project).await;
        output.lock().unwrap().push(("b.rs", "pub struct B;".to_string()));
        let second = run(
            &base,
            Some(first.with_generated.clone()),
            first.state.clone(),
            project,
        )
        .await;

        assert_eq!(second.state.documents.len(), 2);
        let trees = second.with_generated.syntax_trees();
        assert_eq!(trees.len(), 3);
        assert!(trees[0].ptr_eq(&base.syntax_trees()[0]));
        for doc in second.state.documents.iter() {
            assert!(second.with_generated.contains_syntax_tree(doc.tree()));
        }
    }

    #[tokio::test]
    async fn test_final_documents_are_reused_without_running() {
        let calls = Arc::new(Mutex::new(0usize));
        let driver = {
            let calls = calls.clone();
            FnGeneratorDriver::new(GeneratorId::new("counting"), move |_, _| {
                *calls.lock().unwrap() += 1;
                Ok(vec![GeneratedSource::new(
                    GeneratorId::new("counting"),
                    "c.rs",
                    "pub struct C;",
                )])
            })
            .into_driver()
        };
        let project = ProjectId::new();
        let base = base();

        let first = run(&base, None, GeneratorState::new(Some(driver)), project).await;
        let frozen = first.state.with_documents_are_final(true);
        let second = run(&base, None, frozen, project).await;

        assert_eq!(*calls.lock().unwrap(), 1);
        let before = first.state.documents.iter().next().unwrap();
        assert!(second.with_generated.contains_syntax_tree(before.tree()));
    }
}
