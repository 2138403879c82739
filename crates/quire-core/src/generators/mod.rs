//! Source generator integration.
//!
//! A project may carry a [`GeneratorDriver`]. Once a project's base
//! compilation is reference complete, the driver runs against it and its
//! output is reconciled with the previously generated documents so that
//! unchanged output keeps its document and tree identity.

mod documents;

pub use documents::{GeneratedDocument, GeneratedDocuments, GeneratorState};
pub(crate) use documents::{GeneratorInputs, GeneratorOutcome, run_generators};

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use tokio_util::sync::CancellationToken;

use crate::compilation::Compilation;
use crate::error::{Error, Result};
use crate::syntax::ParseOptions;
use crate::text::SourceText;

/// Stable identity of one generator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GeneratorId(Arc<str>);

impl GeneratorId {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GeneratorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One source file produced by a generator.
#[derive(Debug, Clone)]
pub struct GeneratedSource {
    pub generator: GeneratorId,
    /// Name unique per generator; together with the generator it keys the
    /// generated document across runs.
    pub hint_name: String,
    pub text: SourceText,
}

impl GeneratedSource {
    pub fn new(
        generator: GeneratorId,
        hint_name: impl Into<String>,
        text: impl Into<SourceText>,
    ) -> Self {
        Self {
            generator,
            hint_name: hint_name.into(),
            text: text.into(),
        }
    }
}

/// Output of one generator run.
#[derive(Debug, Clone, Default)]
pub struct GeneratorRunResult {
    pub sources: Vec<GeneratedSource>,
    pub diagnostics: Vec<String>,
}

/// A non-source input visible to generators (additional and config documents).
#[derive(Debug, Clone)]
pub struct AdditionalText {
    pub name: String,
    pub path: Option<PathBuf>,
    pub text: SourceText,
}

/// Result of [`GeneratorDriver::run_generators`].
pub struct GeneratorRun {
    /// The driver to use for the next run, if it changed.
    pub driver: Option<Arc<dyn GeneratorDriver>>,
    pub result: GeneratorRunResult,
}

/// Generator driver collaborator.
///
/// Drivers are immutable; methods that change inputs return a new driver,
/// or `None` when nothing changed.
pub trait GeneratorDriver: Send + Sync {
    fn generators(&self) -> Vec<GeneratorId>;

    fn run_generators(
        &self,
        compilation: Compilation,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<GeneratorRun>>;

    fn with_parse_options(&self, _options: &ParseOptions) -> Option<Arc<dyn GeneratorDriver>> {
        None
    }

    fn with_additional_texts(&self, _texts: &[AdditionalText]) -> Option<Arc<dyn GeneratorDriver>> {
        None
    }
}

impl fmt::Debug for dyn GeneratorDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratorDriver")
            .field("generators", &self.generators())
            .finish()
    }
}

type GenerateFn =
    dyn Fn(&Compilation, &[AdditionalText]) -> Result<Vec<GeneratedSource>> + Send + Sync;

/// Driver that runs a plain function as a single generator.
#[derive(Clone)]
pub struct FnGeneratorDriver {
    generator: GeneratorId,
    generate: Arc<GenerateFn>,
    additional_texts: Arc<Vec<AdditionalText>>,
}

impl FnGeneratorDriver {
    pub fn new<F>(generator: GeneratorId, generate: F) -> Self
    where
        F: Fn(&Compilation, &[AdditionalText]) -> Result<Vec<GeneratedSource>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            generator,
            generate: Arc::new(generate),
            additional_texts: Arc::new(Vec::new()),
        }
    }

    pub fn into_driver(self) -> Arc<dyn GeneratorDriver> {
        Arc::new(self)
    }
}

impl GeneratorDriver for FnGeneratorDriver {
    fn generators(&self) -> Vec<GeneratorId> {
        vec![self.generator.clone()]
    }

    fn run_generators(
        &self,
        compilation: Compilation,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<GeneratorRun>> {
        async move {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let sources = (self.generate)(&compilation, &self.additional_texts)?;
            Ok(GeneratorRun {
                driver: None,
                result: GeneratorRunResult {
                    sources,
                    diagnostics: Vec::new(),
                },
            })
        }
        .boxed()
    }

    fn with_additional_texts(&self, texts: &[AdditionalText]) -> Option<Arc<dyn GeneratorDriver>> {
        let unchanged = texts.len() == self.additional_texts.len()
            && texts
                .iter()
                .zip(self.additional_texts.iter())
                .all(|(a, b)| a.name == b.name && a.text.content_equals(&b.text));
        if unchanged {
            return None;
        }
        Some(Arc::new(Self {
            generator: self.generator.clone(),
            generate: self.generate.clone(),
            additional_texts: Arc::new(texts.to_vec()),
        }))
    }
}
