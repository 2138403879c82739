//! Document text and text loading.
//!
//! Text is immutable and shared by `Arc`. A [`TextSource`] wraps either a
//! known text or a [`TextLoader`] collaborator behind an [`AsyncLazy`], so a
//! document's text is loaded at most once per snapshot.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::ids::{Checksum, VersionStamp};
use crate::lazy::AsyncLazy;

/// Immutable document text with a precomputed checksum.
#[derive(Clone)]
pub struct SourceText(Arc<SourceTextInner>);

struct SourceTextInner {
    text: Arc<str>,
    checksum: Checksum,
}

impl SourceText {
    pub fn new(text: impl Into<Arc<str>>) -> Self {
        let text = text.into();
        let checksum = Checksum::of_str(&text);
        Self(Arc::new(SourceTextInner { text, checksum }))
    }

    pub fn as_str(&self) -> &str {
        &self.0.text
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.0.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.text.is_empty()
    }

    pub fn checksum(&self) -> Checksum {
        self.0.checksum
    }

    /// Byte-identical content, regardless of object identity.
    pub fn content_equals(&self, other: &SourceText) -> bool {
        self.ptr_eq(other) || (self.0.checksum == other.0.checksum && self.0.text == other.0.text)
    }

    pub fn ptr_eq(&self, other: &SourceText) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Size of the region that differs between `old` and `self`, measured on
    /// the larger side after trimming the common prefix and suffix.
    pub fn changed_len_from(&self, old: &SourceText) -> usize {
        let a = old.as_str().as_bytes();
        let b = self.as_str().as_bytes();
        let prefix = a.iter().zip(b).take_while(|(x, y)| x == y).count();
        let max_suffix = a.len().min(b.len()) - prefix;
        let suffix = a
            .iter()
            .rev()
            .zip(b.iter().rev())
            .take(max_suffix)
            .take_while(|(x, y)| x == y)
            .count();
        (a.len() - prefix - suffix).max(b.len() - prefix - suffix)
    }
}

impl fmt::Debug for SourceText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceText")
            .field("len", &self.len())
            .field("checksum", &self.0.checksum)
            .finish()
    }
}

impl From<&str> for SourceText {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for SourceText {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Text paired with the version it was loaded at.
#[derive(Debug, Clone)]
pub struct TextAndVersion {
    pub text: SourceText,
    pub version: VersionStamp,
    pub file_path: Option<PathBuf>,
}

impl TextAndVersion {
    pub fn new(text: SourceText, version: VersionStamp) -> Self {
        Self {
            text,
            version,
            file_path: None,
        }
    }
}

/// Text source collaborator.
pub trait TextLoader: Send + Sync + fmt::Debug {
    /// Path the text comes from, if any.
    fn file_path(&self) -> Option<&Path> {
        None
    }

    /// Whether loading again may observe different text.
    fn is_reloadable(&self) -> bool {
        false
    }

    fn load_text(&self, cancel: &CancellationToken) -> Result<TextAndVersion>;

    fn load_text_async(&self, cancel: CancellationToken) -> BoxFuture<'_, Result<TextAndVersion>> {
        let result = self.load_text(&cancel);
        async move { result }.boxed()
    }
}

/// Loader that always returns the same text.
#[derive(Debug, Clone)]
pub struct ConstantTextLoader {
    value: TextAndVersion,
}

impl ConstantTextLoader {
    pub fn new(text: impl Into<SourceText>) -> Self {
        Self {
            value: TextAndVersion::new(text.into(), VersionStamp::new()),
        }
    }
}

impl TextLoader for ConstantTextLoader {
    fn file_path(&self) -> Option<&Path> {
        self.value.file_path.as_deref()
    }

    fn load_text(&self, cancel: &CancellationToken) -> Result<TextAndVersion> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(self.value.clone())
    }
}

/// Loader that reads a UTF-8 file from disk on every load.
#[derive(Debug, Clone)]
pub struct FileTextLoader {
    path: PathBuf,
}

impl FileTextLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn load_error(&self, e: std::io::Error) -> Error {
        Error::TextLoad {
            path: Some(self.path.clone()),
            message: e.to_string(),
        }
    }

    fn wrap(&self, text: String) -> TextAndVersion {
        TextAndVersion {
            text: SourceText::new(text),
            version: VersionStamp::new(),
            file_path: Some(self.path.clone()),
        }
    }
}

impl TextLoader for FileTextLoader {
    fn file_path(&self) -> Option<&Path> {
        Some(&self.path)
    }

    fn is_reloadable(&self) -> bool {
        true
    }

    fn load_text(&self, cancel: &CancellationToken) -> Result<TextAndVersion> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let text = std::fs::read_to_string(&self.path).map_err(|e| self.load_error(e))?;
        Ok(self.wrap(text))
    }

    fn load_text_async(&self, cancel: CancellationToken) -> BoxFuture<'_, Result<TextAndVersion>> {
        async move {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let text = tokio::fs::read_to_string(&self.path)
                .await
                .map_err(|e| self.load_error(e))?;
            Ok(self.wrap(text))
        }
        .boxed()
    }
}

/// Lazily loaded, versioned document text.
#[derive(Clone)]
pub struct TextSource {
    loader: Option<Arc<dyn TextLoader>>,
    value: Arc<AsyncLazy<TextAndVersion>>,
}

impl TextSource {
    /// A source whose text is already known.
    pub fn from_text(text: SourceText, version: VersionStamp, file_path: Option<PathBuf>) -> Self {
        Self {
            loader: None,
            value: Arc::new(AsyncLazy::from_value(TextAndVersion {
                text,
                version,
                file_path,
            })),
        }
    }

    /// A source over fixed text with a fresh version.
    pub fn constant(text: impl Into<SourceText>) -> Self {
        Self::from_text(text.into(), VersionStamp::new(), None)
    }

    /// A source that defers to `loader` on first access.
    pub fn from_loader(loader: Arc<dyn TextLoader>) -> Self {
        let async_loader = loader.clone();
        let sync_loader = loader.clone();
        let value = AsyncLazy::with_sync(
            move |token| {
                let loader = async_loader.clone();
                async move { loader.load_text_async(token).await }
            },
            move |token| sync_loader.load_text(token),
        );
        Self {
            loader: Some(loader),
            value: Arc::new(value),
        }
    }

    /// A fresh source over the same loader, or `self` if not reloadable.
    pub fn reload(&self) -> Self {
        match &self.loader {
            Some(loader) if loader.is_reloadable() => Self::from_loader(loader.clone()),
            _ => self.clone(),
        }
    }

    pub fn is_reloadable(&self) -> bool {
        self.loader.as_ref().is_some_and(|l| l.is_reloadable())
    }

    pub fn try_get(&self) -> Option<TextAndVersion> {
        self.value.try_get_value()
    }

    pub fn get(&self, cancel: &CancellationToken) -> Result<TextAndVersion> {
        self.value.get_value(cancel)
    }

    pub async fn get_async(&self, cancel: &CancellationToken) -> Result<TextAndVersion> {
        self.value.get_value_async(cancel).await
    }
}

impl fmt::Debug for TextSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TextSource")
            .field("loader", &self.loader)
            .field("value", &self.value)
            .finish()
    }
}
