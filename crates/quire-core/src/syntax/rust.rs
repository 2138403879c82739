//! Reference language service backed by `syn`.
//!
//! Produces declaration summaries only. It is enough to drive the engine end
//! to end and to make structural-equivalence decisions meaningful; it does
//! not resolve names or check types.

use std::path::Path;

use quote::ToTokens;
use syn::{ImplItem, Item, Stmt, TraitItem};
use tokio_util::sync::CancellationToken;

use super::{
    Declaration, DeclarationKind, LanguageService, ParseOptions, SourceKind, SyntaxDiagnostic,
    SyntaxTree,
};
use crate::error::{Error, Result};
use crate::ids::LanguageId;
use crate::text::SourceText;

/// Language id used by [`RustLanguage`].
pub const RUST_LANGUAGE: &str = "rust";

/// `syn`-backed language service.
#[derive(Debug, Clone)]
pub struct RustLanguage {
    language: LanguageId,
}

impl RustLanguage {
    pub fn new() -> Self {
        Self {
            language: LanguageId::new(RUST_LANGUAGE),
        }
    }

    /// Same parser registered under a different language id.
    ///
    /// Two projects using different ids reference each other through
    /// skeletons, which is how cross-language references are exercised.
    pub fn with_language(language: impl Into<LanguageId>) -> Self {
        Self {
            language: language.into(),
        }
    }
}

impl Default for RustLanguage {
    fn default() -> Self {
        Self::new()
    }
}

impl LanguageService for RustLanguage {
    fn language(&self) -> LanguageId {
        self.language.clone()
    }

    fn parse(
        &self,
        text: &SourceText,
        file_path: Option<&Path>,
        options: &ParseOptions,
        cancel: &CancellationToken,
    ) -> Result<SyntaxTree> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let parsed = match options.kind {
            SourceKind::Regular => syn::parse_file(text.as_str()).map(|file| file.items),
            SourceKind::Script => parse_script_items(text.as_str()),
        };

        let (declarations, diagnostics) = match parsed {
            Ok(items) => {
                let mut declarations = Vec::new();
                for item in &items {
                    if is_enabled(item, options) {
                        collect_declarations(item, "", &mut declarations);
                    }
                }
                (declarations, Vec::new())
            }
            Err(e) => {
                let start = e.span().start();
                // Script text is parsed inside a block opened on its own line.
                let line = match options.kind {
                    SourceKind::Regular => start.line,
                    SourceKind::Script => start.line.saturating_sub(1).max(1),
                };
                let diagnostic = SyntaxDiagnostic {
                    message: e.to_string(),
                    position: Some((line, start.column)),
                };
                (Vec::new(), vec![diagnostic])
            }
        };

        Ok(SyntaxTree::new(
            text.clone(),
            file_path.map(Path::to_path_buf),
            options.clone(),
            declarations,
            diagnostics,
        ))
    }
}

fn parse_script_items(source: &str) -> syn::Result<Vec<Item>> {
    let block: syn::Block = syn::parse_str(&format!("{{\n{}\n}}", source))?;
    Ok(block
        .stmts
        .into_iter()
        .filter_map(|stmt| match stmt {
            Stmt::Item(item) => Some(item),
            _ => None,
        })
        .collect())
}

fn item_attrs(item: &Item) -> &[syn::Attribute] {
    match item {
        Item::Const(i) => &i.attrs,
        Item::Enum(i) => &i.attrs,
        Item::ExternCrate(i) => &i.attrs,
        Item::Fn(i) => &i.attrs,
        Item::ForeignMod(i) => &i.attrs,
        Item::Impl(i) => &i.attrs,
        Item::Macro(i) => &i.attrs,
        Item::Mod(i) => &i.attrs,
        Item::Static(i) => &i.attrs,
        Item::Struct(i) => &i.attrs,
        Item::Trait(i) => &i.attrs,
        Item::TraitAlias(i) => &i.attrs,
        Item::Type(i) => &i.attrs,
        Item::Union(i) => &i.attrs,
        Item::Use(i) => &i.attrs,
        _ => &[],
    }
}

/// Evaluates `#[cfg(feature = "...")]` against the enabled features.
/// Any other cfg predicate is treated as enabled.
fn is_enabled(item: &Item, options: &ParseOptions) -> bool {
    item_attrs(item).iter().all(|attr| {
        if !attr.path().is_ident("cfg") {
            return true;
        }
        let Ok(syn::Meta::NameValue(nv)) = attr.parse_args::<syn::Meta>() else {
            return true;
        };
        if !nv.path.is_ident("feature") {
            return true;
        }
        match &nv.value {
            syn::Expr::Lit(syn::ExprLit {
                lit: syn::Lit::Str(s),
                ..
            }) => options.features.iter().any(|f| *f == s.value()),
            _ => true,
        }
    })
}

fn tokens(node: &impl ToTokens) -> String {
    node.to_token_stream().to_string()
}

fn qualified(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}::{}", prefix, name)
    }
}

fn collect_declarations(item: &Item, prefix: &str, out: &mut Vec<Declaration>) {
    let mut push = |kind, name: String, signature: String| {
        out.push(Declaration {
            kind,
            name: qualified(prefix, &name),
            signature,
        })
    };

    match item {
        Item::Fn(f) => push(
            DeclarationKind::Function,
            f.sig.ident.to_string(),
            format!("{} {}", tokens(&f.vis), tokens(&f.sig)),
        ),
        Item::Struct(s) => push(DeclarationKind::Struct, s.ident.to_string(), tokens(s)),
        Item::Enum(e) => push(DeclarationKind::Enum, e.ident.to_string(), tokens(e)),
        Item::Union(u) => push(DeclarationKind::Union, u.ident.to_string(), tokens(u)),
        Item::Type(t) => push(DeclarationKind::TypeAlias, t.ident.to_string(), tokens(t)),
        Item::Const(c) => push(
            DeclarationKind::Const,
            c.ident.to_string(),
            format!("{} const {}: {}", tokens(&c.vis), c.ident, tokens(&c.ty)),
        ),
        Item::Static(s) => push(
            DeclarationKind::Static,
            s.ident.to_string(),
            format!(
                "{} static {}{}: {}",
                tokens(&s.vis),
                if matches!(s.mutability, syn::StaticMutability::Mut(_)) {
                    "mut "
                } else {
                    ""
                },
                s.ident,
                tokens(&s.ty)
            ),
        ),
        Item::Trait(t) => {
            let members: Vec<String> = t
                .items
                .iter()
                .map(|member| match member {
                    TraitItem::Fn(f) => tokens(&f.sig),
                    other => tokens(other),
                })
                .collect();
            push(
                DeclarationKind::Trait,
                t.ident.to_string(),
                format!(
                    "{} trait {}{} {{ {} }}",
                    tokens(&t.vis),
                    t.ident,
                    tokens(&t.generics),
                    members.join("; ")
                ),
            )
        }
        Item::Impl(i) => {
            let target = match &i.trait_ {
                Some((_, path, _)) => format!("{} for {}", tokens(path), tokens(&i.self_ty)),
                None => tokens(&i.self_ty),
            };
            let members: Vec<String> = i
                .items
                .iter()
                .map(|member| match member {
                    ImplItem::Fn(f) => format!("{} {}", tokens(&f.vis), tokens(&f.sig)),
                    ImplItem::Const(c) => format!("const {}: {}", c.ident, tokens(&c.ty)),
                    other => tokens(other),
                })
                .collect();
            push(
                DeclarationKind::Impl,
                target.clone(),
                format!("impl{} {} {{ {} }}", tokens(&i.generics), target, members.join("; ")),
            )
        }
        Item::Mod(m) => {
            push(
                DeclarationKind::Module,
                m.ident.to_string(),
                format!("{} mod {}", tokens(&m.vis), m.ident),
            );
            if let Some((_, items)) = &m.content {
                let nested = qualified(prefix, &m.ident.to_string());
                for item in items {
                    collect_declarations(item, &nested, out);
                }
            }
        }
        Item::Use(u) => push(DeclarationKind::Use, tokens(&u.tree), tokens(u)),
        Item::Macro(m) => {
            let name = m
                .ident
                .as_ref()
                .map(|ident| ident.to_string())
                .unwrap_or_else(|| tokens(&m.mac.path));
            push(DeclarationKind::Macro, name, tokens(m))
        }
        other => push(DeclarationKind::Other, String::new(), tokens(other)),
    }
}
