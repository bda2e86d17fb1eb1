//! Pure decision logic for a single reference found during a bundle pass.
//!
//! [`classify_reference`] knows nothing about the CSS engine or the network:
//! it maps a [`Reference`] to an [`Action`], and the resolver turns the action
//! into fetches, cache writes and whatever shape the engine expects.

use crate::cache_path::{cache_path_to_url, is_cached};
use crate::{Error, Result};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use url::Url;

/// Where a reference came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReferenceKind {
    /// The entry point of a bundle pass.
    EntryPoint,
    /// `@import`.
    Import,
    /// `url()`, including inside `image-set()`.
    UrlToken,
    /// A `data:` specifier, in either position.
    DataUrl,
    /// `composes: x from "..."` in a CSS module.
    ComposesFrom,
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReferenceKind::EntryPoint => "entry-point",
            ReferenceKind::Import => "import",
            ReferenceKind::UrlToken => "url-token",
            ReferenceKind::DataUrl => "data-url",
            ReferenceKind::ComposesFrom => "composes-from",
        })
    }
}

/// A single import or URL token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub specifier: String,
    pub kind: ReferenceKind,
    /// File that contained the reference; `None` for entry points.
    pub importer: Option<PathBuf>,
}

impl Reference {
    /// Build a reference, reclassifying `data:` specifiers as [`ReferenceKind::DataUrl`].
    pub fn new(specifier: impl Into<String>, kind: ReferenceKind, importer: Option<PathBuf>) -> Self {
        let specifier = specifier.into();
        let kind = if is_data_url(&specifier) {
            ReferenceKind::DataUrl
        } else {
            kind
        };
        Self {
            specifier,
            kind,
            importer,
        }
    }

    pub fn entry_point(specifier: impl Into<String>) -> Self {
        Self::new(specifier, ReferenceKind::EntryPoint, None)
    }
}

/// What to do with a reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Leave the specifier in the output untouched.
    External(String),
    /// Fetch this absolute URL.
    Fetch(Url),
    /// Let the engine read this local file.
    Local(PathBuf),
}

/// Decide what to do with `reference`.
///
/// `cache_dir` identifies importers that are cached remote files;
/// `external_paths` are prefixes that are never inlined or fetched.
pub fn classify_reference(
    reference: &Reference,
    cache_dir: &Path,
    external_paths: &[String],
) -> Result<Action> {
    let specifier = reference.specifier.as_str();
    let unsupported = || Error::UnsupportedReferenceKind {
        kind: reference.kind.to_string(),
        specifier: specifier.to_string(),
    };

    if reference.kind == ReferenceKind::DataUrl || is_data_url(specifier) {
        return Ok(Action::External(specifier.to_string()));
    }
    if external_paths
        .iter()
        .any(|prefix| specifier.starts_with(prefix.as_str()))
    {
        return Ok(Action::External(specifier.to_string()));
    }
    // Fragment-only references point into the document (`url(#gradient)`).
    if specifier.starts_with('#') {
        return Ok(Action::External(specifier.to_string()));
    }

    if is_remote(specifier) {
        if reference.kind == ReferenceKind::ComposesFrom {
            return Err(unsupported());
        }
        return parse_url(specifier).map(Action::Fetch);
    }
    if let Some(rest) = specifier.strip_prefix("//") {
        return parse_url(&format!("https://{rest}")).map(Action::Fetch);
    }
    if has_foreign_scheme(specifier) {
        return Ok(Action::External(specifier.to_string()));
    }

    match (&reference.importer, reference.kind) {
        (None, ReferenceKind::EntryPoint) => Ok(Action::Local(normalize(Path::new(specifier)))),
        (None, _) | (Some(_), ReferenceKind::EntryPoint) => Err(unsupported()),
        (Some(importer), kind) if is_cached(cache_dir, importer) => match kind {
            ReferenceKind::Import | ReferenceKind::UrlToken => {
                let base = cache_path_to_url(cache_dir, importer)?;
                base.join(specifier)
                    .map(Action::Fetch)
                    .map_err(|source| Error::InvalidUrl {
                        specifier: specifier.to_string(),
                        source,
                    })
            }
            _ => Err(unsupported()),
        },
        (Some(importer), _) => {
            let dir = importer.parent().unwrap_or(Path::new(""));
            Ok(Action::Local(normalize(&dir.join(strip_suffix(specifier)))))
        }
    }
}

/// `^https?://`, case-insensitively.
pub fn is_remote(specifier: &str) -> bool {
    let lower = specifier.get(..8).unwrap_or(specifier).to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

fn is_data_url(specifier: &str) -> bool {
    specifier
        .get(..5)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("data:"))
}

/// `blob:`, `mailto:` and friends. A Windows drive letter is not a scheme.
fn has_foreign_scheme(specifier: &str) -> bool {
    match specifier.split_once(':') {
        Some((scheme, _)) => {
            scheme.len() > 1
                && scheme.starts_with(|c: char| c.is_ascii_alphabetic())
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        None => false,
    }
}

fn parse_url(specifier: &str) -> Result<Url> {
    Url::parse(specifier).map_err(|source| Error::InvalidUrl {
        specifier: specifier.to_string(),
        source,
    })
}

/// Drop `?query` and `#fragment` from a local specifier.
fn strip_suffix(specifier: &str) -> &str {
    specifier.split(['?', '#']).next().unwrap_or(specifier)
}

/// Lexically resolve `.` and `..` without touching the filesystem.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(out.components().next_back(), Some(Component::Normal(_))) {
                    out.pop();
                } else if !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other),
        }
    }
    out
}
