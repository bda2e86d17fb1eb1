//! Adapter between the resolver and lightningcss.
//!
//! The engine only understands local files, so a bundle pass first discovers
//! every stylesheet (see [`crate::bundle`]), rewrites `url()` tokens that point
//! at fetched assets, and then hands the prepared sources to the lightningcss
//! [`Bundler`] through [`PreparedSources`]. Imports resolve from a table built
//! during discovery, so the engine never touches the network.

use crate::{Error, Result};
use lightningcss::bundler::{Bundler, ResolveResult, SourceProvider};
use lightningcss::rules::CssRule;
use lightningcss::stylesheet::{ParserOptions, PrinterOptions, StyleSheet};
use lightningcss::values::url::Url;
use lightningcss::visitor::Visit;
use parcel_sourcemap::SourceMap;
use std::collections::HashMap;
use std::convert::Infallible;
use std::io;
use std::path::{Path, PathBuf};

/// References found in one stylesheet, in source order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Scan {
    pub imports: Vec<String>,
    pub urls: Vec<String>,
}

fn parser_options<'i>(filename: &str) -> ParserOptions<'i> {
    ParserOptions {
        filename: filename.to_string(),
        ..ParserOptions::default()
    }
}

/// Collect `@import` specifiers and `url()` tokens.
pub fn scan(code: &str, filename: &str) -> Result<Scan> {
    let mut stylesheet =
        StyleSheet::parse(code, parser_options(filename)).map_err(|e| Error::css(filename, e))?;

    let imports = stylesheet
        .rules
        .0
        .iter()
        .filter_map(|rule| match rule {
            CssRule::Import(import) => Some(import.url.as_ref().to_string()),
            _ => None,
        })
        .collect();

    let mut collector = UrlCollector { urls: Vec::new() };
    let _ = stylesheet.visit(&mut collector);

    Ok(Scan {
        imports,
        urls: collector.urls,
    })
}

/// Replace `url()` tokens found in `replacements` and print the result unminified.
pub fn rewrite_urls(
    code: &str,
    filename: &str,
    replacements: &HashMap<String, String>,
) -> Result<String> {
    let mut stylesheet =
        StyleSheet::parse(code, parser_options(filename)).map_err(|e| Error::css(filename, e))?;

    let mut rewriter = UrlRewriter { replacements };
    let _ = stylesheet.visit(&mut rewriter);

    stylesheet
        .to_css(PrinterOptions::default())
        .map(|result| result.code)
        .map_err(|e| Error::css(filename, e))
}

/// Visitor that records every URL
struct UrlCollector {
    urls: Vec<String>,
}

impl<'i> lightningcss::visitor::Visitor<'i> for UrlCollector {
    type Error = Infallible;

    fn visit_types(&self) -> lightningcss::visitor::VisitTypes {
        lightningcss::visit_types!(URLS)
    }

    fn visit_url(&mut self, url: &mut Url<'i>) -> Result<(), Self::Error> {
        self.urls.push(url.url.as_ref().to_string());
        Ok(())
    }
}

/// Visitor that rewrites URLs in CSS
struct UrlRewriter<'a> {
    replacements: &'a HashMap<String, String>,
}

impl<'i, 'a> lightningcss::visitor::Visitor<'i> for UrlRewriter<'a> {
    type Error = Infallible;

    fn visit_types(&self) -> lightningcss::visitor::VisitTypes {
        lightningcss::visit_types!(URLS)
    }

    fn visit_url(&mut self, url: &mut Url<'i>) -> Result<(), Self::Error> {
        if let Some(replacement) = self.replacements.get(url.url.as_ref()) {
            url.url = replacement.clone().into();
        }
        Ok(())
    }
}

/// Where an `@import` leads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportTarget {
    /// Inline this file.
    File(PathBuf),
    /// Keep `@import` pointing at this specifier.
    External(String),
}

/// Sources and import table produced by discovery.
#[derive(Debug, Default)]
pub struct PreparedSources {
    sources: HashMap<PathBuf, String>,
    imports: HashMap<(PathBuf, String), ImportTarget>,
}

impl PreparedSources {
    pub fn insert_source(&mut self, path: PathBuf, code: String) {
        self.sources.insert(path, code);
    }

    pub fn insert_import(&mut self, importer: PathBuf, specifier: String, target: ImportTarget) {
        self.imports.insert((importer, specifier), target);
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.sources.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

impl SourceProvider for PreparedSources {
    type Error = io::Error;

    fn read<'a>(&'a self, file: &Path) -> Result<&'a str, Self::Error> {
        self.sources.get(file).map(String::as_str).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} was not discovered", file.display()),
            )
        })
    }

    fn resolve(&self, specifier: &str, originating_file: &Path) -> Result<ResolveResult, Self::Error> {
        let key = (originating_file.to_path_buf(), specifier.to_string());
        match self.imports.get(&key) {
            Some(ImportTarget::File(path)) => Ok(ResolveResult::File(path.clone())),
            Some(ImportTarget::External(url)) => Ok(ResolveResult::External(url.clone())),
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!(
                    "no resolution for `{specifier}` from {}",
                    originating_file.display()
                ),
            )),
        }
    }
}

/// Minified bundle and optional source map.
#[derive(Debug, Clone)]
pub struct Printed {
    pub code: String,
    pub source_map: Option<String>,
}

/// Run the engine over prepared sources. Blocking: call from `spawn_blocking`.
pub fn bundle_prepared(
    sources: &PreparedSources,
    entry: &Path,
    with_source_map: bool,
) -> Result<Printed> {
    let filename = entry
        .to_str()
        .ok_or_else(|| Error::NonUtf8Path(entry.to_path_buf()))?;

    let mut source_map = with_source_map.then(|| SourceMap::new("/"));

    let stylesheet = {
        let mut bundler = Bundler::new(sources, source_map.as_mut(), ParserOptions::default());
        bundler.bundle(entry).map_err(|e| Error::css(filename, e))?
    };

    let printed = stylesheet
        .to_css(PrinterOptions {
            minify: true,
            source_map: source_map.as_mut(),
            ..PrinterOptions::default()
        })
        .map_err(|e| Error::css(filename, e))?;

    let source_map = match source_map.as_mut() {
        Some(map) => Some(map.to_json(None).map_err(|e| Error::css(filename, e))?),
        None => None,
    };

    Ok(Printed {
        code: printed.code,
        source_map,
    })
}
