//! Single-entry bundle driver.
//!
//! A pass has two phases:
//!
//! 1. Discovery (async). Starting at the entry point, every stylesheet is
//!    read and scanned; each `@import` and `url()` goes through the
//!    [`RemoteResolver`]. Remote stylesheets land in the cache directory and
//!    are scanned in turn, remote assets land in the asset directory and their
//!    `url()` tokens are rewritten to the asset's public name.
//! 2. Bundling (blocking). lightningcss inlines the discovered sources,
//!    minifies, and produces a source map in dev mode.

use crate::cache_path::is_cached;
use crate::fetch::{Fetcher, write_atomic};
use crate::log::{LogLevel, Logger};
use crate::naming::{AssetLayout, Naming};
use crate::reference::{Reference, ReferenceKind, is_remote};
use crate::resolver::{CacheRecord, RemoteResolver, Resolution};
use crate::stylesheet::{self, ImportTarget, PreparedSources};
use crate::{Error, Result};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Options shared by every entry point of a build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BundleOptions {
    /// Where bundles are written.
    pub bundle_dir: PathBuf,
    /// Where remote stylesheets are cached, as `<scheme>/<host>/<path>`.
    pub cache_dir: PathBuf,
    /// Where remote assets are written.
    pub asset_dir: PathBuf,
    /// Prefix for asset references emitted into CSS.
    pub asset_public_path: String,
    pub asset_naming: Naming,
    pub asset_layout: AssetLayout,
    /// Applied to the bundle's output path, never to its content.
    pub bundle_naming: Naming,
    /// Specifier prefixes that are never inlined or fetched.
    pub external_paths: Vec<String>,
    /// Source maps on, and a watch context in [`crate::watch`].
    pub dev: bool,
    pub fetch_timeout_secs: u64,
    pub logger: Logger,
}

impl Default for BundleOptions {
    fn default() -> Self {
        Self {
            bundle_dir: PathBuf::from("dist"),
            cache_dir: PathBuf::from(".cache/css"),
            asset_dir: PathBuf::from("dist"),
            asset_public_path: String::new(),
            asset_naming: Naming::Keep,
            asset_layout: AssetLayout::Flat,
            bundle_naming: Naming::Keep,
            external_paths: Vec::new(),
            dev: false,
            fetch_timeout_secs: 30,
            logger: Logger::default(),
        }
    }
}

/// One entry point's pass, as sent to an isolated worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleJob {
    pub entry: String,
    pub options: BundleOptions,
}

impl BundleJob {
    pub fn new(entry: impl Into<String>, options: BundleOptions) -> Self {
        Self {
            entry: entry.into(),
            options,
        }
    }
}

/// Result of a pass, before anything is written to the bundle directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleOutput {
    pub code: String,
    pub source_map: Option<String>,
    /// Local stylesheets read during the pass.
    pub watch_files: Vec<PathBuf>,
    /// Remote files persisted (or confirmed current) during the pass.
    pub cached: Vec<CacheRecord>,
}

/// Paths produced by [`write_output`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenBundle {
    pub path: PathBuf,
    pub source_map: Option<PathBuf>,
}

/// Bundle `entry` (a local path or an absolute URL).
pub async fn bundle_one(entry: &str, options: &BundleOptions) -> Result<BundleOutput> {
    let fetcher = Fetcher::new(
        &options.cache_dir,
        Duration::from_secs(options.fetch_timeout_secs),
        options.logger,
    )?;
    let resolver = RemoteResolver::new(options, fetcher);

    let entry_path = match resolver.resolve(&Reference::entry_point(entry)).await? {
        Resolution::Local(path) | Resolution::Stylesheet(path) => path,
        Resolution::External(_) | Resolution::Asset { .. } => {
            return Err(Error::UnsupportedReferenceKind {
                kind: ReferenceKind::EntryPoint.to_string(),
                specifier: entry.to_string(),
            });
        }
    };

    let (sources, watch_files) = discover(&resolver, &entry_path).await?;
    if options.logger.enabled(LogLevel::Debug) {
        tracing::debug!(target: "smart_css", entry, stylesheets = sources.len(), "discovered");
    }

    let dev = options.dev;
    let printed = tokio::task::spawn_blocking(move || {
        stylesheet::bundle_prepared(&sources, &entry_path, dev)
    })
    .await??;

    Ok(BundleOutput {
        code: printed.code,
        source_map: printed.source_map,
        watch_files,
        cached: resolver.into_records(),
    })
}

/// A scanned, possibly rewritten stylesheet and where its imports lead.
struct Loaded {
    path: PathBuf,
    code: String,
    imports: Vec<(String, ImportTarget)>,
}

async fn discover(
    resolver: &RemoteResolver,
    entry: &Path,
) -> Result<(PreparedSources, Vec<PathBuf>)> {
    let mut prepared = PreparedSources::default();
    let mut watch_files = Vec::new();
    let mut seen = HashSet::from([entry.to_path_buf()]);
    let mut frontier = vec![entry.to_path_buf()];

    while !frontier.is_empty() {
        let batch = std::mem::take(&mut frontier);
        let loaded = try_join_all(batch.into_iter().map(|path| load(resolver, path))).await?;

        for file in loaded {
            for (specifier, target) in file.imports {
                if let ImportTarget::File(path) = &target
                    && seen.insert(path.clone())
                {
                    frontier.push(path.clone());
                }
                prepared.insert_import(file.path.clone(), specifier, target);
            }
            if !is_cached(resolver.cache_dir(), &file.path) {
                watch_files.push(file.path.clone());
            }
            prepared.insert_source(file.path, file.code);
        }
    }

    Ok((prepared, watch_files))
}

async fn load(resolver: &RemoteResolver, path: PathBuf) -> Result<Loaded> {
    let code = tokio::fs::read_to_string(&path)
        .await
        .map_err(|source| Error::Read {
            path: path.clone(),
            source,
        })?;
    let filename = path
        .to_str()
        .ok_or_else(|| Error::NonUtf8Path(path.clone()))?;
    let scan = stylesheet::scan(&code, filename)?;

    let imports = try_join_all(scan.imports.into_iter().map(|specifier| {
        let reference = Reference::new(specifier.clone(), ReferenceKind::Import, Some(path.clone()));
        async move {
            let target = match resolver.resolve(&reference).await? {
                Resolution::Local(file) | Resolution::Stylesheet(file) => ImportTarget::File(file),
                Resolution::External(specifier) => ImportTarget::External(specifier),
                Resolution::Asset { public, .. } => ImportTarget::External(public),
            };
            Ok::<_, Error>((specifier, target))
        }
    }))
    .await?;

    let mut unique = HashSet::new();
    let urls = scan.urls.into_iter().filter(|url| unique.insert(url.clone()));
    let replacements = try_join_all(urls.map(|specifier| {
        let reference = Reference::new(specifier.clone(), ReferenceKind::UrlToken, Some(path.clone()));
        async move {
            Ok::<_, Error>(match resolver.resolve(&reference).await? {
                Resolution::Asset { public, .. } if public != specifier => Some((specifier, public)),
                _ => None,
            })
        }
    }))
    .await?
    .into_iter()
    .flatten()
    .collect::<HashMap<_, _>>();

    let code = if replacements.is_empty() {
        code
    } else {
        stylesheet::rewrite_urls(&code, filename, &replacements)?
    };

    Ok(Loaded {
        path,
        code,
        imports,
    })
}

/// Base name of the bundle for `entry`: the file name of a path, or the last segment of a URL.
pub fn entry_file_name(entry: &str) -> String {
    if is_remote(entry) {
        let path = entry.split(['?', '#']).next().unwrap_or(entry);
        return path.rsplit('/').next().unwrap_or(path).to_string();
    }
    Path::new(entry)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| entry.to_string())
}

/// Output path before the bundle naming transform.
pub fn output_path(entry: &str, options: &BundleOptions) -> PathBuf {
    options.bundle_dir.join(entry_file_name(entry))
}

/// Write `output` into the bundle directory, with a `<stem>.map.css` sibling in dev mode.
pub async fn write_output(
    output: &BundleOutput,
    entry: &str,
    options: &BundleOptions,
) -> Result<WrittenBundle> {
    let name = options
        .bundle_naming
        .disk_name(&entry_file_name(entry), output.code.as_bytes());
    let path = options.bundle_dir.join(&name);

    let mut code = output.code.clone();
    let source_map = match &output.source_map {
        Some(map) => {
            let map_name = source_map_name(&name);
            let map_path = options.bundle_dir.join(&map_name);
            write_atomic(&map_path, map.as_bytes()).await?;
            code.push_str(&format!("\n/*# sourceMappingURL={map_name} */"));
            Some(map_path)
        }
        None => None,
    };

    write_atomic(&path, code.as_bytes()).await?;
    options
        .logger
        .info(format_args!("bundled {entry} → {}", path.display()));

    Ok(WrittenBundle { path, source_map })
}

/// `main.css` → `main.map.css`
pub fn source_map_name(bundle_name: &str) -> String {
    let stem = bundle_name.strip_suffix(".css").unwrap_or(bundle_name);
    format!("{stem}.map.css")
}
