//! Per-pass remote resolution.
//!
//! A [`RemoteResolver`] lives exactly as long as one bundle pass. It turns the
//! [`Action`]s produced by [`classify_reference`] into fetches and cache
//! writes, and coalesces them: concurrent or repeated references to the same
//! URL (query and fragment ignored) share a single fetch, whether they are
//! `@import`s or `url()`s. Placement happens once per role, and is named after
//! the URL the response finally came from.

use crate::bundle::BundleOptions;
use crate::cache_path::{cache_key, url_to_cache_path};
use crate::fetch::{Fetched, Fetcher, Stored, write_atomic};
use crate::loader::Loader;
use crate::log::{LogLevel, Logger};
use crate::naming::{AssetLayout, Naming};
use crate::reference::{Action, Reference, ReferenceKind, classify_reference};
use crate::{Error, Result};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;
use url::Url;

/// How a reference was resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Leave the specifier as written.
    External(String),
    /// A local file the engine reads directly.
    Local(PathBuf),
    /// A remote stylesheet now cached locally; bundle into it.
    Stylesheet(PathBuf),
    /// A remote asset copied into the asset directory, referenced by `public`.
    Asset { path: PathBuf, public: String },
}

/// One remote file persisted during a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub url: String,
    pub path: PathBuf,
    /// False when the cached copy was already current.
    pub written: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Role {
    Stylesheet,
    Asset,
}

pub struct RemoteResolver {
    fetcher: Fetcher,
    cache_dir: PathBuf,
    asset_dir: PathBuf,
    asset_public_path: String,
    asset_naming: Naming,
    asset_layout: AssetLayout,
    external_paths: Vec<String>,
    logger: Logger,
    downloads: DashMap<String, Arc<OnceCell<Arc<Fetched>>>>,
    resolved: DashMap<(Role, String), Arc<OnceCell<Resolution>>>,
    records: Mutex<Vec<CacheRecord>>,
}

impl RemoteResolver {
    pub fn new(options: &BundleOptions, fetcher: Fetcher) -> Self {
        Self {
            fetcher,
            cache_dir: options.cache_dir.clone(),
            asset_dir: options.asset_dir.clone(),
            asset_public_path: options.asset_public_path.clone(),
            asset_naming: options.asset_naming.clone(),
            asset_layout: options.asset_layout,
            external_paths: options.external_paths.clone(),
            logger: options.logger,
            downloads: DashMap::new(),
            resolved: DashMap::new(),
            records: Mutex::new(Vec::new()),
        }
    }

    pub fn cache_dir(&self) -> &std::path::Path {
        &self.cache_dir
    }

    /// Resolve one reference.
    pub async fn resolve(&self, reference: &Reference) -> Result<Resolution> {
        match classify_reference(reference, &self.cache_dir, &self.external_paths)? {
            Action::External(specifier) => Ok(Resolution::External(specifier)),
            Action::Local(path) => Ok(Resolution::Local(path)),
            Action::Fetch(url) => {
                let role = match reference.kind {
                    ReferenceKind::UrlToken => Role::Asset,
                    _ => Role::Stylesheet,
                };
                self.resolve_remote(url, role).await
            }
        }
    }

    /// Everything written or confirmed during this pass.
    pub fn into_records(self) -> Vec<CacheRecord> {
        self.records
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn resolve_remote(&self, url: Url, role: Role) -> Result<Resolution> {
        let cell = self
            .resolved
            .entry((role, cache_key(&url)))
            .or_default()
            .clone();

        cell.get_or_try_init(|| self.fetch_remote(&url, role))
            .await
            .cloned()
    }

    /// One network fetch per URL per pass, shared by every role.
    async fn download(&self, url: &Url) -> Result<Arc<Fetched>> {
        let cell = self.downloads.entry(cache_key(url)).or_default().clone();
        cell.get_or_try_init(|| async { Ok::<_, Error>(Arc::new(self.fetcher.fetch(url).await?)) })
            .await
            .cloned()
    }

    async fn fetch_remote(&self, url: &Url, role: Role) -> Result<Resolution> {
        let fetched = self.download(url).await?;
        match (role, fetched.loader()) {
            (Role::Stylesheet, Loader::Css) => {
                let target = url_to_cache_path(&self.cache_dir, fetched.url())?;
                let stored = self.fetcher.store(&fetched, &target).await?;
                self.record(fetched.url(), &stored);
                Ok(Resolution::Stylesheet(stored.path))
            }
            _ => self.store_asset(&fetched).await,
        }
    }

    async fn store_asset(&self, fetched: &Fetched) -> Result<Resolution> {
        let url = fetched.url();
        let basename = url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|segment| !segment.is_empty())
            .ok_or_else(|| Error::UnsupportedUrl {
                url: url.to_string(),
                reason: "asset url has no file name",
            })?;
        let file_name = self.asset_layout.file_name(&cache_key(url), basename);

        let stored = if self.asset_naming.needs_content() {
            // Content-addressed: an existing file with this name already has these bytes.
            let path = self
                .asset_dir
                .join(self.asset_naming.disk_name(&file_name, fetched.body()));
            let written = if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                false
            } else {
                write_atomic(&path, fetched.body()).await?;
                true
            };
            Stored { path, written }
        } else {
            self.fetcher
                .store(fetched, &self.asset_dir.join(&file_name))
                .await?
        };
        self.record(url, &stored);

        let disk_name = stored
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or(file_name);
        let public = format!(
            "{}{}",
            self.asset_public_path,
            self.asset_naming.public_name(&disk_name)
        );
        if self.logger.enabled(LogLevel::Debug) {
            tracing::debug!(target: "smart_css", url = %url, public = %public, "asset");
        }

        Ok(Resolution::Asset {
            path: stored.path,
            public,
        })
    }

    fn record(&self, url: &Url, stored: &Stored) {
        let mut records = self
            .records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        records.push(CacheRecord {
            url: url.to_string(),
            path: stored.path.clone(),
            written: stored.written,
        });
    }
}
