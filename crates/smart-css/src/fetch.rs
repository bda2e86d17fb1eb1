//! Remote fetching and cache writes.
//!
//! Every fetch is a plain GET that follows redirects; what gets cached is
//! named after the final URL, not the requested one. When the response
//! carries a change-detection token (`ETag`, falling back to
//! `Last-Modified`) equal to the one recorded for the target path, and the
//! target still exists, nothing is written.
//!
//! Tokens are recorded under `<cache>/.etag/`, one small file per target
//! path, so they survive across runs.

use crate::log::{LogLevel, Logger};
use crate::loader::{Loader, classify};
use crate::naming::content_hash;
use crate::{Error, Result};
use reqwest::header::{ETAG, HeaderMap, LAST_MODIFIED};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use url::Url;

const TOKEN_DIR: &str = ".etag";
const USER_AGENT: &str = concat!("smart-css/", env!("CARGO_PKG_VERSION"));

/// HTTP client plus the persistent token store.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    tokens: TokenStore,
    logger: Logger,
}

/// A successful response, body included.
#[derive(Debug, Clone)]
pub struct Fetched {
    /// Where the body actually came from, after redirects.
    url: Url,
    loader: Loader,
    token: Option<String>,
    body: Vec<u8>,
}

/// Outcome of a cache write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stored {
    pub path: PathBuf,
    /// False when the recorded token matched and the write was skipped.
    pub written: bool,
}

impl Fetcher {
    pub fn new(cache_dir: &Path, timeout: Duration, logger: Logger) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(Error::HttpClient)?;
        Ok(Self {
            client,
            tokens: TokenStore::new(cache_dir),
            logger,
        })
    }

    /// Issue a GET for `url` and read the body. Non-success statuses are
    /// errors; nothing is retried here.
    pub async fn fetch(&self, url: &Url) -> Result<Fetched> {
        let failed = |source| Error::RemoteFetchFailed {
            url: url.to_string(),
            source,
        };

        if self.logger.enabled(LogLevel::Debug) {
            tracing::debug!(target: "smart_css", url = %url, "GET");
        }
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(failed)?
            .error_for_status()
            .map_err(failed)?;

        let final_url = response.url().clone();
        if final_url != *url && self.logger.enabled(LogLevel::Debug) {
            tracing::debug!(target: "smart_css", url = %url, location = %final_url, "redirected");
        }
        let loader = classify(final_url.as_str(), Some(response.headers()));
        let token = change_token(response.headers());
        let body = response.bytes().await.map_err(failed)?.to_vec();

        Ok(Fetched {
            url: final_url,
            loader,
            token,
            body,
        })
    }

    /// Persist `fetched` at `target` unless its token says the cached copy is current.
    pub async fn store(&self, fetched: &Fetched, target: &Path) -> Result<Stored> {
        if let Some(token) = &fetched.token
            && self.tokens.get(target).await.as_deref() == Some(token.as_str())
            && tokio::fs::try_exists(target).await.unwrap_or(false)
        {
            if self.logger.enabled(LogLevel::Debug) {
                tracing::debug!(
                    target: "smart_css",
                    url = %fetched.url,
                    path = %target.display(),
                    "unchanged"
                );
            }
            return Ok(Stored {
                path: target.to_path_buf(),
                written: false,
            });
        }

        write_atomic(target, &fetched.body).await?;
        match &fetched.token {
            Some(token) => self.tokens.set(target, token).await?,
            None => self.tokens.clear(target).await,
        }
        if self.logger.enabled(LogLevel::Info) {
            tracing::info!(
                target: "smart_css",
                url = %fetched.url,
                path = %target.display(),
                "cached"
            );
        }

        Ok(Stored {
            path: target.to_path_buf(),
            written: true,
        })
    }

    /// Fetch `url` and persist it at `target`, returning the local path.
    pub async fn fetch_and_cache(&self, url: &Url, target: &Path) -> Result<PathBuf> {
        let fetched = self.fetch(url).await?;
        Ok(self.store(&fetched, target).await?.path)
    }
}

impl Fetched {
    /// The final URL, after any redirects.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Classification using the response's headers.
    pub fn loader(&self) -> Loader {
        self.loader
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

fn change_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(ETAG)
        .or_else(|| headers.get(LAST_MODIFIED))
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

/// Change-detection tokens keyed by target path.
#[derive(Debug, Clone)]
pub struct TokenStore {
    dir: PathBuf,
}

impl TokenStore {
    pub fn new(cache_dir: &Path) -> Self {
        Self {
            dir: cache_dir.join(TOKEN_DIR),
        }
    }

    fn entry(&self, target: &Path) -> PathBuf {
        self.dir
            .join(content_hash(target.to_string_lossy().as_bytes()))
    }

    pub async fn get(&self, target: &Path) -> Option<String> {
        tokio::fs::read_to_string(self.entry(target))
            .await
            .ok()
            .map(|token| token.trim_end().to_string())
    }

    pub async fn set(&self, target: &Path, token: &str) -> Result<()> {
        write_atomic(&self.entry(target), token.as_bytes()).await
    }

    pub async fn clear(&self, target: &Path) {
        let _ = tokio::fs::remove_file(self.entry(target)).await;
    }
}

/// Write through a sibling temp file and rename, creating parent directories.
///
/// A reader never observes a half-written file, even if the writer is killed.
pub(crate) async fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let failed = |source| Error::WriteFailed {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(failed)?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(format!(
        ".{}-{}.tmp",
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    let tmp = PathBuf::from(tmp);

    if let Err(source) = tokio::fs::write(&tmp, contents).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(failed(source));
    }
    if let Err(source) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(failed(source));
    }
    Ok(())
}
