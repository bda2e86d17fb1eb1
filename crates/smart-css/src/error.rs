//! Error types for resolution, caching and bundling.

use std::path::PathBuf;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors that can occur while resolving, caching or bundling CSS.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Network failure or non-success status while fetching a remote reference.
    #[error("failed to fetch {url}: {source}")]
    RemoteFetchFailed {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The HTTP client could not be constructed.
    #[error("failed to build http client: {0}")]
    HttpClient(#[source] reqwest::Error),

    /// A path under the cache directory does not have the `<scheme>/<host>/<rest>` shape.
    #[error("malformed cache path {}: {reason}", .path.display())]
    MalformedCachePath { path: PathBuf, reason: &'static str },

    /// The resolver has no strategy for this kind of reference.
    #[error("unsupported reference kind `{kind}` for `{specifier}`")]
    UnsupportedReferenceKind { kind: String, specifier: String },

    /// The isolated worker could not produce a result within its restart policy.
    #[error("worker exhausted after {kills} forced terminations and {restarts} restarts")]
    WorkerExhausted { kills: u32, restarts: u32 },

    /// Writing a bundle, source map or cached file failed.
    #[error("failed to write {}: {source}", .path.display())]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Reading a stylesheet from disk failed.
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A specifier could not be turned into a URL.
    #[error("invalid url `{specifier}`: {source}")]
    InvalidUrl {
        specifier: String,
        #[source]
        source: url::ParseError,
    },

    /// The URL is valid but cannot be laid out in the cache directory.
    #[error("cannot cache {url}: {reason}")]
    UnsupportedUrl { url: String, reason: &'static str },

    /// A path handed to the CSS engine is not valid UTF-8.
    #[error("path is not valid UTF-8: {}", .0.display())]
    NonUtf8Path(PathBuf),

    /// The CSS engine rejected a stylesheet (parse, bundle or print failure).
    #[error("css error in {file}: {message}")]
    Css { file: String, message: String },

    /// The isolated worker reported a failure of its own.
    #[error("worker failed: {0}")]
    Worker(String),

    /// The file watcher could not be set up.
    #[error("file watcher error: {0}")]
    Watch(#[from] notify::Error),

    /// A blocking task panicked or was cancelled.
    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// A per-entry failure, wrapped with the entry point and output path.
    #[error("error during bundle {entry} into {}", .output.display())]
    Bundle {
        entry: String,
        output: PathBuf,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Whether retrying the whole operation may succeed.
    ///
    /// Invariant violations (malformed cache layout, unsupported references) never do.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::RemoteFetchFailed { .. } | Error::WorkerExhausted { .. } | Error::Worker(_) => true,
            Error::Bundle { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    pub(crate) fn css(file: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Error::Css {
            file: file.into(),
            message: message.to_string(),
        }
    }
}
