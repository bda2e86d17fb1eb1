//! Mapping between remote URLs and their location in the cache directory.
//!
//! A URL is laid out as `<cache>/<scheme>/<host>/<path>`, e.g.
//! `https://cdn.example.com/a/b.css` → `<cache>/https/cdn.example.com/a/b.css`.
//! The layout alone is enough to reconstruct the URL, which is what lets
//! relative references inside a cached stylesheet resolve against the
//! stylesheet's origin.
//!
//! Query strings and fragments are not part of the layout. A non-default port
//! is kept in the host segment (`127.0.0.1:8080`).

use crate::{Error, Result};
use std::path::{Component, Path, PathBuf};
use url::Url;

/// Compute the cache location of `url`.
pub fn url_to_cache_path(cache_dir: &Path, url: &Url) -> Result<PathBuf> {
    let unsupported = |reason| Error::UnsupportedUrl {
        url: url.to_string(),
        reason,
    };

    let scheme = url.scheme();
    if scheme != "http" && scheme != "https" {
        return Err(unsupported("only http and https urls are cached"));
    }
    let host = url.host_str().ok_or_else(|| unsupported("url has no host"))?;
    let authority = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };

    let mut path = cache_dir.join(scheme).join(authority);
    let segments = url
        .path_segments()
        .ok_or_else(|| unsupported("url cannot be a base"))?;
    let mut pushed = false;
    for segment in segments {
        if segment.is_empty() {
            return Err(unsupported("url path has an empty segment"));
        }
        path.push(segment);
        pushed = true;
    }
    if !pushed {
        return Err(unsupported("url has no path"));
    }
    Ok(path)
}

/// Reconstruct the URL a cached file was fetched from.
///
/// Fails with [`Error::MalformedCachePath`] rather than guessing: a wrong
/// origin would silently misresolve every relative reference in the file.
pub fn cache_path_to_url(cache_dir: &Path, path: &Path) -> Result<Url> {
    let malformed = |reason| Error::MalformedCachePath {
        path: path.to_path_buf(),
        reason,
    };

    let relative = path
        .strip_prefix(cache_dir)
        .map_err(|_| malformed("not inside the cache directory"))?;

    let mut segments = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(segment) => {
                segments.push(segment.to_str().ok_or_else(|| malformed("not valid UTF-8"))?)
            }
            _ => return Err(malformed("unexpected path component")),
        }
    }

    match segments.as_slice() {
        [] | [_] => Err(malformed("expected <scheme>/<host>/<path>")),
        [_, _] => Err(malformed("missing resource path after host")),
        [scheme, host, rest @ ..] => {
            if *scheme != "http" && *scheme != "https" {
                return Err(malformed("first segment is not http or https"));
            }
            Url::parse(&format!("{scheme}://{host}/{}", rest.join("/")))
                .map_err(|_| malformed("segments do not form a valid url"))
        }
    }
}

/// Whether `path` lives under `cache_dir` and therefore came from the network.
pub fn is_cached(cache_dir: &Path, path: &Path) -> bool {
    path.starts_with(cache_dir)
}

/// Dedup key for a URL: scheme, host and path, without query or fragment.
pub fn cache_key(url: &Url) -> String {
    let mut key = url.clone();
    key.set_query(None);
    key.set_fragment(None);
    key.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(input: &str) -> Url {
        let dir = Path::new("/tmp/cache");
        let url = Url::parse(input).unwrap();
        let path = url_to_cache_path(dir, &url).unwrap();
        cache_path_to_url(dir, &path).unwrap()
    }

    #[test]
    fn test_layout() {
        let url = Url::parse("https://cdn.example.com/a/b.css").unwrap();
        let path = url_to_cache_path(Path::new("cache"), &url).unwrap();
        assert_eq!(path, Path::new("cache/https/cdn.example.com/a/b.css"));
    }

    #[test]
    fn test_roundtrip_preserves_scheme_host_path() {
        for input in [
            "https://cdn.example.com/a/b.css",
            "http://example.org/style.css",
            "https://fonts.googleapis.com/css2",
            "http://127.0.0.1:8123/nested/deep/x.png",
            "https://cdn.example.com/with%20space/a.css",
        ] {
            let back = roundtrip(input);
            let original = Url::parse(input).unwrap();
            assert_eq!(back.scheme(), original.scheme(), "{input}");
            assert_eq!(back.host_str(), original.host_str(), "{input}");
            assert_eq!(back.port(), original.port(), "{input}");
            assert_eq!(back.path(), original.path(), "{input}");
        }
    }

    #[test]
    fn test_query_and_fragment_are_dropped() {
        let back = roundtrip("https://cdn.example.com/a.css?v=3#top");
        assert_eq!(back.as_str(), "https://cdn.example.com/a.css");
    }

    #[test]
    fn test_short_paths_are_malformed() {
        let dir = Path::new("/tmp/cache");
        for rel in ["", "https", "https/cdn.example.com"] {
            let err = cache_path_to_url(dir, &dir.join(rel)).unwrap_err();
            assert!(
                matches!(err, Error::MalformedCachePath { .. }),
                "{rel}: {err}"
            );
        }
    }

    #[test]
    fn test_foreign_paths_are_malformed() {
        let dir = Path::new("/tmp/cache");
        let err = cache_path_to_url(dir, Path::new("/elsewhere/https/x/a.css")).unwrap_err();
        assert!(matches!(err, Error::MalformedCachePath { .. }));

        let err = cache_path_to_url(dir, &dir.join("ftp/host/a.css")).unwrap_err();
        assert!(matches!(err, Error::MalformedCachePath { .. }));
    }

    #[test]
    fn test_uncacheable_urls() {
        let dir = Path::new("cache");
        for input in ["https://cdn.example.com/", "https://cdn.example.com/dir/", "data:text/css,a"] {
            let url = Url::parse(input).unwrap();
            assert!(
                matches!(url_to_cache_path(dir, &url), Err(Error::UnsupportedUrl { .. })),
                "{input}"
            );
        }
    }

    #[test]
    fn test_cache_key_ignores_query() {
        let a = Url::parse("https://cdn.example.com/bg.png?v=1").unwrap();
        let b = Url::parse("https://cdn.example.com/bg.png#frag").unwrap();
        assert_eq!(cache_key(&a), cache_key(&b));
    }
}
