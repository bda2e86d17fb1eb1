//! Request middleware.
//!
//! Production: requests go to the inner service first; a 404 falls back to
//! a previously bundled file under the static directory.
//!
//! Development: a request for an entry point's bundle builds it (once per
//! path, again after one of its local stylesheets changes) and serves the
//! fresh file. `.map.css` siblings are served as JSON. A failed build is a
//! 500 for that request only.

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use dashmap::DashMap;
use smart_css::watch::canonical;
use smart_css::{BundleOptions, BundleReport, Isolation, Watcher, bundle_entry};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, Weak};
use tokio::sync::{OnceCell, mpsc};

const CACHE_NO_CACHE: &str = "no-cache, no-store, must-revalidate";
const SOURCE_MAP_SUFFIX: &str = ".map.css";

type Registration = (String, Vec<PathBuf>);

/// Shared middleware state.
pub struct CssState {
    dev: bool,
    static_dir: PathBuf,
    /// Request path (no leading slash) → entry point
    routes: HashMap<String, String>,
    options: BundleOptions,
    isolation: Isolation,
    built: DashMap<String, Arc<OnceCell<BundleReport>>>,
    invalidations: OnceLock<mpsc::UnboundedSender<Registration>>,
}

impl CssState {
    pub fn new(
        dev: bool,
        static_dir: PathBuf,
        routes: HashMap<String, String>,
        options: BundleOptions,
        isolation: Isolation,
    ) -> Self {
        Self {
            dev,
            static_dir,
            routes,
            options,
            isolation,
            built: DashMap::new(),
            invalidations: OnceLock::new(),
        }
    }

    /// Whether the bundle served at `route` is currently considered fresh.
    pub fn is_built(&self, route: &str) -> bool {
        self.built
            .get(route)
            .is_some_and(|cell| cell.initialized())
    }

    /// Build the bundle for `route` unless a fresh one exists.
    async fn ensure_built(self: &Arc<Self>, route: &str, entry: &str) -> smart_css::Result<BundleReport> {
        let cell = self.built.entry(route.to_string()).or_default().clone();
        let report = cell
            .get_or_try_init(|| async {
                let report = bundle_entry(entry, &self.options, &self.isolation).await?;
                self.watch(route, report.watch_files.clone());
                Ok::<_, smart_css::Error>(report)
            })
            .await?;
        Ok(report.clone())
    }

    /// Invalidate `route` whenever one of `files` changes.
    fn watch(self: &Arc<Self>, route: &str, files: Vec<PathBuf>) {
        let sender = self.invalidations.get_or_init(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(invalidate_on_change(Arc::downgrade(self), rx));
            tx
        });
        let _ = sender.send((route.to_string(), files));
    }
}

/// Owns the watcher; drops built routes whose sources changed.
async fn invalidate_on_change(state: Weak<CssState>, mut registrations: mpsc::UnboundedReceiver<Registration>) {
    let mut watcher = match Watcher::new() {
        Ok(watcher) => watcher,
        Err(e) => {
            tracing::warn!("css watcher unavailable, bundles will not rebuild: {}", e);
            return;
        }
    };
    let mut dependents: HashMap<PathBuf, HashSet<String>> = HashMap::new();

    loop {
        tokio::select! {
            registration = registrations.recv() => {
                let Some((route, files)) = registration else {
                    return;
                };
                if let Err(e) = watcher.track(&files) {
                    tracing::warn!("failed to watch sources of /{}: {}", route, e);
                }
                for file in &files {
                    dependents.entry(canonical(file)).or_default().insert(route.clone());
                }
            }
            changed = watcher.changed() => {
                let Some(changed) = changed else {
                    return;
                };
                let Some(state) = state.upgrade() else {
                    return;
                };
                for route in dependents.get(&changed).into_iter().flatten() {
                    tracing::debug!("{} changed, invalidating /{}", changed.display(), route);
                    state.built.remove(route);
                }
            }
        }
    }
}

/// The adapter itself; install with `axum::middleware::from_fn_with_state`.
pub async fn css_middleware(State(state): State<Arc<CssState>>, request: Request, next: Next) -> Response {
    let path = request.uri().path().trim_start_matches('/').to_string();
    if !is_safe(&path) {
        return next.run(request).await;
    }

    if state.dev {
        if path.ends_with(SOURCE_MAP_SUFFIX) {
            if let Some(response) = serve_file(&state.static_dir.join(&path), &path).await {
                return response;
            }
        } else if let Some(entry) = state.routes.get(&path) {
            return match state.ensure_built(&path, entry).await {
                Ok(report) => serve_file(&report.output, &path)
                    .await
                    .unwrap_or_else(|| StatusCode::NOT_FOUND.into_response()),
                Err(e) => {
                    tracing::error!("{}", error_chain(&e));
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                        error_chain(&e),
                    )
                        .into_response()
                }
            };
        }
    }

    let response = next.run(request).await;
    if response.status() != StatusCode::NOT_FOUND {
        return response;
    }
    serve_file(&state.static_dir.join(&path), &path)
        .await
        .unwrap_or(response)
}

/// Reject empty paths and anything that could climb out of the static directory.
fn is_safe(path: &str) -> bool {
    !path.is_empty()
        && !path.contains('\\')
        && path.split('/').all(|segment| segment != ".." && segment != ".")
}

/// `None` when the file does not exist; a missing file is not an error here.
async fn serve_file(file: &Path, request_path: &str) -> Option<Response> {
    let content = tokio::fs::read(file).await.ok()?;
    let response = (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, mime_for(request_path)),
            (header::CACHE_CONTROL, CACHE_NO_CACHE),
        ],
        Body::from(content),
    );
    Some(response.into_response())
}

fn error_chain(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

fn mime_for(path: &str) -> &'static str {
    if path.ends_with(SOURCE_MAP_SUFFIX) {
        return "application/json; charset=utf-8";
    }
    mime_from_extension(path)
}

/// Guess MIME type from file extension
pub fn mime_from_extension(path: &str) -> &'static str {
    match path.rsplit('.').next() {
        Some("css") => "text/css; charset=utf-8",
        Some("map") | Some("json") => "application/json; charset=utf-8",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("webp") => "image/webp",
        Some("avif") => "image/avif",
        Some("ico") => "image/x-icon",
        Some("woff") => "font/woff",
        Some("woff2") => "font/woff2",
        Some("ttf") => "font/ttf",
        Some("otf") => "font/otf",
        Some("eot") => "application/vnd.ms-fontobject",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_safety() {
        assert!(is_safe("main.css"));
        assert!(is_safe("css/main.css"));
        assert!(!is_safe(""));
        assert!(!is_safe("../secret.css"));
        assert!(!is_safe("css/../../etc/passwd"));
        assert!(!is_safe("css/./main.css"));
        assert!(!is_safe("css\\..\\main.css"));
    }

    #[test]
    fn test_mime_for_source_maps() {
        assert_eq!(mime_for("main.map.css"), "application/json; charset=utf-8");
        assert_eq!(mime_for("main.css"), "text/css; charset=utf-8");
        assert_eq!(mime_for("fonts/a.woff2"), "font/woff2");
        assert_eq!(mime_for("blob"), "application/octet-stream");
    }

    #[test]
    fn test_error_chain_includes_causes() {
        let err = smart_css::Error::Bundle {
            entry: "main.css".to_string(),
            output: PathBuf::from("out/static/main.css"),
            source: Box::new(smart_css::Error::Worker("boom".to_string())),
        };
        assert_eq!(
            error_chain(&err),
            "error during bundle main.css into out/static/main.css: worker failed: boom"
        );
    }

    #[test_log::test(tokio::test)]
    async fn test_built_routes_are_invalidated_by_source_changes() {
        let dir = tempfile::tempdir().unwrap();
        let main = dir.path().join("main.css");
        std::fs::write(&main, ".main { display: block }\n").unwrap();

        let options = BundleOptions {
            bundle_dir: dir.path().join("static"),
            cache_dir: dir.path().join("cache"),
            asset_dir: dir.path().join("static"),
            ..BundleOptions::default()
        };
        let entry = main.to_string_lossy().into_owned();
        let routes = HashMap::from([("main.css".to_string(), entry.clone())]);
        let state = Arc::new(CssState::new(
            true,
            dir.path().join("static"),
            routes,
            options,
            Isolation::InProcess,
        ));

        assert!(!state.is_built("main.css"));
        let report = state.ensure_built("main.css", &entry).await.unwrap();
        assert!(report.output.is_file());
        assert!(state.is_built("main.css"));

        // Let the watcher task pick up the registration.
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        std::fs::write(&main, ".main { display: grid }\n").unwrap();
        let mut invalidated = false;
        for _ in 0..100 {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            if !state.is_built("main.css") {
                invalidated = true;
                break;
            }
        }
        assert!(invalidated, "route stayed built after its source changed");
    }
}
