//! Host framework integration: build-start bundling and router installation.

use crate::config::ResolvedConfig;
use crate::middleware::{CssState, css_middleware};
use axum::Router;
use camino::{Utf8Path, Utf8PathBuf};
use eyre::{Result, WrapErr, eyre};
use smart_css::bundle::entry_file_name;
use smart_css::{BundleOptions, BundleReport, Logger, bundle};
use std::collections::HashMap;
use std::sync::Arc;
use walkdir::WalkDir;

const STATIC_DIR: &str = "static";

/// What the host framework tells the plugin about the current run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameworkConfig {
    pub dev: bool,
    /// The framework's build output directory
    pub out_dir: Utf8PathBuf,
}

/// CSS bundling plugin for an axum host.
#[derive(Debug, Clone)]
pub struct CssBundler {
    config: Arc<ResolvedConfig>,
    framework: FrameworkConfig,
}

impl CssBundler {
    pub fn new(config: ResolvedConfig, framework: FrameworkConfig) -> Self {
        Self {
            config: Arc::new(config),
            framework,
        }
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    /// `<out_dir>/static`, the root that requests are resolved against.
    pub fn static_dir(&self) -> Utf8PathBuf {
        self.framework.out_dir.join(STATIC_DIR)
    }

    /// `<out_dir>/static/<bundle_sub_dir?>`
    pub fn bundle_dir(&self) -> Utf8PathBuf {
        match &self.config.plugin.bundle_sub_dir {
            Some(sub) => self.static_dir().join(sub),
            None => self.static_dir(),
        }
    }

    /// Options for every bundle pass of this plugin.
    pub fn bundle_options(&self) -> BundleOptions {
        let plugin = &self.config.plugin;
        let bundle_dir = self.bundle_dir();
        let cache_dir = self
            .config
            .cache_dir
            .clone()
            .unwrap_or_else(|| self.framework.out_dir.join("cache").join("css"));

        BundleOptions {
            bundle_dir: bundle_dir.clone().into_std_path_buf(),
            cache_dir: cache_dir.into_std_path_buf(),
            asset_dir: bundle_dir.into_std_path_buf(),
            asset_public_path: plugin.asset_public_path.clone().unwrap_or_default(),
            asset_naming: plugin.asset_naming.clone(),
            asset_layout: plugin.asset_layout,
            bundle_naming: plugin.bundle_naming.clone(),
            external_paths: plugin.external_paths.clone(),
            dev: self.framework.dev,
            logger: Logger::new(plugin.log_level),
            ..BundleOptions::default()
        }
    }

    /// Source files under `source_dir` matching the entry point pattern, sorted.
    pub fn entry_points(&self) -> Result<Vec<Utf8PathBuf>> {
        let source_dir = &self.config.source_dir;
        if !source_dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        for entry in WalkDir::new(source_dir).follow_links(true) {
            let entry = entry.wrap_err_with(|| format!("Failed to walk {source_dir}"))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = Utf8Path::from_path(entry.path())
                .ok_or_else(|| eyre!("Path is not valid UTF-8: {}", entry.path().display()))?;
            let Ok(relative) = path.strip_prefix(source_dir) else {
                continue;
            };
            if self.config.is_entry_point(&relative_key(relative)) {
                entries.push(path.to_owned());
            }
        }

        entries.sort();
        Ok(entries)
    }

    /// Request path (relative to the static root) under which each entry's bundle is served.
    pub fn routes(&self) -> Result<HashMap<String, String>> {
        let mut routes = HashMap::new();
        for entry in self.entry_points()? {
            let name = entry_file_name(entry.as_str());
            let route = match &self.config.plugin.bundle_sub_dir {
                Some(sub) => format!("{}/{name}", sub.trim_matches('/')),
                None => name,
            };
            if let Some(previous) = routes.insert(route.clone(), entry.to_string()) {
                tracing::warn!("{} and {} both bundle to /{}", previous, entry, route);
            }
        }
        Ok(routes)
    }

    /// Build-lifecycle hook: bundle every entry point before serving.
    pub async fn build_start(&self) -> Result<Vec<BundleReport>> {
        let entries: Vec<String> = self
            .entry_points()?
            .into_iter()
            .map(Utf8PathBuf::into_string)
            .collect();
        if entries.is_empty() {
            tracing::info!("no css entry points under {}", self.config.source_dir);
            return Ok(Vec::new());
        }

        let reports = bundle(&entries, &self.bundle_options(), &self.config.plugin.isolation)
            .await
            .wrap_err("css build failed")?;
        tracing::info!("bundled {} css entry points", reports.len());
        Ok(reports)
    }

    /// Install the CSS middleware on `router`, unless disabled.
    pub fn apply(&self, router: Router) -> Result<Router> {
        if self.config.plugin.disable_middlewares {
            return Ok(router);
        }

        let state = Arc::new(CssState::new(
            self.framework.dev,
            self.static_dir().into_std_path_buf(),
            self.routes()?,
            self.bundle_options(),
            self.config.plugin.isolation.clone(),
        ));
        Ok(router.layer(axum::middleware::from_fn_with_state(state, css_middleware)))
    }
}

/// `/`-separated form of a relative path, for pattern matching.
fn relative_key(relative: &Utf8Path) -> String {
    relative
        .components()
        .map(|component| component.as_str())
        .collect::<Vec<_>>()
        .join("/")
}
