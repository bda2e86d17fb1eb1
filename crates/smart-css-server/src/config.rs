//! Configuration file discovery and parsing
//!
//! Searches for `.config/smart-css.yaml` walking up from the current directory.
//! The project root is the parent of `.config/`.

use camino::{Utf8Path, Utf8PathBuf};
use eyre::{Result, WrapErr, eyre};
use regex::Regex;
use serde::{Deserialize, Serialize};
use smart_css::{AssetLayout, Isolation, LogLevel, Naming};
use std::env;
use std::fs;

const CONFIG_DIR: &str = ".config";
const CONFIG_FILE_YAML: &str = "smart-css.yaml";

/// Matches any file named `main.css`, at any depth.
pub const DEFAULT_PATTERN: &str = r"(^|/)main\.css$";

/// Plugin configuration from `.config/smart-css.yaml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct PluginConfig {
    /// Directory searched for entry points (relative to project root)
    pub source_dir: Utf8PathBuf,

    /// Regex matched against each source file's path relative to `source_dir`
    pub pattern: String,

    pub log_level: LogLevel,

    /// Skip installing the request middleware
    pub disable_middlewares: bool,

    /// Remote stylesheet cache; defaults to `<out_dir>/cache/css`
    pub cache_dir: Option<Utf8PathBuf>,

    /// Specifier prefixes that are never inlined or fetched
    pub external_paths: Vec<String>,

    pub asset_naming: Naming,

    pub bundle_naming: Naming,

    /// Subdirectory of `<out_dir>/static` that bundles are written to
    pub bundle_sub_dir: Option<String>,

    pub asset_layout: AssetLayout,

    /// Prefix for asset references emitted into bundles
    pub asset_public_path: Option<String>,

    pub isolation: Isolation,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            source_dir: Utf8PathBuf::from("src"),
            pattern: DEFAULT_PATTERN.to_string(),
            log_level: LogLevel::default(),
            disable_middlewares: false,
            cache_dir: None,
            external_paths: Vec::new(),
            asset_naming: Naming::default(),
            bundle_naming: Naming::default(),
            bundle_sub_dir: None,
            asset_layout: AssetLayout::default(),
            asset_public_path: None,
            isolation: Isolation::default(),
        }
    }
}

/// Configuration with paths resolved against the project root
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Project root (parent of .config/)
    pub root: Utf8PathBuf,
    /// Absolute path to the source directory
    pub source_dir: Utf8PathBuf,
    /// Absolute cache directory, when configured
    pub cache_dir: Option<Utf8PathBuf>,
    /// Compiled entry point pattern
    pub pattern: Regex,
    pub plugin: PluginConfig,
}

impl ResolvedConfig {
    /// Resolve `plugin` against `root`.
    pub fn new(root: impl Into<Utf8PathBuf>, plugin: PluginConfig) -> Result<Self> {
        let root = root.into();
        let pattern = Regex::new(&plugin.pattern)
            .wrap_err_with(|| format!("invalid entry point pattern `{}`", plugin.pattern))?;

        Ok(Self {
            source_dir: root.join(&plugin.source_dir),
            cache_dir: plugin.cache_dir.as_ref().map(|dir| root.join(dir)),
            root,
            pattern,
            plugin,
        })
    }

    /// Discover and load configuration from current directory
    pub fn discover() -> Result<Option<Self>> {
        match find_config_file()? {
            Some(path) => Ok(Some(load_config(&path)?)),
            None => Ok(None),
        }
    }

    /// Discover and load configuration from a specific project path
    pub fn discover_from(project_path: &Utf8Path) -> Result<Option<Self>> {
        let yaml_file = project_path.join(CONFIG_DIR).join(CONFIG_FILE_YAML);
        if yaml_file.exists() {
            Ok(Some(load_config(&yaml_file)?))
        } else {
            Ok(None)
        }
    }

    /// Whether `relative` (a path under the source directory, `/`-separated) is an entry point.
    pub fn is_entry_point(&self, relative: &str) -> bool {
        self.pattern.is_match(relative)
    }
}

/// Search for `.config/smart-css.yaml` walking up from current directory
fn find_config_file() -> Result<Option<Utf8PathBuf>> {
    let cwd = env::current_dir()?;
    let cwd = Utf8PathBuf::try_from(cwd).map_err(|e| {
        eyre!(
            "Current directory is not valid UTF-8: {}",
            e.as_path().display()
        )
    })?;

    let mut current = cwd.as_path();

    loop {
        let yaml_file = current.join(CONFIG_DIR).join(CONFIG_FILE_YAML);
        if yaml_file.exists() {
            return Ok(Some(yaml_file));
        }

        match current.parent() {
            Some(parent) => current = parent,
            None => return Ok(None),
        }
    }
}

/// Load and resolve configuration from a config file path
fn load_config(config_path: &Utf8Path) -> Result<ResolvedConfig> {
    let content = fs::read_to_string(config_path)
        .wrap_err_with(|| format!("Failed to read {config_path}"))?;

    // An empty file is a valid, all-defaults config
    let config: PluginConfig = if content.trim().is_empty() {
        PluginConfig::default()
    } else {
        serde_yaml::from_str(&content).map_err(|e| eyre!("Failed to parse {}: {}", config_path, e))?
    };

    let root = config_path
        .parent()
        .and_then(Utf8Path::parent)
        .ok_or_else(|| eyre!("{} is not inside a .config directory", config_path))?;

    ResolvedConfig::new(root, config)
}
