//! Naming transforms for emitted bundles and assets.
//!
//! Example: `main.css` with [`Naming::ContentHash`] → `main.3f09c1d2e4a7b860.css`

use rapidhash::fast::RapidHasher;
use serde::{Deserialize, Serialize};
use std::hash::Hasher;

/// Rename applied to an output name before it is written or referenced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Naming {
    /// Use the name unchanged.
    #[default]
    Keep,
    /// Append a query to emitted references (`bg.png?_b=42`); the file on disk keeps its name.
    Query(String),
    /// Insert a hash of the content before the extension, on disk and in references.
    ContentHash,
}

impl Naming {
    /// Name of the file written to disk.
    pub fn disk_name(&self, name: &str, content: &[u8]) -> String {
        match self {
            Naming::ContentHash => cache_busted_name(name, &content_hash(content)),
            Naming::Keep | Naming::Query(_) => name.to_string(),
        }
    }

    /// Name emitted into CSS for a file written as `disk_name`.
    pub fn public_name(&self, disk_name: &str) -> String {
        match self {
            Naming::Query(query) => format!("{disk_name}?{query}"),
            Naming::Keep | Naming::ContentHash => disk_name.to_string(),
        }
    }

    /// Whether the disk name depends on the content.
    pub fn needs_content(&self) -> bool {
        matches!(self, Naming::ContentHash)
    }
}

/// How fetched assets are laid out in the asset directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetLayout {
    /// By basename only. Two URLs sharing a basename overwrite each other.
    #[default]
    Flat,
    /// Basename prefixed with a short hash of the URL's host and path.
    HashQualified,
}

impl AssetLayout {
    /// File name for an asset whose URL key is `key` and basename is `basename`.
    pub fn file_name(self, key: &str, basename: &str) -> String {
        match self {
            AssetLayout::Flat => basename.to_string(),
            AssetLayout::HashQualified => {
                format!("{}-{basename}", &content_hash(key.as_bytes())[..8])
            }
        }
    }
}

/// 16 lowercase hex characters of rapidhash.
pub fn content_hash(content: &[u8]) -> String {
    let mut hasher = RapidHasher::default();
    hasher.write(content);
    format!("{:016x}", hasher.finish())
}

/// `fonts/Inter.woff2` + `a1b2c3d4` → `fonts/Inter.a1b2c3d4.woff2`
pub fn cache_busted_name(name: &str, hash: &str) -> String {
    let file_start = name.rfind('/').map_or(0, |i| i + 1);
    match name[file_start..].rfind('.') {
        Some(dot) if dot > 0 => {
            let dot = file_start + dot;
            format!("{}.{}{}", &name[..dot], hash, &name[dot..])
        }
        _ => format!("{name}.{hash}"),
    }
}
