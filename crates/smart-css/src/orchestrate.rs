//! Multi-entry build.
//!
//! Every entry point gets its own resolver and runs concurrently with the
//! others. The first failing entry, in entry order, fails the build; its
//! error is wrapped with the entry point and the intended output path.

use crate::bundle::{BundleJob, BundleOptions, BundleOutput, bundle_one, output_path, write_output};
use crate::resolver::CacheRecord;
use crate::worker::{ProcessIsolate, SupervisorPolicy, TaskIsolate, supervise};
use crate::{Error, Result};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Where a pass runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Isolation {
    /// Directly on the caller's runtime.
    #[default]
    InProcess,
    /// On a supervised tokio task.
    Task {
        #[serde(default)]
        policy: SupervisorPolicy,
    },
    /// In a supervised `smart-css-worker` process.
    Process {
        /// Worker binary; located next to the current executable when unset.
        #[serde(default)]
        worker: Option<PathBuf>,
        #[serde(default)]
        policy: SupervisorPolicy,
    },
}

/// What a successful entry produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleReport {
    pub entry: String,
    pub output: PathBuf,
    pub source_map: Option<PathBuf>,
    pub watch_files: Vec<PathBuf>,
    pub cached: Vec<CacheRecord>,
}

/// Bundle every entry point and write the results.
pub async fn bundle(
    entry_points: &[String],
    options: &BundleOptions,
    isolation: &Isolation,
) -> Result<Vec<BundleReport>> {
    for dir in [&options.bundle_dir, &options.cache_dir, &options.asset_dir] {
        ensure_dir(dir).await?;
    }

    let results = join_all(
        entry_points
            .iter()
            .map(|entry| bundle_entry(entry, options, isolation)),
    )
    .await;

    results.into_iter().collect()
}

/// Bundle and write a single entry point, wrapping any failure in [`Error::Bundle`].
pub async fn bundle_entry(
    entry: &str,
    options: &BundleOptions,
    isolation: &Isolation,
) -> Result<BundleReport> {
    let attempt = async {
        let output = run(entry, options, isolation).await?;
        let written = write_output(&output, entry, options).await?;
        Ok::<_, Error>(BundleReport {
            entry: entry.to_string(),
            output: written.path,
            source_map: written.source_map,
            watch_files: output.watch_files,
            cached: output.cached,
        })
    };

    attempt.await.map_err(|source| {
        let output = output_path(entry, options);
        options.logger.error(format_args!(
            "error during bundle {entry} into {}: {source}",
            output.display()
        ));
        Error::Bundle {
            entry: entry.to_string(),
            output,
            source: Box::new(source),
        }
    })
}

async fn run(entry: &str, options: &BundleOptions, isolation: &Isolation) -> Result<BundleOutput> {
    match isolation {
        Isolation::InProcess => bundle_one(entry, options).await,
        Isolation::Task { policy } => {
            supervise(&TaskIsolate, &BundleJob::new(entry, options.clone()), policy).await
        }
        Isolation::Process { worker, policy } => {
            let program = worker
                .clone()
                .or_else(ProcessIsolate::locate)
                .ok_or_else(|| Error::Worker("smart-css-worker binary not found".to_string()))?;
            let isolate = ProcessIsolate::new(program);
            supervise(&isolate, &BundleJob::new(entry, options.clone()), policy).await
        }
    }
}

async fn ensure_dir(dir: &Path) -> Result<()> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|source| Error::WriteFailed {
            path: dir.to_path_buf(),
            source,
        })
}
