//! Dev-mode watch context.
//!
//! Local stylesheets read during a pass are tracked; a create, modify or
//! remove event on any of them triggers a rebuild. Remote files in the cache
//! directory are never tracked.

use crate::bundle::{BundleOptions, WrittenBundle, bundle_one, write_output};
use crate::Result;
use notify::event::{Event, EventKind};
use notify::{RecommendedWatcher, RecursiveMode, Watcher as _};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;

/// Editors tend to emit several events per save.
const DEBOUNCE: Duration = Duration::from_millis(50);

/// Tracks a set of files and reports changes to any of them.
pub struct Watcher {
    inner: RecommendedWatcher,
    events: mpsc::UnboundedReceiver<PathBuf>,
    tracked: HashSet<PathBuf>,
    dirs: HashSet<PathBuf>,
}

impl Watcher {
    pub fn new() -> Result<Self> {
        let (tx, events) = mpsc::unbounded_channel();
        let inner = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let Ok(event) = res else {
                return;
            };
            if !matches!(
                event.kind,
                EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
            ) {
                return;
            }
            for path in event.paths {
                let _ = tx.send(path);
            }
        })?;

        Ok(Self {
            inner,
            events,
            tracked: HashSet::new(),
            dirs: HashSet::new(),
        })
    }

    /// Start tracking `files`.
    ///
    /// Parent directories are watched rather than the files themselves, so a
    /// file replaced by rename (as many editors save) stays tracked.
    pub fn track<'a>(&mut self, files: impl IntoIterator<Item = &'a PathBuf>) -> Result<()> {
        for file in files {
            let file = canonical(file);
            if let Some(dir) = file.parent()
                && self.dirs.insert(dir.to_path_buf())
            {
                self.inner.watch(dir, RecursiveMode::NonRecursive)?;
            }
            self.tracked.insert(file);
        }
        Ok(())
    }

    pub fn is_tracked(&self, file: &Path) -> bool {
        self.tracked.contains(&canonical(file))
    }

    /// Wait for the next change to a tracked file, returned in [`canonical`] form.
    /// `None` once the watcher is gone.
    pub async fn changed(&mut self) -> Option<PathBuf> {
        loop {
            let path = canonical(&self.events.recv().await?);
            if self.tracked.contains(&path) {
                return Some(path);
            }
        }
    }

    /// Discard events that are already queued.
    pub fn drain(&mut self) {
        while self.events.try_recv().is_ok() {}
    }
}

/// Canonical form used for tracking; falls back to `path` for files that no longer exist.
pub fn canonical(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Bundle `entry`, write it, and rebuild whenever one of its local stylesheets changes.
///
/// Runs until the returned future is dropped. Every build, successful or
/// not, is reported through `on_build`; a failed build keeps the previous
/// set of watched files.
pub async fn watch_and_rebuild<F>(entry: &str, options: &BundleOptions, mut on_build: F) -> Result<()>
where
    F: FnMut(Result<WrittenBundle>),
{
    let mut watcher = Watcher::new()?;
    let entry_path = PathBuf::from(entry);
    if entry_path.exists() {
        watcher.track([&entry_path])?;
    }

    loop {
        let built = match bundle_one(entry, options).await {
            Ok(output) => {
                watcher.track(&output.watch_files)?;
                write_output(&output, entry, options).await
            }
            Err(e) => Err(e),
        };
        if let Err(e) = &built {
            options.logger.error(format_args!("{e}"));
        }
        on_build(built);

        let Some(changed) = watcher.changed().await else {
            return Ok(());
        };
        tokio::time::sleep(DEBOUNCE).await;
        watcher.drain();
        options
            .logger
            .info(format_args!("{} changed, rebuilding {entry}", changed.display()));
    }
}
