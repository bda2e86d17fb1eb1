//! Remote-aware CSS bundling.
//!
//! Entry points (local files or absolute URLs) are bundled with lightningcss.
//! Remote `@import`s are fetched and cached under
//! `<cache_dir>/<scheme>/<host>/<path>`, so relative references inside them
//! resolve against their original URL. Remote `url()` assets are copied to
//! the asset directory and rewritten to their public name.
//!
//! ```no_run
//! # async fn run() -> smart_css::Result<()> {
//! use smart_css::{BundleOptions, Isolation, bundle};
//!
//! let options = BundleOptions::default();
//! let reports = bundle(&["src/main.css".to_string()], &options, &Isolation::InProcess).await?;
//! for report in reports {
//!     println!("{} -> {}", report.entry, report.output.display());
//! }
//! # Ok(())
//! # }
//! ```

pub mod bundle;
pub mod cache_path;
pub mod error;
pub mod fetch;
pub mod loader;
pub mod log;
pub mod naming;
pub mod orchestrate;
pub mod reference;
pub mod resolver;
pub mod stylesheet;
pub mod watch;
pub mod worker;

pub use bundle::{BundleJob, BundleOptions, BundleOutput, WrittenBundle, bundle_one, write_output};
pub use cache_path::{cache_path_to_url, url_to_cache_path};
pub use error::{Error, Result};
pub use log::{LogLevel, Logger, init_tracing};
pub use naming::{AssetLayout, Naming};
pub use orchestrate::{BundleReport, Isolation, bundle, bundle_entry};
pub use reference::{Reference, ReferenceKind};
pub use resolver::{CacheRecord, RemoteResolver, Resolution};
pub use watch::{Watcher, watch_and_rebuild};
pub use worker::{Isolate, ProcessIsolate, SupervisorPolicy, TaskIsolate, supervise};
