//! axum adapter for [`smart_css`].
//!
//! [`CssBundler::build_start`] bundles every entry point before the server
//! starts; [`CssBundler::apply`] installs the request middleware that serves
//! bundles (rebuilding them in dev mode).

pub mod config;
pub mod middleware;
pub mod plugin;

pub use config::{PluginConfig, ResolvedConfig};
pub use middleware::{CssState, css_middleware, mime_from_extension};
pub use plugin::{CssBundler, FrameworkConfig};
