//! Logging capability threaded through every component.
//!
//! A [`Logger`] carries the configured verbosity and forwards admitted
//! messages to `tracing`. It is part of [`crate::BundleOptions`], so it also
//! crosses into worker processes unchanged.

use serde::{Deserialize, Serialize};
use std::fmt::Display;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

/// Verbosity, ordered from silent to chatty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Disabled,
    Error,
    #[default]
    Info,
    Debug,
}

impl LogLevel {
    /// Filter directive used when `RUST_LOG` is not set.
    fn directive(self) -> &'static str {
        match self {
            LogLevel::Disabled => "off",
            LogLevel::Error => "error",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "disabled" => Ok(LogLevel::Disabled),
            "error" => Ok(LogLevel::Error),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            other => Err(format!("unknown log level `{other}`")),
        }
    }
}

/// Passed-down logging capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Logger {
    level: LogLevel,
}

impl Logger {
    pub fn new(level: LogLevel) -> Self {
        Self { level }
    }

    /// A logger that drops everything.
    pub fn disabled() -> Self {
        Self::new(LogLevel::Disabled)
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }

    /// Whether messages at `level` get through. Call sites that emit
    /// structured `tracing` fields check this first.
    pub fn enabled(&self, level: LogLevel) -> bool {
        self.level != LogLevel::Disabled && level <= self.level
    }

    pub fn error(&self, message: impl Display) {
        if self.enabled(LogLevel::Error) {
            tracing::error!(target: "smart_css", "{message}");
        }
    }

    pub fn info(&self, message: impl Display) {
        if self.enabled(LogLevel::Info) {
            tracing::info!(target: "smart_css", "{message}");
        }
    }

    pub fn debug(&self, message: impl Display) {
        if self.enabled(LogLevel::Debug) {
            tracing::debug!(target: "smart_css", "{message}");
        }
    }
}

/// Install a compact stderr subscriber.
///
/// `RUST_LOG` wins when set; otherwise the filter follows `level`. Calling
/// this more than once is harmless.
pub fn init_tracing(level: LogLevel) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.directive()));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact();
    let _ = tracing_subscriber::registry()
        .with(fmt_layer.with_filter(filter))
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levels_admit_lower_severities() {
        let info = Logger::new(LogLevel::Info);
        assert!(info.enabled(LogLevel::Error));
        assert!(info.enabled(LogLevel::Info));
        assert!(!info.enabled(LogLevel::Debug));

        let disabled = Logger::disabled();
        assert!(!disabled.enabled(LogLevel::Error));
    }

    #[test]
    fn test_parse_level() {
        assert_eq!("debug".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert_eq!("disabled".parse::<LogLevel>().unwrap(), LogLevel::Disabled);
        assert!("verbose".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_logger_serializes_as_level() {
        let json = serde_json::to_string(&Logger::new(LogLevel::Error)).unwrap();
        assert_eq!(json, "\"error\"");
    }
}
