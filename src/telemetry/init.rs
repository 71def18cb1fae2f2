// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Subscriber setup.

use std::io;

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// How logs are filtered and formatted.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Level used when neither `RUST_LOG` nor `filter_directive` is set.
    pub default_level: Level,

    /// Log span close events with their timings.
    pub include_span_events: bool,

    pub include_target: bool,

    pub ansi_colors: bool,

    /// Explicit `EnvFilter` directive; wins over `RUST_LOG`.
    pub filter_directive: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            default_level: Level::WARN,
            include_span_events: false,
            include_target: false,
            ansi_colors: true,
            filter_directive: None,
        }
    }
}

impl TelemetryConfig {
    /// Debug output for this crate, span timings included.
    pub fn verbose() -> Self {
        Self {
            default_level: Level::DEBUG,
            include_span_events: true,
            include_target: true,
            ansi_colors: true,
            filter_directive: Some("mcp_router=debug,warn".to_string()),
        }
    }

    pub fn from_verbosity(verbose: bool) -> Self {
        if verbose {
            Self::verbose()
        } else {
            Self::default()
        }
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.default_level = level;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter_directive = Some(filter.into());
        self
    }

    pub fn with_ansi(mut self, ansi: bool) -> Self {
        self.ansi_colors = ansi;
        self
    }

    fn env_filter(&self) -> EnvFilter {
        let fallback = || EnvFilter::new(self.default_level.to_string());
        match &self.filter_directive {
            Some(directive) => EnvFilter::try_new(directive).unwrap_or_else(|_| fallback()),
            None => EnvFilter::try_from_default_env().unwrap_or_else(|_| fallback()),
        }
    }
}

/// Keeps the subscriber installed; hold it for the life of the process.
pub struct TelemetryGuard {
    _private: (),
}

/// Install the global subscriber. Logs go to stderr so stdout stays clean
/// for command output.
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
pub fn init_telemetry(config: &TelemetryConfig) -> io::Result<TelemetryGuard> {
    let span_events = if config.include_span_events {
        FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let fmt_layer = fmt::layer()
        .with_writer(io::stderr)
        .with_ansi(config.ansi_colors)
        .with_target(config.include_target)
        .with_span_events(span_events)
        .compact();

    tracing_subscriber::registry()
        .with(config.env_filter())
        .with(fmt_layer)
        .try_init()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;

    Ok(TelemetryGuard { _private: () })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_quiet() {
        let config = TelemetryConfig::default();
        assert_eq!(config.default_level, Level::WARN);
        assert!(!config.include_span_events);
        assert!(config.filter_directive.is_none());
    }

    #[test]
    fn test_from_verbosity() {
        let config = TelemetryConfig::from_verbosity(true);
        assert_eq!(config.default_level, Level::DEBUG);
        assert!(config.include_span_events);
        assert_eq!(config.filter_directive.as_deref(), Some("mcp_router=debug,warn"));
        assert_eq!(TelemetryConfig::from_verbosity(false).default_level, Level::WARN);
    }

    #[test]
    fn test_builder() {
        let config = TelemetryConfig::default()
            .with_level(Level::INFO)
            .with_filter("mcp_router=trace")
            .with_ansi(false);

        assert_eq!(config.default_level, Level::INFO);
        assert_eq!(config.filter_directive.as_deref(), Some("mcp_router=trace"));
        assert!(!config.ansi_colors);
    }
}
