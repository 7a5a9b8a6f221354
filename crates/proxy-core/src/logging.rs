//! Tracing setup driven by the `[logging]` table of the proxy configuration

use serde::Deserialize;
use std::str::FromStr;
use tracing::Level;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, EnvFilter};

use crate::common::{ProxyError, Result};

/// `[logging]` settings.
///
/// ```toml
/// [logging]
/// level = "info"
/// json = true
/// routing_spans = true
/// directives = ["rvoip_proxy_core::dispatcher=trace"]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// Default level for every target
    pub level: String,
    /// One JSON object per event instead of the human-readable format
    pub json: bool,
    /// Log when each per-message `route` span opens and closes
    pub routing_spans: bool,
    /// Extra `target=level` directives, applied after `level`
    pub directives: Vec<String>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            routing_spans: false,
            directives: Vec::new(),
        }
    }
}

impl LogSettings {
    /// Filter from `RUST_LOG`, the configured level and the extra directives
    pub fn env_filter(&self) -> Result<EnvFilter> {
        let level = parse_log_level(&self.level)?;
        let mut filter = EnvFilter::from_default_env().add_directive(level.into());
        for directive in &self.directives {
            let parsed = directive
                .parse::<Directive>()
                .map_err(|e| ProxyError::ConfigError(format!("Invalid log directive '{}': {}", directive, e)))?;
            filter = filter.add_directive(parsed);
        }
        Ok(filter)
    }
}

/// Install the global subscriber; fails if one is already installed
pub fn setup_logging(settings: &LogSettings) -> Result<()> {
    let span_events = if settings.routing_spans {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let builder = fmt::Subscriber::builder()
        .with_env_filter(settings.env_filter()?)
        .with_span_events(span_events);

    let installed = if settings.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| ProxyError::ConfigError(format!("Failed to install logging: {}", e)))?;

    tracing::info!(level = %settings.level, json = settings.json, "proxy-core v{} logging ready", env!("CARGO_PKG_VERSION"));
    Ok(())
}

pub fn parse_log_level(level: &str) -> Result<Level> {
    Level::from_str(level).map_err(|_| ProxyError::ConfigError(format!("Invalid log level: {}", level)))
}
