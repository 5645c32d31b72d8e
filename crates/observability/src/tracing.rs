//! Tracing/logging initialization.
//!
//! The filter comes from `RUST_LOG` (default `info`); the output format from
//! `CATALOG_LOG_FORMAT` (`json` or `pretty`).

use std::fmt;
use std::str::FromStr;

use tracing_subscriber::EnvFilter;

/// Environment variable selecting the log output format.
pub const LOG_FORMAT_ENV: &str = "CATALOG_LOG_FORMAT";

const DEFAULT_FILTER: &str = "info";

/// Log line format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per event, with timestamps.
    #[default]
    Json,
    /// Human-readable multi-line output for local runs.
    Pretty,
}

impl LogFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            LogFormat::Json => "json",
            LogFormat::Pretty => "pretty",
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown log format: {0} (expected json or pretty)")]
pub struct UnknownLogFormat(pub String);

impl FromStr for LogFormat {
    type Err = UnknownLogFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            other => Err(UnknownLogFormat(other.to_string())),
        }
    }
}

/// Subscriber settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservabilityConfig {
    pub format: LogFormat,
    /// Filter directives used when `RUST_LOG` is unset or invalid.
    pub default_filter: String,
    pub with_target: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            default_filter: DEFAULT_FILTER.to_string(),
            with_target: false,
        }
    }
}

impl ObservabilityConfig {
    /// Read the format from `CATALOG_LOG_FORMAT`. Unknown values keep the default.
    pub fn from_env() -> Self {
        Self::from_env_value(std::env::var(LOG_FORMAT_ENV).ok().as_deref())
    }

    fn from_env_value(raw: Option<&str>) -> Self {
        let format = raw
            .and_then(|value| value.parse::<LogFormat>().ok())
            .unwrap_or_default();
        Self::default().with_format(format)
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_default_filter(mut self, directives: impl Into<String>) -> Self {
        self.default_filter = directives.into();
        self
    }

    pub fn with_target(mut self, with_target: bool) -> Self {
        self.with_target = with_target;
        self
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.default_filter))
    }
}

/// Initialize tracing/logging for the process.
///
/// Safe to call multiple times (subsequent calls are no-ops). Returns whether this call
/// installed the global subscriber.
pub fn init_with(config: &ObservabilityConfig) -> bool {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(config.filter())
        .with_target(config.with_target);

    let installed = match config.format {
        LogFormat::Json => builder
            .json()
            .with_timer(tracing_subscriber::fmt::time::SystemTime)
            .try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
    };

    let installed = installed.is_ok();
    if installed {
        ::tracing::debug!(format = %config.format, "tracing subscriber installed");
    }
    installed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_format_parses_case_insensitively() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!(" pretty ".parse::<LogFormat>().unwrap(), LogFormat::Pretty);

        let err = "xml".parse::<LogFormat>().unwrap_err();
        assert_eq!(err, UnknownLogFormat("xml".to_string()));
        assert!(err.to_string().contains("expected json or pretty"));
    }

    #[test]
    fn env_value_selects_format() {
        assert_eq!(
            ObservabilityConfig::from_env_value(Some("pretty")).format,
            LogFormat::Pretty
        );
        assert_eq!(
            ObservabilityConfig::from_env_value(Some("yaml")),
            ObservabilityConfig::default()
        );
        assert_eq!(
            ObservabilityConfig::from_env_value(None),
            ObservabilityConfig::default()
        );
    }

    #[test]
    fn builders_override_defaults() {
        let config = ObservabilityConfig::default()
            .with_format(LogFormat::Pretty)
            .with_default_filter("catalog_refresh=debug")
            .with_target(true);

        assert_eq!(config.format, LogFormat::Pretty);
        assert_eq!(config.default_filter, "catalog_refresh=debug");
        assert!(config.with_target);
    }

    #[test]
    fn repeated_init_is_a_no_op() {
        init_with(&ObservabilityConfig::default());
        assert!(!init_with(&ObservabilityConfig::default().with_format(LogFormat::Pretty)));
    }
}
