// Logging setup: one console layer, filtered by RUST_LOG or LOG_LEVEL

use tracing_subscriber::filter::ParseError;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

pub const DEFAULT_LOG_FILTER: &str =
    "waypoint_control_plane=debug,waypoint_durable=info,tower_http=debug";

#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    /// Filter directives such as `info` or `waypoint_durable=debug`
    pub filter: Option<String>,
    /// Reported once at startup
    pub version: Option<String>,
}

impl LogConfig {
    /// `RUST_LOG` wins over `LOG_LEVEL`; blank values count as unset
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let set = |key: &str| var(key).filter(|value| !value.trim().is_empty());
        Self {
            filter: set("RUST_LOG").or_else(|| set("LOG_LEVEL")),
            version: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    fn env_filter(&self) -> Result<EnvFilter, ParseError> {
        EnvFilter::try_new(self.filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER))
    }
}

/// Install the global subscriber; call once from `main`
pub fn init_logging(config: &LogConfig) {
    let filter = config.env_filter();
    let rejected = filter.as_ref().err().map(ToString::to_string);

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .with(filter.unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)))
        .init();

    if let Some(reason) = rejected {
        tracing::warn!(filter = ?config.filter, %reason, "log filter rejected, using the default");
    }
    tracing::info!(
        version = config.version.as_deref().unwrap_or("dev"),
        "logging ready"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from(vars: &[(&str, &str)]) -> LogConfig {
        LogConfig::from_lookup(|key| {
            vars.iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        })
    }

    #[test]
    fn test_rust_log_wins() {
        let config = from(&[("RUST_LOG", "warn"), ("LOG_LEVEL", "debug")]);
        assert_eq!(config.filter.as_deref(), Some("warn"));
        assert_eq!(config.env_filter().unwrap().to_string(), "warn");
    }

    #[test]
    fn test_blank_values_fall_through() {
        let config = from(&[("RUST_LOG", " "), ("LOG_LEVEL", "debug")]);
        assert_eq!(config.filter.as_deref(), Some("debug"));

        let config = from(&[]);
        assert_eq!(config.filter, None);
        assert!(config
            .env_filter()
            .unwrap()
            .to_string()
            .contains("waypoint_durable=info"));
    }

    #[test]
    fn test_bad_directive_is_reported() {
        let config = from(&[("RUST_LOG", "waypoint=notalevel")]);
        assert!(config.env_filter().is_err());
    }
}
