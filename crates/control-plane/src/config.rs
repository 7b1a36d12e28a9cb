// Server configuration loaded from environment variables.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use waypoint_durable::{RuntimeConfig, TimerServiceConfig, WorkerPoolConfig};

#[derive(Debug, Clone)]
pub struct Config {
    /// Listen address for the HTTP server
    pub http_addr: SocketAddr,
    /// Optional route prefix (e.g. "/api")
    pub api_prefix: String,
    /// Durable engine settings
    pub runtime: RuntimeConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_addr: SocketAddr::from(([0, 0, 0, 0], 9000)),
            api_prefix: String::new(),
            runtime: RuntimeConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// - `HTTP_ADDR`: listen address (default: "0.0.0.0:9000")
    /// - `API_PREFIX`: route prefix (default: none)
    /// - `WORKER_ID`: worker identity (default: "worker-<uuid>")
    /// - `WORKER_MAX_CONCURRENCY`: action tries running at once (default: 10)
    /// - `WORKER_POLL_INTERVAL_MS`: task polling interval (default: 250)
    /// - `TIMER_POLL_INTERVAL_MS`: due-timer polling interval (default: 500)
    /// - `SHUTDOWN_TIMEOUT_SECS`: how long shutdown waits for running tries (default: 30)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let http_addr = match var("HTTP_ADDR").filter(|s| !s.is_empty()) {
            Some(addr) => addr
                .parse()
                .with_context(|| format!("Invalid HTTP_ADDR: {addr}"))?,
            None => defaults.http_addr,
        };

        let mut worker = WorkerPoolConfig::default();
        if let Some(id) = var("WORKER_ID").filter(|s| !s.is_empty()) {
            worker = worker.with_worker_id(id);
        }
        if let Some(max) = parse::<usize>(&var, "WORKER_MAX_CONCURRENCY")? {
            worker = worker.with_concurrency(max);
        }
        if let Some(ms) = parse::<u64>(&var, "WORKER_POLL_INTERVAL_MS")? {
            worker = worker.with_poll_interval(Duration::from_millis(ms));
        }
        if let Some(secs) = parse::<u64>(&var, "SHUTDOWN_TIMEOUT_SECS")? {
            worker = worker.with_drain_timeout(Duration::from_secs(secs));
        }

        let mut timers = TimerServiceConfig::default();
        if let Some(ms) = parse::<u64>(&var, "TIMER_POLL_INTERVAL_MS")? {
            timers = timers.with_poll_interval(Duration::from_millis(ms));
        }

        Ok(Self {
            http_addr,
            api_prefix: var("API_PREFIX").unwrap_or_default(),
            runtime: RuntimeConfig {
                worker,
                timers,
                ..defaults.runtime
            },
        })
    }
}

fn parse<T>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    var(key)
        .filter(|s| !s.is_empty())
        .map(|raw| raw.parse::<T>().with_context(|| format!("Invalid {key}: {raw}")))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.http_addr.to_string(), "0.0.0.0:9000");
        assert_eq!(config.api_prefix, "");
        assert_eq!(config.runtime.worker.concurrency, 10);
        assert!(config.runtime.worker.worker_id.starts_with("worker-"));
        assert_eq!(
            config.runtime.timers.poll_interval,
            Duration::from_millis(500)
        );
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("HTTP_ADDR", "127.0.0.1:8080"),
            ("API_PREFIX", "/api"),
            ("WORKER_ID", "w-1"),
            ("WORKER_MAX_CONCURRENCY", "3"),
            ("WORKER_POLL_INTERVAL_MS", "50"),
            ("TIMER_POLL_INTERVAL_MS", "75"),
            ("SHUTDOWN_TIMEOUT_SECS", "5"),
        ])
        .unwrap();

        assert_eq!(config.http_addr.port(), 8080);
        assert_eq!(config.api_prefix, "/api");
        assert_eq!(config.runtime.worker.worker_id, "w-1");
        assert_eq!(config.runtime.worker.concurrency, 3);
        assert_eq!(config.runtime.worker.poll_interval, Duration::from_millis(50));
        assert_eq!(config.runtime.timers.poll_interval, Duration::from_millis(75));
        assert_eq!(config.runtime.worker.drain_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_invalid_values_are_reported() {
        let err = load(&[("WORKER_MAX_CONCURRENCY", "many")]).unwrap_err();
        assert!(err.to_string().contains("WORKER_MAX_CONCURRENCY"));

        assert!(load(&[("HTTP_ADDR", "nowhere")]).is_err());
    }
}
