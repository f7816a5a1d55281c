//! Application-level configuration loading, including the delivery timing knobs.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "GAMBIT_BACK_CONFIG_PATH";

/// Missed-heartbeat window before a connection row is evicted.
const DEFAULT_CONNECTION_TTL_MS: u64 = 60_000;
/// Lifetime of a queued event envelope.
const DEFAULT_EVENT_TTL_MS: u64 = 30_000;
/// How often each stream drains the shared outbox.
const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;
/// How often each stream pushes a keepalive payload.
const DEFAULT_KEEPALIVE_INTERVAL_MS: u64 = 30_000;

/// An event must stay queued long enough for a few poll passes to see it, or
/// it can expire before any poller drains it.
const MIN_EVENT_TTL_POLL_MULTIPLE: u64 = 3;

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    connection_ttl_ms: u64,
    event_ttl_ms: u64,
    poll_interval_ms: u64,
    keepalive_interval_ms: u64,
}

impl AppConfig {
    /// Load the configuration from disk, falling back to baked-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        let config = match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    info!(path = %path.display(), "loaded timing configuration");
                    raw.into()
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        };
        config.normalized()
    }

    /// Enforce the timing relationship between event TTL and poll interval,
    /// clamping the TTL upward when a config file violates it.
    fn normalized(mut self) -> Self {
        let floor = self
            .poll_interval_ms
            .saturating_mul(MIN_EVENT_TTL_POLL_MULTIPLE);
        if self.event_ttl_ms < floor {
            warn!(
                configured = self.event_ttl_ms,
                clamped_to = floor,
                "event TTL shorter than three poll intervals; clamping"
            );
            self.event_ttl_ms = floor;
        }
        self
    }

    /// Missed-heartbeat window before a connection row is evicted.
    pub fn connection_ttl_ms(&self) -> u64 {
        self.connection_ttl_ms
    }

    /// Lifetime of a queued event envelope.
    pub fn event_ttl_ms(&self) -> u64 {
        self.event_ttl_ms
    }

    /// How often each stream drains the shared outbox.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// How often each stream pushes a keepalive payload.
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            connection_ttl_ms: DEFAULT_CONNECTION_TTL_MS,
            event_ttl_ms: DEFAULT_EVENT_TTL_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            keepalive_interval_ms: DEFAULT_KEEPALIVE_INTERVAL_MS,
        }
    }
}

#[derive(Debug, Deserialize)]
/// JSON representation of the configuration file.
struct RawConfig {
    #[serde(default)]
    connection_ttl_ms: Option<u64>,
    #[serde(default)]
    event_ttl_ms: Option<u64>,
    #[serde(default)]
    poll_interval_ms: Option<u64>,
    #[serde(default)]
    keepalive_interval_ms: Option<u64>,
}

impl From<RawConfig> for AppConfig {
    fn from(raw: RawConfig) -> Self {
        let defaults = AppConfig::default();
        Self {
            connection_ttl_ms: raw.connection_ttl_ms.unwrap_or(defaults.connection_ttl_ms),
            event_ttl_ms: raw.event_ttl_ms.unwrap_or(defaults.event_ttl_ms),
            poll_interval_ms: raw.poll_interval_ms.unwrap_or(defaults.poll_interval_ms),
            keepalive_interval_ms: raw
                .keepalive_interval_ms
                .unwrap_or(defaults.keepalive_interval_ms),
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_satisfy_ttl_invariant() {
        let config = AppConfig::default().normalized();
        assert!(config.event_ttl_ms() >= 3 * config.poll_interval().as_millis() as u64);
    }

    #[test]
    fn short_event_ttl_is_clamped() {
        let raw = RawConfig {
            connection_ttl_ms: None,
            event_ttl_ms: Some(1_000),
            poll_interval_ms: Some(2_000),
            keepalive_interval_ms: None,
        };
        let config = AppConfig::from(raw).normalized();
        assert_eq!(config.event_ttl_ms(), 6_000);
    }

    #[test]
    fn partial_config_keeps_remaining_defaults() {
        let raw: RawConfig = serde_json::from_str(r#"{"poll_interval_ms": 500}"#).unwrap();
        let config = AppConfig::from(raw).normalized();
        assert_eq!(config.poll_interval(), Duration::from_millis(500));
        assert_eq!(config.connection_ttl_ms(), DEFAULT_CONNECTION_TTL_MS);
    }
}
