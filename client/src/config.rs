//! Client configuration from the environment.
//!
//! DESIGN
//! ======
//! Every setting has a working default so a kiosk on the sales-office LAN
//! starts with no configuration at all. Lookups go through a closure so tests
//! can supply variables without touching the process environment.

use std::time::Duration;

/// Broker websocket endpoint.
pub const DEFAULT_MQTT_URL: &str = "ws://127.0.0.1:3001/mqtt";
pub const DEFAULT_MQTT_USER: &str = "reactuser";
pub const DEFAULT_MQTT_PASS: &str = "scaleModel";
/// Topic namespace shared by every kiosk and the LED controller.
pub const DEFAULT_PROJECT: &str = "platinum";
pub const DEFAULT_API_URL: &str = "http://127.0.0.1:3001";

/// Delay between reconnect attempts.
pub const RECONNECT_PERIOD: Duration = Duration::from_millis(1500);
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const KEEPALIVE: Duration = Duration::from_secs(25);

/// Broker connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    pub url: String,
    pub username: String,
    pub password: String,
    pub project: String,
    pub reconnect_period: Duration,
    pub connect_timeout: Duration,
    pub keepalive: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_MQTT_URL.to_owned(),
            username: DEFAULT_MQTT_USER.to_owned(),
            password: DEFAULT_MQTT_PASS.to_owned(),
            project: DEFAULT_PROJECT.to_owned(),
            reconnect_period: RECONNECT_PERIOD,
            connect_timeout: CONNECT_TIMEOUT,
            keepalive: KEEPALIVE,
        }
    }
}

impl BrokerConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            url: env_or(&lookup, "TOWERDECK_MQTT_URL", defaults.url),
            username: env_or(&lookup, "TOWERDECK_MQTT_USER", defaults.username),
            password: env_or(&lookup, "TOWERDECK_MQTT_PASS", defaults.password),
            project: env_or(&lookup, "TOWERDECK_MQTT_PROJECT", defaults.project),
            ..defaults
        }
    }
}

/// HTTP API settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    /// Base URL without a trailing slash.
    pub base_url: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { base_url: DEFAULT_API_URL.to_owned() }
    }
}

impl ApiConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let base_url = env_or(&lookup, "TOWERDECK_API_URL", DEFAULT_API_URL.to_owned());
        Self { base_url: base_url.trim_end_matches('/').to_owned() }
    }
}

fn env_or(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: String) -> String {
    lookup(key)
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
        .unwrap_or(default)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
