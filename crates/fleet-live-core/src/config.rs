//! Live-view configuration with environment overrides.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid endpoint for {field}: {value}")]
    InvalidEndpoint { field: &'static str, value: String },
    #[error("Invalid value for {var}: {value}")]
    InvalidValue { var: &'static str, value: String },
}

/// Delay schedule between a close and the next connect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReconnectPolicy {
    /// Same delay before every attempt.
    Fixed { delay_ms: u64 },
    /// Doubling delay, reset after a successful open.
    Exponential { initial_ms: u64, max_ms: u64 },
}

impl ReconnectPolicy {
    /// Fixed-delay policy, saturating at `u64::MAX` milliseconds.
    #[must_use]
    pub fn fixed(delay: Duration) -> Self {
        Self::Fixed {
            delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Delay before reconnect attempt number `attempt` (1-based) since the
    /// last successful open.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Self::Fixed { delay_ms } => Duration::from_millis(delay_ms),
            Self::Exponential { initial_ms, max_ms } => {
                let shift = attempt.saturating_sub(1).min(32);
                let ms = initial_ms.saturating_mul(1_u64 << shift).min(max_ms);
                Duration::from_millis(ms)
            }
        }
    }
}

/// Remote console endpoint and credentials.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    /// WebSocket URL of the console service.
    pub url: String,
    /// API key sent in the auth payload.
    pub api_key: String,
    /// Device instance the console belongs to.
    pub instance_id: String,
    pub reconnect: ReconnectPolicy,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8080/api/ws/console".to_string(),
            api_key: String::new(),
            instance_id: String::new(),
            reconnect: ReconnectPolicy::Fixed { delay_ms: 3000 },
        }
    }
}

// The API key must never reach logs.
impl std::fmt::Debug for ConsoleConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsoleConfig")
            .field("url", &self.url)
            .field("api_key", &"<redacted>")
            .field("instance_id", &self.instance_id)
            .field("reconnect", &self.reconnect)
            .finish()
    }
}

/// Publish/subscribe broker connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Broker URL (`ws://`, `wss://`, `mqtt://` or `tcp://`).
    pub url: String,
    pub reconnect: ReconnectPolicy,
    /// Connect attempts longer than this count as failures.
    pub connect_timeout_ms: u64,
    pub keep_alive_secs: u64,
    /// Start every connection without broker-side session state.
    pub clean_session: bool,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:9001".to_string(),
            reconnect: ReconnectPolicy::Fixed { delay_ms: 1000 },
            connect_timeout_ms: 5000,
            keep_alive_secs: 60,
            clean_session: true,
        }
    }
}

impl BrokerConfig {
    /// Connect timeout as a duration.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Tap simulator topics and timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TapConfig {
    pub request_topic: String,
    pub response_topic: String,
    /// Time from an accepted response back to the ready screen.
    pub reset_after_ms: u64,
    /// Number of outcomes kept in the history ring.
    pub history_capacity: usize,
}

impl Default for TapConfig {
    fn default() -> Self {
        Self {
            request_topic: "motu/tap/request".to_string(),
            response_topic: "motu/tap/response".to_string(),
            reset_after_ms: 3000,
            history_capacity: 10,
        }
    }
}

impl TapConfig {
    /// Auto-reset delay as a duration.
    #[must_use]
    pub const fn reset_after(&self) -> Duration {
        Duration::from_millis(self.reset_after_ms)
    }
}

/// Complete live-view configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveViewConfig {
    pub console: ConsoleConfig,
    pub broker: BrokerConfig,
    pub tap: TapConfig,
}

impl LiveViewConfig {
    /// Defaults overlaid with `FLEET_*` environment variables.
    ///
    /// # Errors
    /// Returns error if an endpoint has an unsupported scheme.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Defaults overlaid with values from `lookup`.
    ///
    /// # Errors
    /// Returns error if an endpoint has an unsupported scheme or a numeric
    /// variable does not parse.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let set = |target: &mut String, var: &str| {
            if let Some(value) = lookup(var).filter(|v| !v.trim().is_empty()) {
                *target = value;
            }
        };

        set(&mut config.console.url, "FLEET_CONSOLE_URL");
        set(&mut config.console.api_key, "FLEET_CONSOLE_API_KEY");
        set(&mut config.console.instance_id, "FLEET_CONSOLE_INSTANCE_ID");
        set(&mut config.broker.url, "FLEET_MQTT_WS");
        set(&mut config.tap.request_topic, "FLEET_REQ_TOPIC");
        set(&mut config.tap.response_topic, "FLEET_RESP_TOPIC");

        if let Some(value) = lookup("FLEET_TAP_RESET_MS").filter(|v| !v.trim().is_empty()) {
            config.tap.reset_after_ms =
                value.trim().parse().map_err(|_| ConfigError::InvalidValue {
                    var: "FLEET_TAP_RESET_MS",
                    value,
                })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check endpoint schemes.
    ///
    /// # Errors
    /// Returns error naming the first field with an unsupported scheme.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !has_scheme(&self.console.url, &["ws", "wss"]) {
            return Err(ConfigError::InvalidEndpoint {
                field: "console.url",
                value: self.console.url.clone(),
            });
        }
        if !has_scheme(&self.broker.url, &["ws", "wss", "mqtt", "tcp"]) {
            return Err(ConfigError::InvalidEndpoint {
                field: "broker.url",
                value: self.broker.url.clone(),
            });
        }
        Ok(())
    }
}

fn has_scheme(url: &str, schemes: &[&str]) -> bool {
    url.split_once("://")
        .is_some_and(|(scheme, rest)| !rest.is_empty() && schemes.contains(&scheme))
}
