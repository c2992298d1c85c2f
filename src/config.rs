//! Connection settings

use crate::{
    constants::{
        DEFAULT_ACTION_TIMEOUT_MS, DEFAULT_AMI_PORT, DEFAULT_DIAL_TIMEOUT_MS,
        DEFAULT_PING_INTERVAL_MS, DEFAULT_PING_TIMEOUT_MS, DEFAULT_RECONNECT_INTERVAL_MS,
        MAX_EVENT_QUEUE_SIZE,
    },
    error::{AmiError, AmiResult},
};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;

fn default_port() -> u16 {
    DEFAULT_AMI_PORT
}
fn default_dial_timeout_ms() -> u64 {
    DEFAULT_DIAL_TIMEOUT_MS
}
fn default_reconnect_interval_ms() -> u64 {
    DEFAULT_RECONNECT_INTERVAL_MS
}
fn default_action_timeout_ms() -> u64 {
    DEFAULT_ACTION_TIMEOUT_MS
}
fn default_keepalive() -> bool {
    true
}
fn default_ping_interval_ms() -> u64 {
    DEFAULT_PING_INTERVAL_MS
}
fn default_ping_timeout_ms() -> u64 {
    DEFAULT_PING_TIMEOUT_MS
}
fn default_event_queue_size() -> usize {
    MAX_EVENT_QUEUE_SIZE
}

/// Settings for one AMI session.
///
/// `host`, `username` and `password` have no defaults. Everything else
/// falls back to the crate constants, both through [`AmiSettings::new`] and
/// when deserialized:
///
/// ```
/// # use asterisk_ami_tokio::AmiSettings;
/// let settings = AmiSettings::new("pbx.local", 5038, "admin", "secret")
///     .with_action_timeout(std::time::Duration::from_secs(10))
///     .with_keepalive(false);
/// assert_eq!(settings.action_timeout().as_secs(), 10);
/// assert!(settings.validate().is_ok());
/// ```
#[derive(Clone, Deserialize)]
pub struct AmiSettings {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    pub password: String,
    /// TCP dial and greeting timeout
    #[serde(default = "default_dial_timeout_ms")]
    pub dial_timeout_ms: u64,
    /// Pause between a failed connection and the next attempt
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,
    /// How long `send` waits for a response
    #[serde(default = "default_action_timeout_ms")]
    pub action_timeout_ms: u64,
    /// Periodic `Ping` liveness check
    #[serde(default = "default_keepalive")]
    pub keepalive: bool,
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,
    #[serde(default = "default_ping_timeout_ms")]
    pub ping_timeout_ms: u64,
    /// Capacity of each subscriber queue
    #[serde(default = "default_event_queue_size")]
    pub event_queue_size: usize,
    /// Max verbosity (`error`..`trace`) for a session-local log subscriber.
    /// Unset: log through the caller's dispatcher.
    #[serde(default)]
    pub log_level: Option<String>,
}

impl AmiSettings {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            password: password.into(),
            dial_timeout_ms: DEFAULT_DIAL_TIMEOUT_MS,
            reconnect_interval_ms: DEFAULT_RECONNECT_INTERVAL_MS,
            action_timeout_ms: DEFAULT_ACTION_TIMEOUT_MS,
            keepalive: true,
            ping_interval_ms: DEFAULT_PING_INTERVAL_MS,
            ping_timeout_ms: DEFAULT_PING_TIMEOUT_MS,
            event_queue_size: MAX_EVENT_QUEUE_SIZE,
            log_level: None,
        }
    }

    pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_action_timeout(mut self, timeout: Duration) -> Self {
        self.action_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_keepalive(mut self, enabled: bool) -> Self {
        self.keepalive = enabled;
        self
    }

    /// Ping period and deadline; the deadline must be shorter than the period.
    pub fn with_ping(mut self, interval: Duration, timeout: Duration) -> Self {
        self.ping_interval_ms = interval.as_millis() as u64;
        self.ping_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_event_queue_size(mut self, size: usize) -> Self {
        self.event_queue_size = size;
        self
    }

    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = Some(level.into());
        self
    }

    /// `host:port` dial string.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn action_timeout(&self) -> Duration {
        Duration::from_millis(self.action_timeout_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    /// Reject settings the session cannot run with.
    pub fn validate(&self) -> AmiResult<()> {
        let invalid = |message: &str| Err(AmiError::protocol_error(message.to_string()));

        if self.host.trim().is_empty() {
            return invalid("host must not be empty");
        }
        if self.port == 0 {
            return invalid("port must not be zero");
        }
        if self.dial_timeout_ms == 0 || self.action_timeout_ms == 0 {
            return invalid("dial and action timeouts must not be zero");
        }
        if self.keepalive {
            if self.ping_interval_ms == 0 || self.ping_timeout_ms == 0 {
                return invalid("ping interval and timeout must not be zero");
            }
            if self.ping_timeout_ms >= self.ping_interval_ms {
                return invalid("ping timeout must be shorter than the ping interval");
            }
        }
        if let Some(level) = &self.log_level {
            if level
                .parse::<tracing::Level>()
                .is_err()
            {
                return Err(AmiError::protocol_error(format!(
                    "unknown log level '{}'",
                    level
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for AmiSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AmiSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("dial_timeout_ms", &self.dial_timeout_ms)
            .field("reconnect_interval_ms", &self.reconnect_interval_ms)
            .field("action_timeout_ms", &self.action_timeout_ms)
            .field("keepalive", &self.keepalive)
            .field("ping_interval_ms", &self.ping_interval_ms)
            .field("ping_timeout_ms", &self.ping_timeout_ms)
            .field("event_queue_size", &self.event_queue_size)
            .field("log_level", &self.log_level)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialize_applies_defaults() {
        let settings: AmiSettings = serde_json::from_str(
            r#"{"host": "10.0.0.1", "username": "admin", "password": "amp111"}"#,
        )
        .unwrap();
        assert_eq!(settings.port, DEFAULT_AMI_PORT);
        assert_eq!(settings.dial_timeout(), Duration::from_secs(10));
        assert_eq!(settings.reconnect_interval(), Duration::from_secs(1));
        assert_eq!(settings.action_timeout(), Duration::from_secs(60));
        assert!(settings.keepalive);
        assert_eq!(settings.ping_interval(), Duration::from_secs(5));
        assert_eq!(settings.ping_timeout(), Duration::from_secs(3));
        assert_eq!(settings.log_level, None);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn deserialize_requires_credentials() {
        let result: Result<AmiSettings, _> = serde_json::from_str(r#"{"host": "10.0.0.1"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn validation() {
        let base = AmiSettings::new("pbx", 5038, "u", "p");
        assert!(base
            .clone()
            .with_ping(Duration::from_secs(3), Duration::from_secs(3))
            .validate()
            .is_err());
        assert!(base
            .clone()
            .with_ping(Duration::from_secs(3), Duration::from_secs(3))
            .with_keepalive(false)
            .validate()
            .is_ok());
        assert!(AmiSettings::new("", 5038, "u", "p")
            .validate()
            .is_err());
        assert!(AmiSettings::new("pbx", 0, "u", "p")
            .validate()
            .is_err());
        assert!(base
            .clone()
            .with_log_level("verbose")
            .validate()
            .is_err());
        assert!(base
            .with_log_level("debug")
            .validate()
            .is_ok());
    }

    #[test]
    fn debug_redacts_password() {
        let debug = format!("{:?}", AmiSettings::new("pbx", 5038, "admin", "hunter2"));
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn address_format() {
        assert_eq!(
            AmiSettings::new("127.0.0.1", 5038, "u", "p").address(),
            "127.0.0.1:5038"
        );
    }
}
