//! Client configuration types.
//!
//! `ClientConfig` mirrors `config.toml` in the data directory. Every field has
//! a default so an empty or missing file yields a usable configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration for the chat client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL for REST calls, without a trailing slash.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Realtime (WebSocket) endpoint.
    #[serde(default = "default_realtime_url")]
    pub realtime_url: String,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Upper bound on a single realtime handshake.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Upper bound on a credential renewal call.
    #[serde(default = "default_refresh_timeout_secs")]
    pub refresh_timeout_secs: u64,

    /// How long a realtime send waits for its correlated acknowledgement.
    #[serde(default = "default_ack_timeout_secs")]
    pub ack_timeout_secs: u64,

    /// Idle time after which an armed typing indicator sends `typing_stop`.
    #[serde(default = "default_typing_timeout_ms")]
    pub typing_timeout_ms: u64,

    /// Maximum message length in characters.
    #[serde(default = "default_max_message_length")]
    pub max_message_length: usize,

    /// Consecutive malformed frames tolerated before the link is recycled.
    #[serde(default = "default_protocol_error_threshold")]
    pub protocol_error_threshold: u32,

    /// Capacity of the broadcast buses (inbound events, log changes).
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

/// Exponential backoff settings for the realtime connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Ceiling for the delay between attempts.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Give up (and close) after this many attempts. `None` retries forever.
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

fn default_api_base_url() -> String {
    "http://localhost:3001/api".to_string()
}

fn default_realtime_url() -> String {
    "ws://localhost:3001/ws".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_refresh_timeout_secs() -> u64 {
    10
}

fn default_ack_timeout_secs() -> u64 {
    30
}

fn default_typing_timeout_ms() -> u64 {
    3_000
}

fn default_max_message_length() -> usize {
    1_000
}

fn default_protocol_error_threshold() -> u32 {
    5
}

fn default_event_buffer() -> usize {
    1_024
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: None,
        }
    }
}

impl ReconnectConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms.max(self.base_delay_ms))
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            realtime_url: default_realtime_url(),
            request_timeout_secs: default_request_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            refresh_timeout_secs: default_refresh_timeout_secs(),
            ack_timeout_secs: default_ack_timeout_secs(),
            typing_timeout_ms: default_typing_timeout_ms(),
            max_message_length: default_max_message_length(),
            protocol_error_threshold: default_protocol_error_threshold(),
            event_buffer: default_event_buffer(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_secs(self.refresh_timeout_secs)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_secs(self.ack_timeout_secs)
    }

    pub fn typing_timeout(&self) -> Duration {
        Duration::from_millis(self.typing_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_config_default_values() {
        let config = ClientConfig::default();
        assert_eq!(config.max_message_length, 1_000);
        assert_eq!(config.typing_timeout(), Duration::from_secs(3));
        assert_eq!(config.reconnect.base_delay(), Duration::from_secs(1));
        assert_eq!(config.reconnect.max_delay(), Duration::from_secs(30));
        assert!(config.reconnect.max_attempts.is_none());
    }

    #[test]
    fn test_client_config_deserialize_with_defaults() {
        let config: ClientConfig = toml::from_str("").unwrap();
        assert_eq!(config, ClientConfig::default());
    }

    #[test]
    fn test_client_config_deserialize_with_values() {
        let toml_str = r#"
api_base_url = "https://chat.example.com/api"
realtime_url = "wss://chat.example.com/ws"
max_message_length = 500

[reconnect]
base_delay_ms = 250
max_attempts = 8
"#;
        let config: ClientConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.api_base_url, "https://chat.example.com/api");
        assert_eq!(config.max_message_length, 500);
        assert_eq!(config.reconnect.base_delay_ms, 250);
        assert_eq!(config.reconnect.max_delay_ms, 30_000);
        assert_eq!(config.reconnect.max_attempts, Some(8));
        assert_eq!(config.connect_timeout_secs, 10);
    }

    #[test]
    fn test_max_delay_never_below_base() {
        let reconnect = ReconnectConfig {
            base_delay_ms: 5_000,
            max_delay_ms: 1_000,
            max_attempts: None,
        };
        assert_eq!(reconnect.max_delay(), Duration::from_secs(5));
    }
}
