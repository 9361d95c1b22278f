//! Client configuration loader for Parley.
//!
//! Reads `config.toml` from the data directory (`~/.parley/` in production)
//! and deserializes it into [`ClientConfig`]. Falls back to defaults when the
//! file is missing or malformed, then applies environment overrides.

use std::path::{Path, PathBuf};

use parley_types::config::ClientConfig;

/// Overrides `api_base_url`.
pub const API_URL_ENV: &str = "PARLEY_API_URL";
/// Overrides `realtime_url`.
pub const REALTIME_URL_ENV: &str = "PARLEY_REALTIME_URL";
/// Overrides the data directory.
pub const HOME_ENV: &str = "PARLEY_HOME";

/// Resolve the data directory: `$PARLEY_HOME`, else `~/.parley`.
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(HOME_ENV) {
        return PathBuf::from(dir);
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".parley");
    }

    // Last resort: current directory
    PathBuf::from(".parley")
}

/// Load configuration from `{data_dir}/config.toml` plus environment overrides.
pub async fn load_client_config(data_dir: &Path) -> ClientConfig {
    let config = read_config_file(data_dir).await;
    apply_overrides(config, |key| std::env::var(key).ok())
}

async fn read_config_file(data_dir: &Path) -> ClientConfig {
    let config_path = data_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return ClientConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return ClientConfig::default();
        }
    };

    match toml::from_str::<ClientConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            ClientConfig::default()
        }
    }
}

/// Apply URL overrides looked up through `lookup`. Empty values are ignored.
pub fn apply_overrides(
    mut config: ClientConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> ClientConfig {
    if let Some(url) = lookup(API_URL_ENV).filter(|v| !v.trim().is_empty()) {
        config.api_base_url = url.trim_end_matches('/').to_string();
    }
    if let Some(url) = lookup(REALTIME_URL_ENV).filter(|v| !v.trim().is_empty()) {
        config.realtime_url = url;
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = read_config_file(tmp.path()).await;
        assert_eq!(config, ClientConfig::default());
    }

    #[tokio::test]
    async fn valid_toml_is_parsed() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(
            tmp.path().join("config.toml"),
            r#"
api_base_url = "https://chat.example.com/api"
ack_timeout_secs = 5

[reconnect]
base_delay_ms = 250
max_attempts = 8
"#,
        )
        .await
        .unwrap();

        let config = read_config_file(tmp.path()).await;
        assert_eq!(config.api_base_url, "https://chat.example.com/api");
        assert_eq!(config.ack_timeout_secs, 5);
        assert_eq!(config.reconnect.base_delay_ms, 250);
        assert_eq!(config.reconnect.max_attempts, Some(8));
        assert_eq!(config.max_message_length, 1_000);
    }

    #[tokio::test]
    async fn invalid_toml_returns_default() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(tmp.path().join("config.toml"), "this is not { valid toml !!!")
            .await
            .unwrap();

        let config = read_config_file(tmp.path()).await;
        assert_eq!(config, ClientConfig::default());
    }

    #[test]
    fn overrides_replace_urls() {
        let config = apply_overrides(ClientConfig::default(), |key| match key {
            API_URL_ENV => Some("https://api.example.com/".to_string()),
            REALTIME_URL_ENV => Some("wss://rt.example.com/ws".to_string()),
            _ => None,
        });
        assert_eq!(config.api_base_url, "https://api.example.com");
        assert_eq!(config.realtime_url, "wss://rt.example.com/ws");
    }

    #[test]
    fn empty_override_is_ignored() {
        let config = apply_overrides(ClientConfig::default(), |_| Some("  ".to_string()));
        assert_eq!(config, ClientConfig::default());
    }
}
