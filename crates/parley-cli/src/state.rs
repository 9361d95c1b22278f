//! Application state wiring the client together.
//!
//! `AppState` pins the generic `ChatClient` to the concrete infra adapters
//! and remembers where the session lives.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use parley_core::{ChatClient, SessionVault};
use parley_infra::config::{load_client_config, resolve_data_dir};
use parley_infra::http::ReqwestTransport;
use parley_infra::realtime::WebSocketConnector;
use parley_infra::vault::{FileVault, KeychainVault};
use parley_types::session::ConnectionState;

pub type ConcreteClient = ChatClient<ReqwestTransport, WebSocketConnector>;

/// Where the persisted session is kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VaultLocation {
    File(PathBuf),
    Keychain,
}

impl std::fmt::Display for VaultLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VaultLocation::File(path) => write!(f, "{}", path.display()),
            VaultLocation::Keychain => write!(f, "OS keychain"),
        }
    }
}

pub struct AppState {
    pub client: ConcreteClient,
    pub data_dir: PathBuf,
    pub vault: VaultLocation,
}

impl AppState {
    /// Resolve the data directory, load config, build the client and
    /// restore any persisted session.
    pub async fn init(use_keychain: bool) -> anyhow::Result<Self> {
        let data_dir = resolve_data_dir();
        tokio::fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

        let config = load_client_config(&data_dir).await;

        let (vault, location): (Arc<dyn SessionVault>, VaultLocation) = if use_keychain {
            (Arc::new(KeychainVault::new()), VaultLocation::Keychain)
        } else {
            let file_vault = FileVault::new(&data_dir);
            let path = file_vault.path().to_path_buf();
            (Arc::new(file_vault), VaultLocation::File(path))
        };

        let transport = ReqwestTransport::new(&config).context("failed to build HTTP client")?;
        let client = ChatClient::new(config, transport, WebSocketConnector::new(), vault);
        if client.restore() {
            tracing::debug!("Restored persisted session");
        }

        Ok(Self {
            client,
            data_dir,
            vault: location,
        })
    }

    /// Fail with a hint when no session is stored.
    pub fn require_session(&self) -> anyhow::Result<()> {
        if self.client.is_authenticated() {
            Ok(())
        } else {
            anyhow::bail!("not signed in. Run `parley login` first")
        }
    }

    /// Start the realtime link and wait up to the connect timeout for it to
    /// open. Returns whether it did; the link keeps retrying either way.
    pub async fn open_realtime(&self) -> anyhow::Result<bool> {
        self.require_session()?;
        self.client.connect()?;

        let mut state = self.client.watch_state();
        let wait = async {
            loop {
                if *state.borrow_and_update() == ConnectionState::Open {
                    return true;
                }
                if state.changed().await.is_err() {
                    return false;
                }
            }
        };
        let limit = self.client.config().connect_timeout();
        Ok(tokio::time::timeout(limit, wait).await.unwrap_or(false))
    }
}
