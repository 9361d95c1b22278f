//! OS keychain session vault.
//!
//! Uses the `keyring` crate to store the persisted session via:
//! - macOS Keychain
//! - Linux Secret Service (GNOME Keyring, KDE Wallet)
//! - Windows Credential Manager
//!
//! The whole session is one JSON document under a single entry, so a save
//! or clear replaces tokens, session and cached user together.

use parley_core::credential::{PersistedSession, SessionVault};
use parley_types::ClientError;

/// Keychain entry name holding the session document.
const ENTRY_NAME: &str = "session";

pub struct KeychainVault {
    service_name: String,
}

impl KeychainVault {
    /// Vault under the default service name "parley".
    pub fn new() -> Self {
        Self {
            service_name: "parley".to_string(),
        }
    }

    /// Vault under a custom service name (separate profiles, tests).
    pub fn with_service(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    fn entry(&self) -> Result<keyring::Entry, ClientError> {
        keyring::Entry::new(&self.service_name, ENTRY_NAME)
            .map_err(|e| ClientError::Storage(format!("keychain entry error: {e}")))
    }
}

impl Default for KeychainVault {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionVault for KeychainVault {
    fn name(&self) -> &str {
        "keychain"
    }

    fn load(&self) -> Result<Option<PersistedSession>, ClientError> {
        let document = match self.entry()?.get_password() {
            Ok(document) => document,
            Err(keyring::Error::NoEntry) => return Ok(None),
            Err(e) => return Err(ClientError::Storage(format!("keychain get error: {e}"))),
        };
        serde_json::from_str(&document)
            .map(Some)
            .map_err(|e| ClientError::Storage(format!("keychain session is corrupt: {e}")))
    }

    fn save(&self, session: &PersistedSession) -> Result<(), ClientError> {
        let document = serde_json::to_string(session)
            .map_err(|e| ClientError::Storage(format!("failed to encode session: {e}")))?;
        self.entry()?
            .set_password(&document)
            .map_err(|e| ClientError::Storage(format!("keychain set error: {e}")))
    }

    fn clear(&self) -> Result<(), ClientError> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(ClientError::Storage(format!("keychain delete error: {e}"))),
        }
    }
}

impl std::fmt::Debug for KeychainVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeychainVault")
            .field("service_name", &self.service_name)
            .finish()
    }
}
