//! SessionVault trait: durable client-side storage for the session.
//!
//! Implementations live in parley-infra (OS keychain, JSON file). The
//! in-memory [`MemoryVault`] here backs tests and ephemeral sessions.

use std::sync::Mutex;

use parley_types::auth::{SessionDescriptor, TokenPair, User};
use parley_types::ClientError;
use serde::{Deserialize, Serialize};

/// Everything persisted for a signed-in session, written as one document.
///
/// Field names are the fixed storage keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedSession {
    #[serde(rename = "parley.auth_tokens")]
    pub tokens: TokenPair,
    #[serde(rename = "parley.session", default)]
    pub session: Option<SessionDescriptor>,
    #[serde(rename = "parley.user", default)]
    pub user: Option<User>,
}

/// Durable storage for the persisted session.
///
/// Writes replace the whole document so readers never see a mix of old and
/// new credentials.
pub trait SessionVault: Send + Sync {
    /// Human-readable backend name for logs.
    fn name(&self) -> &str;

    fn load(&self) -> Result<Option<PersistedSession>, ClientError>;

    fn save(&self, session: &PersistedSession) -> Result<(), ClientError>;

    /// Remove the stored document. Clearing an empty vault is not an error.
    fn clear(&self) -> Result<(), ClientError>;
}

/// Vault that keeps the document in process memory.
#[derive(Debug, Default)]
pub struct MemoryVault {
    slot: Mutex<Option<PersistedSession>>,
}

impl MemoryVault {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(session: PersistedSession) -> Self {
        Self {
            slot: Mutex::new(Some(session)),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Option<PersistedSession>>, ClientError> {
        self.slot
            .lock()
            .map_err(|_| ClientError::Storage("memory vault lock poisoned".to_string()))
    }
}

impl SessionVault for MemoryVault {
    fn name(&self) -> &str {
        "memory"
    }

    fn load(&self) -> Result<Option<PersistedSession>, ClientError> {
        Ok(self.lock()?.clone())
    }

    fn save(&self, session: &PersistedSession) -> Result<(), ClientError> {
        *self.lock()? = Some(session.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), ClientError> {
        *self.lock()? = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample() -> PersistedSession {
        PersistedSession {
            tokens: TokenPair {
                access_token: "a".into(),
                refresh_token: "r".into(),
                token_type: "Bearer".into(),
                expires_at: Utc::now(),
            },
            session: None,
            user: None,
        }
    }

    #[test]
    fn memory_vault_roundtrip_and_clear() {
        let vault = MemoryVault::new();
        assert!(vault.load().unwrap().is_none());

        let session = sample();
        vault.save(&session).unwrap();
        assert_eq!(vault.load().unwrap(), Some(session));

        vault.clear().unwrap();
        vault.clear().unwrap();
        assert!(vault.load().unwrap().is_none());
    }

    #[test]
    fn persisted_session_uses_fixed_keys() {
        let json = serde_json::to_value(sample()).unwrap();
        assert!(json.get("parley.auth_tokens").is_some());
        assert!(json.get("parley.session").is_some());
        assert!(json.get("parley.user").is_some());
    }
}
