//! In-memory owner of the access/refresh credential pair.
//!
//! The store is an explicit instance passed by `Arc` to whoever needs it, so
//! independent sessions (and tests) never share credentials. Every mutation
//! swaps the whole session under a write lock and mirrors it to the
//! [`SessionVault`]; readers never see a partially updated pair.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use parley_types::auth::{AuthPayload, SessionDescriptor, TokenClaims, TokenPair, User};
use tracing::{debug, info, warn};

use super::vault::{MemoryVault, PersistedSession, SessionVault};

#[derive(Debug, Default)]
struct StoreState {
    current: Option<PersistedSession>,
    /// Bumped by every `clear()`.
    epoch: u64,
}

/// Holds the current credentials and answers validity questions about them.
pub struct CredentialStore {
    state: RwLock<StoreState>,
    vault: Arc<dyn SessionVault>,
}

impl CredentialStore {
    pub fn new(vault: Arc<dyn SessionVault>) -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            vault,
        }
    }

    /// A store whose durable copy lives only in process memory.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryVault::new()))
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mirror `current` to the vault. Called with the write lock held so the
    /// durable copy follows the same order as in-memory updates.
    fn persist(&self, current: Option<&PersistedSession>) {
        let result = match current {
            Some(session) => self.vault.save(session),
            None => self.vault.clear(),
        };
        if let Err(err) = result {
            warn!(vault = self.vault.name(), error = %err, "Failed to mirror session to vault");
        }
    }

    /// Load a persisted session written by a previous process.
    ///
    /// The session is installed only if it is still usable: an unexpired
    /// session descriptor, or (without a descriptor) a still-valid access
    /// token. Stale documents are removed from the vault. Returns whether a
    /// session was restored.
    pub fn restore(&self) -> bool {
        let persisted = match self.vault.load() {
            Ok(Some(persisted)) => persisted,
            Ok(None) => return false,
            Err(err) => {
                warn!(vault = self.vault.name(), error = %err, "Failed to load persisted session");
                return false;
            }
        };

        let now = Utc::now();
        let usable = match &persisted.session {
            Some(session) => !session.is_expired_at(now),
            None => token_valid_at(&persisted.tokens.access_token, now),
        };

        let mut state = self.write();
        if !usable {
            debug!(vault = self.vault.name(), "Discarding expired persisted session");
            self.persist(None);
            return false;
        }

        info!(vault = self.vault.name(), "Restored persisted session");
        state.current = Some(persisted);
        true
    }

    /// Replace the credentials, session and cached user from an auth payload.
    pub fn set_credentials(&self, payload: &AuthPayload) {
        let mut state = self.write();
        let session = PersistedSession {
            tokens: payload.tokens.clone(),
            session: Some(payload.session.clone()),
            user: Some(payload.user.clone()),
        };
        self.persist(Some(&session));
        state.current = Some(session);
    }

    /// Install `payload` only if no `clear()` happened since `epoch` was read.
    ///
    /// Returns false (and changes nothing) when the store was cleared in the
    /// meantime, e.g. by a logout racing a credential renewal.
    pub fn set_credentials_if_epoch(&self, epoch: u64, payload: &AuthPayload) -> bool {
        let mut state = self.write();
        if state.epoch != epoch {
            let actual = state.epoch;
            debug!(expected = epoch, actual, "Ignoring credentials from a stale session");
            return false;
        }
        let session = PersistedSession {
            tokens: payload.tokens.clone(),
            session: Some(payload.session.clone()),
            user: Some(payload.user.clone()),
        };
        self.persist(Some(&session));
        state.current = Some(session);
        true
    }

    /// Update the cached user profile, keeping the credentials.
    pub fn set_user(&self, user: User) {
        let mut state = self.write();
        let Some(mut session) = state.current.clone() else {
            return;
        };
        session.user = Some(user);
        self.persist(Some(&session));
        state.current = Some(session);
    }

    /// Erase credentials, session and cached user, in memory and on disk.
    pub fn clear(&self) {
        let mut state = self.write();
        state.epoch += 1;
        state.current = None;
        self.persist(None);
    }

    /// Clear only if no other `clear()` happened since `epoch` was read and
    /// there is something to clear.
    pub fn clear_if_epoch(&self, epoch: u64) -> bool {
        let mut state = self.write();
        if state.epoch != epoch || state.current.is_none() {
            return false;
        }
        state.epoch += 1;
        state.current = None;
        self.persist(None);
        true
    }

    pub fn epoch(&self) -> u64 {
        self.read().epoch
    }

    pub fn tokens(&self) -> Option<TokenPair> {
        self.read().current.as_ref().map(|s| s.tokens.clone())
    }

    pub fn access_token(&self) -> Option<String> {
        self.read()
            .current
            .as_ref()
            .map(|s| s.tokens.access_token.clone())
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.read()
            .current
            .as_ref()
            .map(|s| s.tokens.refresh_token.clone())
    }

    pub fn session(&self) -> Option<SessionDescriptor> {
        self.read().current.as_ref().and_then(|s| s.session.clone())
    }

    pub fn cached_user(&self) -> Option<User> {
        self.read().current.as_ref().and_then(|s| s.user.clone())
    }

    pub fn has_credentials(&self) -> bool {
        self.read().current.is_some()
    }

    /// True iff an access token is held and now is strictly before its
    /// decoded expiry. Undecodable tokens are invalid.
    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        match self.access_token() {
            Some(token) => token_valid_at(&token, now),
            None => false,
        }
    }
}

fn token_valid_at(token: &str, now: DateTime<Utc>) -> bool {
    match TokenClaims::decode_unverified(token) {
        Ok(claims) => claims.is_valid_at(now),
        Err(err) => {
            debug!(error = %err, "Access token could not be decoded");
            false
        }
    }
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.read();
        f.debug_struct("CredentialStore")
            .field("authenticated", &state.current.is_some())
            .field("epoch", &state.epoch)
            .field("vault", &self.vault.name())
            .finish()
    }
}
