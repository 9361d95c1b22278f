//! Credential ownership: the in-memory store and its durable vault port.

pub mod store;
pub mod vault;

pub use store::CredentialStore;
pub use vault::{MemoryVault, PersistedSession, SessionVault};
