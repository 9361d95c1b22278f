//! Session, realtime connection and message delivery logic for Parley.
//!
//! This crate defines the ports (`HttpTransport`, `RealtimeConnector`,
//! `SessionVault`) that `parley-infra` implements. It depends only on
//! `parley-types` -- never on an HTTP client, a WebSocket library, the OS
//! keychain or the filesystem.

pub mod client;
pub mod credential;
pub mod delivery;
pub mod event;
pub mod realtime;
pub mod session;
pub mod typing;

#[cfg(test)]
mod test_support;

pub use client::ChatClient;
pub use credential::{CredentialStore, MemoryVault, PersistedSession, SessionVault};
pub use delivery::{MessageDeliveryCoordinator, MessageLog};
pub use realtime::{FrameSink, FrameSource, RealtimeConnection, RealtimeConnector};
pub use session::{ApiRequest, ApiResponse, HttpMethod, HttpTransport, SessionGateway};
pub use typing::TypingSignal;
