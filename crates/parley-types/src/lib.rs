//! Shared wire and domain types for Parley.
//!
//! Credentials, user profiles, the REST response envelope, chat records,
//! realtime frames and the client error taxonomy. No I/O lives here --
//! only serde, uuid, chrono, base64 and thiserror.

pub mod auth;
pub mod chat;
pub mod config;
pub mod envelope;
pub mod error;
pub mod frame;
pub mod session;

pub use error::ClientError;
