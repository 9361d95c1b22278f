//! Infrastructure layer for Parley.
//!
//! Implements the ports defined in `parley-core`: the reqwest-backed HTTP
//! transport, the tokio-tungstenite realtime connector, and the OS keychain
//! and JSON-file session vaults. Also loads `config.toml` and resolves the
//! data directory.

pub mod config;
pub mod http;
pub mod realtime;
pub mod vault;
