//! Durable [`SessionVault`](parley_core::credential::SessionVault) backends.

pub mod file;
pub mod keychain;

pub use file::FileVault;
pub use keychain::KeychainVault;
