//! Authenticated REST access and the credential renewal protocol.

pub mod gateway;
mod renewal;
pub mod transport;

pub use gateway::{AccessTokenSource, SessionGateway, TokenFuture};
pub use transport::{ApiRequest, ApiResponse, HttpMethod, HttpTransport};
