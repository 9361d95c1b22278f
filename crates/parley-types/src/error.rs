use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the session and delivery core.
///
/// The enum is `Clone` because a single renewal failure is handed to every
/// caller that was waiting on that renewal.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    /// Bad caller input. Never reaches the network.
    #[error("validation error: {0}")]
    Validation(String),

    /// Credentials rejected by the server, or credential renewal failed.
    #[error("authentication required: {0}")]
    Auth(String),

    /// Non-success status with the server-provided code and message.
    #[error("server error {status}{}: {message}", code_suffix(.code))]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },

    /// An `error` frame on the realtime channel answering one of our messages.
    #[error("server rejected message{}: {message}", code_suffix(.code))]
    Rejected {
        code: Option<String>,
        message: String,
    },

    #[error("network error: {0}")]
    Network(String),

    /// Malformed inbound realtime frame.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: String,
        after: Duration,
    },

    /// A realtime send was attempted outside the `Open` state.
    #[error("realtime connection is not open")]
    NotConnected,

    /// The durable session vault could not be read or written.
    #[error("storage error: {0}")]
    Storage(String),
}

fn code_suffix(code: &Option<String>) -> String {
    code.as_ref().map(|c| format!(" ({c})")).unwrap_or_default()
}

impl ClientError {
    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        ClientError::Timeout {
            operation: operation.into(),
            after,
        }
    }

    /// Whether re-invoking the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Network(_) | ClientError::Timeout { .. } | ClientError::NotConnected => {
                true
            }
            ClientError::Api { status, .. } => *status >= 500,
            ClientError::Validation(_)
            | ClientError::Auth(_)
            | ClientError::Rejected { .. }
            | ClientError::Protocol(_)
            | ClientError::Storage(_) => false,
        }
    }

    /// Whether this error means the session is no longer authenticated.
    pub fn is_auth(&self) -> bool {
        matches!(self, ClientError::Auth(_))
    }
}
