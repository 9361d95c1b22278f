//! The `{success, data?, error?, message?, timestamp}` response envelope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ClientError;

/// Error detail inside an envelope: either a bare code or a structured object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ApiErrorDetail {
    Code(String),
    Structured {
        #[serde(default)]
        code: Option<String>,
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        details: Option<serde_json::Value>,
    },
}

/// Response envelope shared by every REST endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiEnvelope<T> {
    #[serde(default = "default_success")]
    pub success: bool,
    pub data: Option<T>,
    #[serde(default)]
    pub error: Option<ApiErrorDetail>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

fn default_success() -> bool {
    true
}

impl<T> ApiEnvelope<T> {
    /// Server-provided `(code, message)`, falling back to `fallback` when absent.
    pub fn error_parts(&self, fallback: &str) -> (Option<String>, String) {
        match &self.error {
            Some(ApiErrorDetail::Code(code)) => (
                Some(code.clone()),
                self.message.clone().unwrap_or_else(|| code.clone()),
            ),
            Some(ApiErrorDetail::Structured { code, message, .. }) => (
                code.clone(),
                message
                    .clone()
                    .or_else(|| self.message.clone())
                    .unwrap_or_else(|| fallback.to_string()),
            ),
            None => (
                None,
                self.message.clone().unwrap_or_else(|| fallback.to_string()),
            ),
        }
    }

    /// Convert into the payload, mapping `success: false` to an API error.
    pub fn into_result(self, status: u16) -> Result<Option<T>, ClientError> {
        if self.success {
            return Ok(self.data);
        }
        let (code, message) = self.error_parts("request was not successful");
        Err(ClientError::Api {
            status,
            code,
            message,
        })
    }
}

/// Envelope for endpoints whose `data` is irrelevant (logout, password calls).
pub type Acknowledgement = ApiEnvelope<serde_json::Value>;
