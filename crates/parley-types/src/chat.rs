//! Chat message records: optimistic outbound messages, server-confirmed
//! messages, and the fallback send endpoint's request/response shapes.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Delivery status of a locally created message.
///
/// Status only moves forward: `Pending -> Sent -> Acknowledged`, or from
/// `Pending`/`Sent` to `Failed`. `Acknowledged` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Sent,
    Acknowledged,
    Failed,
}

impl MessageStatus {
    /// Whether moving from `self` to `next` respects the forward-only order.
    pub fn can_transition_to(self, next: MessageStatus) -> bool {
        use MessageStatus::*;
        matches!(
            (self, next),
            (Pending, Sent)
                | (Pending, Acknowledged)
                | (Sent, Acknowledged)
                | (Pending, Failed)
                | (Sent, Failed)
        )
    }

    /// Still waiting on the server.
    pub fn is_outstanding(self) -> bool {
        matches!(self, MessageStatus::Pending | MessageStatus::Sent)
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageStatus::Pending => write!(f, "pending"),
            MessageStatus::Sent => write!(f, "sent"),
            MessageStatus::Acknowledged => write!(f, "acknowledged"),
            MessageStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Author of a server-confirmed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::System => write!(f, "system"),
        }
    }
}

impl FromStr for MessageRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(MessageRole::User),
            "assistant" | "ai" | "bot" => Ok(MessageRole::Assistant),
            "system" => Ok(MessageRole::System),
            other => Err(format!("invalid message role: '{other}'")),
        }
    }
}

/// A message created locally and shown before the server confirms it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Client-generated id used to match the server's confirmation.
    pub correlation_id: Uuid,
    pub content: String,
    /// Unknown until the first server response for a new conversation.
    pub conversation_id: Option<String>,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
    /// Why delivery failed (only set when `status == Failed`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl OutboundMessage {
    pub fn pending(content: String, conversation_id: Option<String>) -> Self {
        Self {
            correlation_id: Uuid::now_v7(),
            content,
            conversation_id,
            status: MessageStatus::Pending,
            created_at: Utc::now(),
            failure: None,
        }
    }
}

/// A message as stored by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    pub id: String,
    pub conversation_id: String,
    pub role: MessageRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Client context attached to a fallback send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageContext {
    pub correlation_id: Uuid,
    pub client_sent_at: DateTime<Utc>,
}

/// Body of the fallback message-send endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    pub context: MessageContext,
}

impl SendMessageRequest {
    pub fn from_outbound(message: &OutboundMessage) -> Self {
        Self {
            content: message.content.clone(),
            conversation_id: message.conversation_id.clone(),
            context: MessageContext {
                correlation_id: message.correlation_id,
                client_sent_at: message.created_at,
            },
        }
    }
}

/// `{conversation, userMessage, aiMessage}` returned by the fallback endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageResponse {
    pub conversation: Conversation,
    pub user_message: ServerMessage,
    pub ai_message: ServerMessage,
}

/// One entry of the local message log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogRecord {
    /// Locally created, possibly not yet confirmed.
    Outbound(OutboundMessage),
    /// Confirmed by the server.
    Confirmed(ServerMessage),
}

impl LogRecord {
    pub fn correlation_id(&self) -> Option<Uuid> {
        match self {
            LogRecord::Outbound(msg) => Some(msg.correlation_id),
            LogRecord::Confirmed(_) => None,
        }
    }

    pub fn server_id(&self) -> Option<&str> {
        match self {
            LogRecord::Outbound(_) => None,
            LogRecord::Confirmed(msg) => Some(&msg.id),
        }
    }

    pub fn content(&self) -> &str {
        match self {
            LogRecord::Outbound(msg) => &msg.content,
            LogRecord::Confirmed(msg) => &msg.content,
        }
    }
}

/// Change notification published by the message log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum LogChange {
    /// A record was appended.
    Added { record: LogRecord },
    /// An outbound record changed status.
    StatusChanged {
        correlation_id: Uuid,
        status: MessageStatus,
    },
    /// An outbound record was replaced by its server-confirmed counterparts.
    Reconciled {
        correlation_id: Uuid,
        confirmed: Vec<ServerMessage>,
    },
    /// A failed record was withdrawn (e.g. before a retry).
    Removed { correlation_id: Uuid },
    /// Every record was dropped because the session ended.
    Cleared,
}

/// Which path carried a message to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryChannel {
    Realtime,
    Rest,
}

impl fmt::Display for DeliveryChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryChannel::Realtime => write!(f, "realtime"),
            DeliveryChannel::Rest => write!(f, "rest"),
        }
    }
}

/// Outcome of a successful delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    pub correlation_id: Uuid,
    pub channel: DeliveryChannel,
    pub conversation_id: Option<String>,
    /// The assistant's reply, when the server returned one.
    pub reply: Option<ServerMessage>,
}
