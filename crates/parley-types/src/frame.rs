//! Realtime JSON frames and the decoded inbound event union.
//!
//! Every frame on the wire is
//! `{type, data|content, conversationId?, userId?, correlationId?, timestamp}`.
//! Inbound frames are decoded once into [`InboundEvent`]; consumers match on
//! the enum instead of comparing type strings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::chat::{Conversation, ServerMessage};
use crate::error::ClientError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameType {
    ChatMessage,
    TypingStart,
    TypingStop,
    Error,
}

/// A frame as it travels over the realtime connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeFrame {
    #[serde(rename = "type")]
    pub frame_type: FrameType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl RealtimeFrame {
    fn bare(frame_type: FrameType, conversation_id: Option<String>) -> Self {
        Self {
            frame_type,
            data: None,
            content: None,
            conversation_id,
            user_id: None,
            correlation_id: None,
            timestamp: Utc::now(),
        }
    }

    /// Outbound chat message tagged with its correlation id.
    pub fn chat_message(
        content: impl Into<String>,
        conversation_id: Option<String>,
        correlation_id: Uuid,
    ) -> Self {
        Self {
            content: Some(content.into()),
            correlation_id: Some(correlation_id),
            ..Self::bare(FrameType::ChatMessage, conversation_id)
        }
    }

    pub fn typing_start(conversation_id: impl Into<String>) -> Self {
        Self::bare(FrameType::TypingStart, Some(conversation_id.into()))
    }

    pub fn typing_stop(conversation_id: impl Into<String>) -> Self {
        Self::bare(FrameType::TypingStop, Some(conversation_id.into()))
    }

    pub fn to_json(&self) -> Result<String, ClientError> {
        serde_json::to_string(self)
            .map_err(|e| ClientError::Protocol(format!("failed to encode frame: {e}")))
    }
}

/// `data` of an inbound `chat_message` frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatMessageData {
    #[serde(default)]
    correlation_id: Option<Uuid>,
    #[serde(default)]
    conversation: Option<Conversation>,
    #[serde(default)]
    user_message: Option<ServerMessage>,
    #[serde(default)]
    ai_message: Option<ServerMessage>,
}

/// `data` of an inbound `error` frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorData {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    correlation_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessageEvent {
    pub conversation_id: Option<String>,
    pub correlation_id: Option<Uuid>,
    pub user_message: Option<ServerMessage>,
    pub ai_message: Option<ServerMessage>,
    /// Plain text body, for servers that push bare content.
    pub content: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingEvent {
    pub conversation_id: Option<String>,
    pub user_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorEvent {
    pub conversation_id: Option<String>,
    pub correlation_id: Option<Uuid>,
    pub code: Option<String>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// A decoded inbound realtime frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    ChatMessage(ChatMessageEvent),
    TypingStart(TypingEvent),
    TypingStop(TypingEvent),
    Error(ErrorEvent),
}

impl InboundEvent {
    /// Decode a text frame. Unknown types and malformed JSON are protocol errors.
    pub fn parse(text: &str) -> Result<Self, ClientError> {
        let frame: RealtimeFrame = serde_json::from_str(text)
            .map_err(|e| ClientError::Protocol(format!("malformed frame: {e}")))?;
        Self::try_from(frame)
    }

    pub fn conversation_id(&self) -> Option<&str> {
        match self {
            InboundEvent::ChatMessage(e) => e.conversation_id.as_deref(),
            InboundEvent::TypingStart(e) | InboundEvent::TypingStop(e) => {
                e.conversation_id.as_deref()
            }
            InboundEvent::Error(e) => e.conversation_id.as_deref(),
        }
    }

    pub fn correlation_id(&self) -> Option<Uuid> {
        match self {
            InboundEvent::ChatMessage(e) => e.correlation_id,
            InboundEvent::Error(e) => e.correlation_id,
            InboundEvent::TypingStart(_) | InboundEvent::TypingStop(_) => None,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            InboundEvent::ChatMessage(e) => e.timestamp,
            InboundEvent::TypingStart(e) | InboundEvent::TypingStop(e) => e.timestamp,
            InboundEvent::Error(e) => e.timestamp,
        }
    }

    pub fn kind(&self) -> FrameType {
        match self {
            InboundEvent::ChatMessage(_) => FrameType::ChatMessage,
            InboundEvent::TypingStart(_) => FrameType::TypingStart,
            InboundEvent::TypingStop(_) => FrameType::TypingStop,
            InboundEvent::Error(_) => FrameType::Error,
        }
    }
}

fn decode_data<T: Default + for<'de> Deserialize<'de>>(
    data: Option<serde_json::Value>,
    kind: &str,
) -> Result<T, ClientError> {
    match data {
        None | Some(serde_json::Value::Null) => Ok(T::default()),
        Some(value) => serde_json::from_value(value)
            .map_err(|e| ClientError::Protocol(format!("malformed {kind} data: {e}"))),
    }
}

impl TryFrom<RealtimeFrame> for InboundEvent {
    type Error = ClientError;

    fn try_from(frame: RealtimeFrame) -> Result<Self, ClientError> {
        match frame.frame_type {
            FrameType::ChatMessage => {
                let data: ChatMessageData = decode_data(frame.data, "chat_message")?;
                let empty = data.ai_message.is_none() && data.user_message.is_none();
                if empty && frame.content.is_none() {
                    return Err(ClientError::Protocol(
                        "chat_message frame carries neither messages nor content".to_string(),
                    ));
                }
                let conversation_id = frame
                    .conversation_id
                    .or_else(|| data.conversation.as_ref().map(|c| c.id.clone()))
                    .or_else(|| data.ai_message.as_ref().map(|m| m.conversation_id.clone()))
                    .or_else(|| data.user_message.as_ref().map(|m| m.conversation_id.clone()));
                Ok(InboundEvent::ChatMessage(ChatMessageEvent {
                    conversation_id,
                    correlation_id: frame.correlation_id.or(data.correlation_id),
                    user_message: data.user_message,
                    ai_message: data.ai_message,
                    content: frame.content,
                    timestamp: frame.timestamp,
                }))
            }
            FrameType::TypingStart | FrameType::TypingStop => {
                let event = TypingEvent {
                    conversation_id: frame.conversation_id,
                    user_id: frame.user_id,
                    timestamp: frame.timestamp,
                };
                Ok(if frame.frame_type == FrameType::TypingStart {
                    InboundEvent::TypingStart(event)
                } else {
                    InboundEvent::TypingStop(event)
                })
            }
            FrameType::Error => {
                let data: ErrorData = decode_data(frame.data, "error")?;
                let message = data
                    .message
                    .or(frame.content)
                    .unwrap_or_else(|| "unspecified server error".to_string());
                Ok(InboundEvent::Error(ErrorEvent {
                    conversation_id: frame.conversation_id,
                    correlation_id: frame.correlation_id.or(data.correlation_id),
                    code: data.code,
                    message,
                    timestamp: frame.timestamp,
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::MessageRole;

    #[test]
    fn outbound_chat_message_shape() {
        let id = Uuid::now_v7();
        let frame = RealtimeFrame::chat_message("Hello", Some("c1".into()), id);
        let json: serde_json::Value = serde_json::from_str(&frame.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "chat_message");
        assert_eq!(json["content"], "Hello");
        assert_eq!(json["conversationId"], "c1");
        assert_eq!(json["correlationId"], id.to_string());
        assert!(json.get("timestamp").is_some());
        assert!(json.get("data").is_none());
    }

    #[test]
    fn typing_frames_carry_conversation() {
        let json = RealtimeFrame::typing_start("c9").to_json().unwrap();
        assert!(json.contains("\"type\":\"typing_start\""));
        assert!(json.contains("\"conversationId\":\"c9\""));
        let json = RealtimeFrame::typing_stop("c9").to_json().unwrap();
        assert!(json.contains("\"type\":\"typing_stop\""));
    }

    #[test]
    fn parses_correlated_chat_message() {
        let id = Uuid::now_v7();
        let text = format!(
            r#"{{
                "type": "chat_message",
                "correlationId": "{id}",
                "data": {{
                    "aiMessage": {{
                        "id": "m2",
                        "conversationId": "c1",
                        "role": "assistant",
                        "content": "Hi",
                        "createdAt": "2026-01-01T00:00:00Z"
                    }}
                }},
                "timestamp": "2026-01-01T00:00:00Z"
            }}"#
        );
        let event = InboundEvent::parse(&text).unwrap();
        assert_eq!(event.kind(), FrameType::ChatMessage);
        assert_eq!(event.correlation_id(), Some(id));
        assert_eq!(event.conversation_id(), Some("c1"));
        match event {
            InboundEvent::ChatMessage(e) => {
                assert_eq!(e.ai_message.unwrap().role, MessageRole::Assistant);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn correlation_id_may_live_in_data() {
        let id = Uuid::now_v7();
        let text = format!(
            r#"{{"type":"chat_message","content":"hey","data":{{"correlationId":"{id}"}},
                "timestamp":"2026-01-01T00:00:00Z"}}"#
        );
        assert_eq!(InboundEvent::parse(&text).unwrap().correlation_id(), Some(id));
    }

    #[test]
    fn parses_typing_and_error_frames() {
        let start = InboundEvent::parse(
            r#"{"type":"typing_start","conversationId":"c1","userId":"u2",
                "timestamp":"2026-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert!(matches!(
            start,
            InboundEvent::TypingStart(ref e) if e.user_id.as_deref() == Some("u2")
        ));

        let err = InboundEvent::parse(
            r#"{"type":"error","data":{"code":"RATE_LIMITED","message":"slow down"},
                "timestamp":"2026-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        match err {
            InboundEvent::Error(e) => {
                assert_eq!(e.code.as_deref(), Some("RATE_LIMITED"));
                assert_eq!(e.message, "slow down");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn error_frame_falls_back_to_content() {
        let err = InboundEvent::parse(r#"{"type":"error","content":"nope"}"#).unwrap();
        assert!(matches!(err, InboundEvent::Error(ref e) if e.message == "nope"));
    }

    #[test]
    fn typed_frame_converts_without_reparsing() {
        let frame = RealtimeFrame::typing_start("c1");
        let event = InboundEvent::try_from(frame).unwrap();
        assert_eq!(event.kind(), FrameType::TypingStart);
        assert_eq!(event.conversation_id(), Some("c1"));

        let outbound = RealtimeFrame::bare(FrameType::ChatMessage, Some("c1".into()));
        let err = InboundEvent::try_from(outbound).unwrap_err();
        assert!(matches!(err, ClientError::Protocol(_)));
    }

    #[test]
    fn malformed_frames_are_protocol_errors() {
        for text in [
            "not json",
            r#"{"type":"presence"}"#,
            r#"{"content":"missing type"}"#,
            r#"{"type":"chat_message"}"#,
            r#"{"type":"chat_message","data":{"aiMessage":"oops"}}"#,
        ] {
            let err = InboundEvent::parse(text).unwrap_err();
            assert!(matches!(err, ClientError::Protocol(_)), "{text} -> {err:?}");
        }
    }
}
