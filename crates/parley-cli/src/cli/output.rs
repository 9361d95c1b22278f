//! Shared terminal formatting for command output.

use console::style;
use parley_types::chat::{LogRecord, MessageRole, MessageStatus, ServerMessage};
use parley_types::frame::InboundEvent;
use parley_types::session::ConnectionState;

/// Print a value as pretty JSON on stdout.
pub fn print_json(value: &serde_json::Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn success(message: impl std::fmt::Display) {
    println!("  {} {message}", style("✓").green().bold());
}

pub fn notice(message: impl std::fmt::Display) {
    println!("  {} {message}", style("i").blue().bold());
}

pub fn warning(message: impl std::fmt::Display) {
    eprintln!("  {} {message}", style("!").yellow().bold());
}

pub fn role_label(role: MessageRole) -> String {
    match role {
        MessageRole::User => format!("{}", style("You").green().bold()),
        MessageRole::Assistant => format!("{}", style("Assistant").cyan().bold()),
        MessageRole::System => format!("{}", style("System").dim()),
    }
}

pub fn status_label(status: MessageStatus) -> String {
    match status {
        MessageStatus::Pending => format!("{}", style("pending").dim()),
        MessageStatus::Sent => format!("{}", style("sent").blue()),
        MessageStatus::Acknowledged => format!("{}", style("delivered").green()),
        MessageStatus::Failed => format!("{}", style("failed").red()),
    }
}

pub fn state_label(state: ConnectionState) -> String {
    match state {
        ConnectionState::Open => format!("{}", style(state).green()),
        ConnectionState::Connecting | ConnectionState::Reconnecting => {
            format!("{}", style(state).yellow())
        }
        ConnectionState::Idle | ConnectionState::Closed => format!("{}", style(state).dim()),
    }
}

pub fn server_message_line(message: &ServerMessage) -> String {
    format!("{} {}", role_label(message.role), message.content)
}

/// One line per log record, for `/history`.
pub fn record_line(record: &LogRecord) -> String {
    match record {
        LogRecord::Outbound(outbound) => {
            let mut line = format!(
                "{} {} [{}]",
                role_label(MessageRole::User),
                outbound.content,
                status_label(outbound.status)
            );
            if let Some(reason) = &outbound.failure {
                line.push_str(&format!(" {}", style(reason).red().dim()));
            }
            line
        }
        LogRecord::Confirmed(message) => server_message_line(message),
    }
}

/// JSON shape of an inbound realtime event, for `listen --json`.
pub fn inbound_json(event: &InboundEvent) -> serde_json::Value {
    let mut value = serde_json::json!({
        "type": event.kind(),
        "conversation_id": event.conversation_id(),
        "correlation_id": event.correlation_id(),
        "timestamp": event.timestamp(),
    });
    match event {
        InboundEvent::ChatMessage(chat) => {
            value["user_message"] = serde_json::json!(chat.user_message);
            value["ai_message"] = serde_json::json!(chat.ai_message);
            value["content"] = serde_json::json!(chat.content);
        }
        InboundEvent::TypingStart(typing) | InboundEvent::TypingStop(typing) => {
            value["user_id"] = serde_json::json!(typing.user_id);
        }
        InboundEvent::Error(error) => {
            value["code"] = serde_json::json!(error.code);
            value["message"] = serde_json::json!(error.message);
        }
    }
    value
}

/// Human-readable rendering of an inbound realtime event.
pub fn inbound_line(event: &InboundEvent) -> String {
    let conversation = event
        .conversation_id()
        .map(|id| format!(" {}", style(format!("({id})")).dim()))
        .unwrap_or_default();
    match event {
        InboundEvent::ChatMessage(chat) => {
            let mut parts = Vec::new();
            if let Some(user) = &chat.user_message {
                parts.push(server_message_line(user));
            }
            if let Some(ai) = &chat.ai_message {
                parts.push(server_message_line(ai));
            }
            if parts.is_empty() {
                if let Some(content) = &chat.content {
                    parts.push(content.clone());
                }
            }
            format!("{}{conversation}", parts.join("\n  "))
        }
        InboundEvent::TypingStart(typing) => format!(
            "{} {} is typing{conversation}",
            style("…").dim(),
            typing.user_id.as_deref().unwrap_or("someone")
        ),
        InboundEvent::TypingStop(typing) => format!(
            "{} {} stopped typing{conversation}",
            style("…").dim(),
            typing.user_id.as_deref().unwrap_or("someone")
        ),
        InboundEvent::Error(error) => format!(
            "{} {}{}{conversation}",
            style("error").red().bold(),
            error
                .code
                .as_deref()
                .map(|code| format!("[{code}] "))
                .unwrap_or_default(),
            error.message
        ),
    }
}
