//! Slash command parsing for the chat loop.
//!
//! Commands start with `/` and provide in-chat controls for the
//! conversation, delivery retries and connection status.

use console::style;

#[derive(Debug, PartialEq)]
pub enum ChatCommand {
    /// Show available commands.
    Help,
    /// Clear the terminal screen.
    Clear,
    /// Leave the chat.
    Exit,
    /// Start a new conversation.
    New,
    /// Show the message log.
    History,
    /// Resend the most recent failed message.
    Retry,
    /// Show connection and delivery status.
    Status,
    /// Unknown command.
    Unknown(String),
}

/// Parse user input as a slash command.
///
/// Returns `None` if the input doesn't start with `/`.
pub fn parse(input: &str) -> Option<ChatCommand> {
    let trimmed = input.trim();
    if !trimmed.starts_with('/') {
        return None;
    }

    let cmd = trimmed
        .split_whitespace()
        .next()
        .unwrap_or(trimmed)
        .to_lowercase();

    match cmd.as_str() {
        "/help" | "/h" | "/?" => Some(ChatCommand::Help),
        "/clear" | "/cls" => Some(ChatCommand::Clear),
        "/exit" | "/quit" | "/q" => Some(ChatCommand::Exit),
        "/new" => Some(ChatCommand::New),
        "/history" => Some(ChatCommand::History),
        "/retry" | "/r" => Some(ChatCommand::Retry),
        "/status" => Some(ChatCommand::Status),
        other => Some(ChatCommand::Unknown(other.to_string())),
    }
}

/// Help text listing all available commands.
pub fn help_text() -> String {
    let rows = [
        ("/help", "Show this help message"),
        ("/clear", "Clear the screen"),
        ("/exit", "Leave the chat"),
        ("/new", "Start a new conversation"),
        ("/history", "Show messages and their delivery status"),
        ("/retry", "Resend the last failed message"),
        ("/status", "Show connection status"),
    ];
    let mut text = format!("\n  {}\n\n", style("Available commands:").bold());
    for (name, description) in rows {
        text.push_str(&format!("  {} {description}\n", style(format!("{name:<10}")).cyan()));
    }
    text.push_str(&format!("\n  {}\n", style("Ctrl+D to exit").dim()));
    text
}
