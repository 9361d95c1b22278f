//! Main chat loop orchestration.
//!
//! Opens the realtime link, prints a banner, then reads lines until Ctrl+D
//! or `/exit`. Lines are handed to the delivery coordinator without waiting;
//! a background task prints replies, delivery failures, typing indicators
//! and connection changes above the prompt as they arrive.

use std::io::Write;

use anyhow::Result;
use console::style;
use rustyline_async::SharedWriter;
use tokio::sync::{broadcast, watch};
use tracing::debug;

use parley_core::MessageDeliveryCoordinator;
use parley_infra::http::ReqwestTransport;
use parley_infra::realtime::WebSocketConnector;
use parley_types::chat::{LogChange, LogRecord, MessageRole, MessageStatus};
use parley_types::frame::InboundEvent;
use parley_types::session::{ConnectionState, SessionEvent};

use crate::cli::output;
use crate::state::AppState;

use super::commands::{self, ChatCommand};
use super::input::{ChatInput, InputEvent};

type Coordinator = MessageDeliveryCoordinator<ReqwestTransport, WebSocketConnector>;

/// Run the interactive chat loop, optionally continuing `conversation`.
pub async fn run_chat_loop(state: &AppState, conversation: Option<String>) -> Result<()> {
    state.require_session()?;
    let client = &state.client;
    if conversation.is_some() {
        client.coordinator().set_conversation(conversation);
    }

    let opened = state.open_realtime().await?;
    print_banner(state, opened);

    let prompt = format!("  {} ", style("You >").green().bold());
    let (mut chat_input, writer) = ChatInput::new(prompt)
        .map_err(|e| anyhow::anyhow!("Failed to initialize input: {e}"))?;

    let own_user_id = client.store().cached_user().map(|user| user.id);
    let printer = tokio::spawn(print_events(
        writer.clone(),
        client.coordinator().clone(),
        own_user_id,
        client.subscribe_log(),
        client.subscribe_inbound(),
        client.subscribe_session(),
        client.watch_state(),
    ));
    let mut out = writer;

    loop {
        // The terminal only reports whole lines, so typing is announced
        // when the prompt opens and expires on the debounce timer.
        let typing_in = client.coordinator().conversation_id();
        if let Some(id) = &typing_in {
            client.start_typing(id).await;
        }

        let event = chat_input.read_line().await;
        if let Some(id) = &typing_in {
            client.stop_typing(id).await;
        }

        let text = match event {
            InputEvent::Eof => break,
            InputEvent::Interrupted => {
                let hint = style("Press Ctrl+D to exit, or keep chatting.").dim();
                let _ = writeln!(out, "  {hint}");
                continue;
            }
            InputEvent::Message(text) if text.is_empty() => continue,
            InputEvent::Message(text) => text,
        };

        if let Some(cmd) = commands::parse(&text) {
            match cmd {
                ChatCommand::Help => {
                    let _ = write!(out, "{}", commands::help_text());
                }
                ChatCommand::Clear => chat_input.clear(),
                ChatCommand::Exit => break,
                ChatCommand::New => {
                    client.coordinator().set_conversation(None);
                    let mark = style("*").cyan().bold();
                    let _ = writeln!(out, "  {mark} Next message starts a new conversation");
                }
                ChatCommand::History => {
                    let records = client.messages();
                    if records.is_empty() {
                        let _ = writeln!(out, "  {}", style("No messages yet.").dim());
                    }
                    for record in &records {
                        let _ = writeln!(out, "  {}", output::record_line(record));
                    }
                }
                ChatCommand::Retry => match last_failed(&client.messages()) {
                    Some(correlation_id) => {
                        if let Err(e) = client.retry(correlation_id) {
                            let _ = writeln!(out, "  {} {e}", style("!").red().bold());
                        }
                    }
                    None => {
                        let _ = writeln!(out, "  {}", style("Nothing to retry.").dim());
                    }
                },
                ChatCommand::Status => {
                    let _ = writeln!(
                        out,
                        "  Link: {}  Awaiting ack: {}  Conversation: {}",
                        output::state_label(client.connection_state()),
                        client.coordinator().awaiting_ack(),
                        client
                            .coordinator()
                            .conversation_id()
                            .unwrap_or_else(|| "new".to_string())
                    );
                }
                ChatCommand::Unknown(name) => {
                    let _ = writeln!(
                        out,
                        "  {} Unknown command: {}. Type /help for available commands.",
                        style("?").yellow().bold(),
                        style(name).dim()
                    );
                }
            }
            continue;
        }

        if let Err(e) = client.send(&text, None) {
            let _ = writeln!(out, "  {} {e}", style("!").red().bold());
        }
    }

    chat_input.flush();
    printer.abort();
    client.disconnect().await;
    println!("\n  {}", style("Chat ended.").dim());
    Ok(())
}

fn print_banner(state: &AppState, opened: bool) {
    let name = state
        .client
        .store()
        .cached_user()
        .map(|user| user.display_name())
        .unwrap_or_else(|| "you".to_string());

    println!();
    println!("  {} {}", style("Parley").cyan().bold(), style(format!("signed in as {name}")).dim());
    if let Some(conversation) = state.client.coordinator().conversation_id() {
        println!("  {}  {}", style("Conversation:").bold(), style(conversation).dim());
    }
    println!(
        "  {}  {}",
        style("Link:").bold(),
        if opened {
            output::state_label(ConnectionState::Open)
        } else {
            format!("{}", style("offline, messages go over REST").yellow())
        }
    );
    println!();
    println!("  {}", style("Type /help for commands, Ctrl+D to exit").dim());
    println!("  {}", style("---").dim());
    println!();
}

/// Most recent failed outbound message.
fn last_failed(records: &[LogRecord]) -> Option<uuid::Uuid> {
    records.iter().rev().find_map(|record| match record {
        LogRecord::Outbound(outbound) if outbound.status == MessageStatus::Failed => {
            Some(outbound.correlation_id)
        }
        _ => None,
    })
}

/// Print replies, failures, typing and link changes until every source closes.
async fn print_events(
    mut out: SharedWriter,
    coordinator: Coordinator,
    own_user_id: Option<String>,
    mut log: broadcast::Receiver<LogChange>,
    mut inbound: broadcast::Receiver<InboundEvent>,
    mut session: broadcast::Receiver<SessionEvent>,
    mut link: watch::Receiver<ConnectionState>,
) {
    let mut tracker = LinkTracker::default();
    let _ = link.borrow_and_update();
    loop {
        tokio::select! {
            change = log.recv() => match change {
                Ok(change) => {
                    for line in log_lines(&change, &coordinator) {
                        let _ = writeln!(out, "  {line}");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "Chat printer lagged behind the message log");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            event = inbound.recv() => match event {
                Ok(InboundEvent::TypingStart(typing))
                    if typing.user_id.is_some() && typing.user_id != own_user_id =>
                {
                    let _ = writeln!(out, "  {}", style("… typing").dim());
                }
                Ok(event @ InboundEvent::Error(_)) if event.correlation_id().is_none() => {
                    let _ = writeln!(out, "  {}", output::inbound_line(&event));
                }
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            },
            event = session.recv() => match event {
                Ok(SessionEvent::Expired { reason }) => {
                    let _ = writeln!(
                        out,
                        "  {} Session expired ({reason}). Run `parley login` and start again.",
                        style("!").red().bold()
                    );
                }
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            },
            changed = link.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *link.borrow_and_update();
                if let Some(line) = tracker.observe(current) {
                    let _ = writeln!(out, "  {line}");
                }
            }
        }
    }
}

/// Lines worth showing for a log change. The user's own text is already on
/// screen, so only replies and failures are printed.
fn log_lines(change: &LogChange, coordinator: &Coordinator) -> Vec<String> {
    match change {
        LogChange::Added {
            record: LogRecord::Confirmed(message),
        } => vec![output::server_message_line(message)],
        LogChange::Reconciled { confirmed, .. } => confirmed
            .iter()
            .filter(|message| message.role != MessageRole::User)
            .map(output::server_message_line)
            .collect(),
        LogChange::StatusChanged {
            correlation_id,
            status: MessageStatus::Failed,
        } => {
            let reason = coordinator
                .find(*correlation_id)
                .and_then(|message| message.failure)
                .unwrap_or_else(|| "unknown error".to_string());
            vec![format!(
                "{} Not delivered: {reason}. Type /retry to resend.",
                style("!").red().bold()
            )]
        }
        _ => Vec::new(),
    }
}

/// Reports link loss once and recovery once, ignoring the hops between.
#[derive(Debug, Default)]
struct LinkTracker {
    lost: bool,
}

impl LinkTracker {
    fn observe(&mut self, current: ConnectionState) -> Option<String> {
        match current {
            ConnectionState::Reconnecting if !self.lost => {
                self.lost = true;
                Some(format!(
                    "{} Connection lost, reconnecting…",
                    style("!").yellow().bold()
                ))
            }
            ConnectionState::Open if self.lost => {
                self.lost = false;
                Some(format!("{} Reconnected", style("✓").green().bold()))
            }
            ConnectionState::Closed => {
                self.lost = false;
                Some(format!(
                    "{} Realtime link closed, messages go over REST",
                    style("!").yellow().bold()
                ))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_loss_and_recovery_reported_once() {
        console::set_colors_enabled(false);
        let mut tracker = LinkTracker::default();
        assert!(tracker.observe(ConnectionState::Open).is_none());
        assert_eq!(
            tracker.observe(ConnectionState::Reconnecting).as_deref(),
            Some("! Connection lost, reconnecting…")
        );
        assert!(tracker.observe(ConnectionState::Connecting).is_none());
        assert!(tracker.observe(ConnectionState::Reconnecting).is_none());
        assert!(tracker.observe(ConnectionState::Connecting).is_none());
        assert_eq!(
            tracker.observe(ConnectionState::Open).as_deref(),
            Some("✓ Reconnected")
        );
        assert!(tracker.observe(ConnectionState::Open).is_none());
    }

    #[test]
    fn last_failed_picks_the_newest() {
        use parley_types::chat::OutboundMessage;

        let mut older = OutboundMessage::pending("a".into(), None);
        older.status = MessageStatus::Failed;
        let mut newer = OutboundMessage::pending("b".into(), None);
        newer.status = MessageStatus::Failed;
        let delivered = OutboundMessage::pending("c".into(), None);
        let newest_failed = newer.correlation_id;

        let records = vec![
            LogRecord::Outbound(older),
            LogRecord::Outbound(newer),
            LogRecord::Outbound(delivered),
        ];
        assert_eq!(last_failed(&records), Some(newest_failed));
        assert_eq!(last_failed(&[]), None);
    }
}
