//! One-shot message delivery: `parley send`.

use anyhow::{Context, Result};
use console::style;

use super::output;
use crate::state::AppState;

/// Send `message` and print the assistant's reply.
///
/// Delivery goes over the realtime link when `realtime` is set and the link
/// opens in time, otherwise over REST.
pub async fn send(
    state: &AppState,
    message: &str,
    conversation: Option<&str>,
    realtime: bool,
    json: bool,
) -> Result<()> {
    state.require_session()?;

    if realtime && !state.open_realtime().await? && !json {
        output::warning("Realtime link did not open, delivering over REST");
    }

    let result = state.client.send_and_wait(message, conversation).await;
    if realtime {
        state.client.disconnect().await;
    }
    let receipt = result.context("message not delivered")?;

    if json {
        return output::print_json(&serde_json::json!({
            "correlation_id": receipt.correlation_id,
            "channel": receipt.channel,
            "conversation_id": receipt.conversation_id,
            "reply": receipt.reply,
        }));
    }

    println!();
    if let Some(reply) = &receipt.reply {
        println!("  {}", output::server_message_line(reply));
    } else {
        output::success("Delivered");
    }
    println!();
    if let Some(conversation_id) = &receipt.conversation_id {
        println!(
            "  {}",
            style(format!(
                "via {} · continue with --conversation {conversation_id}",
                receipt.channel
            ))
            .dim()
        );
        println!();
    }
    Ok(())
}
