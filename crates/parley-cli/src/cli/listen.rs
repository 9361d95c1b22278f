//! `parley listen`: stream inbound realtime events until Ctrl+C.

use anyhow::Result;
use console::style;
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;

use parley_types::session::SessionEvent;

use super::output;
use crate::state::AppState;

pub async fn listen(state: &AppState, json: bool) -> Result<()> {
    state.require_session()?;
    let client = &state.client;

    // Subscribe before connecting so nothing between open and the first
    // poll is missed.
    let mut inbound = client.subscribe_inbound();
    let mut session = client.subscribe_session();
    let mut link = client.watch_state();

    let opened = state.open_realtime().await?;
    if !json {
        println!();
        if opened {
            output::success(format!("Listening on {}", style(client.connection().url()).cyan()));
        } else {
            output::warning("Realtime link not open yet, still trying");
        }
        println!("  {}", style("Press Ctrl+C to stop").dim());
        println!();
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = inbound.recv() => match event {
                Ok(event) => {
                    if json {
                        println!("{}", output::inbound_json(&event));
                    } else {
                        println!("  {}", output::inbound_line(&event));
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "Listener lagged behind inbound events");
                }
                Err(RecvError::Closed) => break,
            },
            event = session.recv() => match event {
                Ok(SessionEvent::Expired { reason }) => {
                    output::warning(format!("Session expired ({reason})"));
                    break;
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
            changed = link.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *link.borrow_and_update();
                if json {
                    println!("{}", serde_json::json!({ "type": "connection", "state": current }));
                } else {
                    println!("  {} link {}", style("·").dim(), output::state_label(current));
                }
            }
        }
    }

    client.disconnect().await;
    if !json {
        println!("\n  Stopped.");
    }
    Ok(())
}
