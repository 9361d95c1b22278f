//! Session and configuration summary. Makes no network calls.

use anyhow::Result;
use chrono::Utc;
use console::style;

use super::output;
use crate::state::AppState;

pub async fn status(state: &AppState, json: bool) -> Result<()> {
    let client = &state.client;
    let config = client.config();
    let store = client.store();
    let user = store.cached_user();
    let session = store.session();
    let signed_in = store.has_credentials();
    let token_valid = store.is_valid();

    if json {
        return output::print_json(&serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "data_dir": state.data_dir.display().to_string(),
            "vault": state.vault.to_string(),
            "signed_in": signed_in,
            "access_token_valid": token_valid,
            "user": user.as_ref().map(|u| serde_json::json!({ "id": u.id, "email": u.email })),
            "session": session.as_ref().map(|s| serde_json::json!({
                "id": s.id,
                "expires_at": s.expires_at,
            })),
            "config": config,
        }));
    }

    println!();
    println!("  {} Parley v{}", style("⚡").bold(), env!("CARGO_PKG_VERSION"));
    println!();

    println!("  {}", style("── Session ──").dim());
    match (&user, signed_in) {
        (Some(user), true) => println!(
            "  Signed in: {} {}",
            style(user.display_name()).cyan().bold(),
            style(format!("<{}>", user.email)).dim()
        ),
        (None, true) => println!("  Signed in: {}", style("yes").green()),
        (_, false) => println!(
            "  Signed in: {} (run {})",
            style("no").yellow(),
            style("parley login").yellow()
        ),
    }
    if signed_in {
        println!(
            "  Access token: {}",
            if token_valid {
                style("valid").green()
            } else {
                style("expired, renews on next request").yellow()
            }
        );
    }
    if let Some(session) = &session {
        let remaining = session.expires_at - Utc::now();
        println!(
            "  Session expires: {} {}",
            session.expires_at.format("%Y-%m-%d %H:%M UTC"),
            style(format!("({}h left)", remaining.num_hours().max(0))).dim()
        );
    }
    println!();

    println!("  {}", style("── Endpoints ──").dim());
    println!("  REST:     {}", style(&config.api_base_url).cyan());
    println!("  Realtime: {}", style(&config.realtime_url).cyan());
    println!();

    println!("  {}", style("── Delivery ──").dim());
    println!("  Ack timeout:   {}s", config.ack_timeout_secs);
    println!("  Max length:    {} characters", config.max_message_length);
    println!(
        "  Reconnect:     {}ms → {}ms, {}",
        config.reconnect.base_delay_ms,
        config.reconnect.max_delay_ms,
        config
            .reconnect
            .max_attempts
            .map(|n| format!("{n} attempts"))
            .unwrap_or_else(|| "unlimited".to_string())
    );
    println!();

    println!("  {}", style("── System ──").dim());
    println!("  Data dir: {}", style(state.data_dir.display()).dim());
    println!("  Session:  {}", style(&state.vault).dim());
    println!();

    Ok(())
}
