//! Account commands: login, register, logout, whoami and password flows.

use anyhow::{Context, Result};
use console::style;
use dialoguer::{Input, Password};
use secrecy::{ExposeSecret, SecretString};

use parley_types::auth::{
    AuthPayload, ChangePasswordRequest, DeviceInfo, ForgotPasswordRequest, LoginRequest,
    RegisterRequest, ResetPasswordRequest, User,
};

use super::output;
use crate::state::AppState;

/// Use the supplied value or prompt for it.
fn value_or_prompt(value: Option<String>, prompt: &str) -> Result<String> {
    match value {
        Some(v) => Ok(v),
        None => Ok(Input::<String>::new().with_prompt(prompt).interact_text()?),
    }
}

/// Use the supplied password or prompt with hidden input. New passwords are
/// asked twice.
fn password_or_prompt(value: Option<String>, prompt: &str, confirm: bool) -> Result<SecretString> {
    if let Some(v) = value {
        return Ok(SecretString::from(v));
    }
    let mut password = Password::new().with_prompt(prompt);
    if confirm {
        password = password.with_confirmation("Repeat password", "Passwords do not match");
    }
    Ok(SecretString::from(password.interact()?))
}

fn device_info() -> Option<DeviceInfo> {
    Some(DeviceInfo::current(env!("CARGO_PKG_VERSION")))
}

fn user_json(user: &User) -> serde_json::Value {
    serde_json::json!({
        "id": user.id,
        "email": user.email,
        "name": user.display_name(),
        "user_type": user.user_type,
        "organization_id": user.organization_id,
    })
}

fn print_signed_in(payload: &AuthPayload, json: bool) -> Result<()> {
    if json {
        return output::print_json(&serde_json::json!({
            "user": user_json(&payload.user),
            "session_id": payload.session.id,
            "expires_at": payload.session.expires_at,
        }));
    }
    println!();
    output::success(format!(
        "Signed in as {} ({})",
        style(payload.user.display_name()).cyan().bold(),
        payload.user.email
    ));
    println!(
        "  {}",
        style(format!(
            "Session expires {}",
            payload.session.expires_at.format("%Y-%m-%d %H:%M UTC")
        ))
        .dim()
    );
    println!();
    Ok(())
}

fn print_server_message(message: Option<String>, fallback: &str, json: bool) -> Result<()> {
    let text = message.unwrap_or_else(|| fallback.to_string());
    if json {
        return output::print_json(&serde_json::json!({ "ok": true, "message": text }));
    }
    output::success(text);
    Ok(())
}

pub async fn login(
    state: &AppState,
    email: Option<String>,
    password: Option<String>,
    remember_me: bool,
    json: bool,
) -> Result<()> {
    let email = value_or_prompt(email, "Email")?;
    let password = password_or_prompt(password, "Password", false)?;

    let request = LoginRequest {
        email,
        password: password.expose_secret().to_string(),
        remember_me: remember_me.then_some(true),
        device_info: device_info(),
    };
    let payload = state.client.login(&request).await.context("login failed")?;
    print_signed_in(&payload, json)
}

#[allow(clippy::too_many_arguments)]
pub async fn register(
    state: &AppState,
    first_name: Option<String>,
    last_name: Option<String>,
    email: Option<String>,
    user_type: String,
    organization_id: Option<String>,
    password: Option<String>,
    json: bool,
) -> Result<()> {
    let first_name = value_or_prompt(first_name, "First name")?;
    let last_name = value_or_prompt(last_name, "Last name")?;
    let email = value_or_prompt(email, "Email")?;
    let password = password_or_prompt(password, "Password", true)?;

    let request = RegisterRequest {
        first_name,
        last_name,
        email,
        password: password.expose_secret().to_string(),
        user_type,
        organization_id,
    };
    let payload = state
        .client
        .register(&request)
        .await
        .context("registration failed")?;
    print_signed_in(&payload, json)
}

pub async fn logout(state: &AppState, json: bool) -> Result<()> {
    let was_signed_in = state.client.is_authenticated();
    if was_signed_in {
        state.client.logout().await;
    }

    if json {
        return output::print_json(&serde_json::json!({ "logged_out": was_signed_in }));
    }
    if was_signed_in {
        output::success("Signed out");
    } else {
        output::notice("Not signed in");
    }
    Ok(())
}

pub async fn whoami(state: &AppState, json: bool) -> Result<()> {
    state.require_session()?;
    let user = state
        .client
        .current_user()
        .await
        .context("failed to fetch the current user")?;

    if json {
        return output::print_json(&user_json(&user));
    }
    println!();
    println!(
        "  {} {}",
        style(user.display_name()).cyan().bold(),
        style(format!("<{}>", user.email)).dim()
    );
    println!("  {}  {}", style("Id:").bold(), user.id);
    println!("  {}  {}", style("Type:").bold(), user.user_type);
    if let Some(org) = &user.organization_id {
        println!("  {}  {org}", style("Organization:").bold());
    }
    println!();
    Ok(())
}

pub async fn change_password(state: &AppState, json: bool) -> Result<()> {
    state.require_session()?;
    let current = password_or_prompt(None, "Current password", false)?;
    let new = password_or_prompt(None, "New password", true)?;

    let request = ChangePasswordRequest {
        current_password: current.expose_secret().to_string(),
        new_password: new.expose_secret().to_string(),
    };
    let message = state
        .client
        .change_password(&request)
        .await
        .context("password change failed")?;
    print_server_message(message, "Password changed", json)
}

pub async fn forgot_password(state: &AppState, email: Option<String>, json: bool) -> Result<()> {
    let email = value_or_prompt(email, "Email")?;
    let message = state
        .client
        .forgot_password(&ForgotPasswordRequest { email })
        .await
        .context("password reset request failed")?;
    print_server_message(message, "If the account exists, a reset email is on its way", json)
}

pub async fn reset_password(state: &AppState, token: String, json: bool) -> Result<()> {
    let new = password_or_prompt(None, "New password", true)?;
    let request = ResetPasswordRequest {
        token,
        new_password: new.expose_secret().to_string(),
    };
    let message = state
        .client
        .reset_password(&request)
        .await
        .context("password reset failed")?;
    print_server_message(message, "Password reset. Sign in with `parley login`", json)
}
