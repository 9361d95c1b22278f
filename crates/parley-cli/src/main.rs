//! Parley command-line chat client.
//!
//! Binary name: `parley`
//!
//! Parses CLI arguments, sets up tracing, builds the client from the data
//! directory's config and persisted session, then dispatches.

mod cli;
mod state;

use clap::Parser;
use clap_complete::generate;
use parley_observe::{TracingOptions, init_tracing, shutdown_tracing};

use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let tracing_options = TracingOptions::from_verbosity(cli.verbose, cli.quiet)
        .with_format(cli.log_format)
        .with_otel(cli.otel);
    init_tracing(tracing_options)
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    // Shell completions don't need app state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "parley", &mut std::io::stdout());
        return Ok(());
    }

    let result = run(cli).await;
    shutdown_tracing();
    result
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let state = AppState::init(cli.keychain).await?;
    let json = cli.json;

    match cli.command {
        Commands::Login {
            email,
            password,
            remember_me,
        } => cli::auth::login(&state, email, password, remember_me, json).await?,

        Commands::Register {
            first_name,
            last_name,
            email,
            user_type,
            organization_id,
            password,
        } => {
            cli::auth::register(
                &state,
                first_name,
                last_name,
                email,
                user_type,
                organization_id,
                password,
                json,
            )
            .await?
        }

        Commands::Logout => cli::auth::logout(&state, json).await?,
        Commands::Whoami => cli::auth::whoami(&state, json).await?,
        Commands::ChangePassword => cli::auth::change_password(&state, json).await?,
        Commands::ForgotPassword { email } => {
            cli::auth::forgot_password(&state, email, json).await?
        }
        Commands::ResetPassword { token } => {
            cli::auth::reset_password(&state, token, json).await?
        }

        Commands::Send {
            message,
            conversation,
            realtime,
        } => {
            cli::message::send(&state, &message, conversation.as_deref(), realtime, json).await?
        }

        Commands::Chat { conversation } => cli::chat::run_chat_loop(&state, conversation).await?,
        Commands::Listen => cli::listen::listen(&state, json).await?,
        Commands::Status => cli::status::status(&state, json).await?,

        Commands::Completions { .. } => unreachable!("handled above"),
    }

    Ok(())
}
