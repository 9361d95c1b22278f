//! CLI command definitions for the `parley` binary.
//!
//! Uses clap derive macros for argument parsing. Account commands sit at the
//! top level (`parley login`, `parley whoami`), messaging commands next to
//! them (`parley send`, `parley chat`).

pub mod auth;
pub mod chat;
pub mod listen;
pub mod message;
pub mod output;
pub mod status;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use parley_observe::LogFormat;

/// Chat with Parley from the terminal.
#[derive(Parser)]
#[command(name = "parley", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log line format on stderr (pretty, json).
    #[arg(long, global = true, default_value = "pretty")]
    pub log_format: LogFormat,

    /// Export tracing spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true, env = "PARLEY_OTEL")]
    pub otel: bool,

    /// Keep the session in the OS keychain instead of the data directory.
    #[arg(long, global = true, env = "PARLEY_KEYCHAIN")]
    pub keychain: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sign in with email and password.
    Login {
        /// Account email (prompted when omitted).
        #[arg(long)]
        email: Option<String>,

        /// Password for scripts. Prompted securely when omitted.
        #[arg(long, env = "PARLEY_PASSWORD", hide_env_values = true)]
        password: Option<String>,

        /// Ask the server for a long-lived session.
        #[arg(long)]
        remember_me: bool,
    },

    /// Create an account and sign in.
    Register {
        #[arg(long)]
        first_name: Option<String>,

        #[arg(long)]
        last_name: Option<String>,

        #[arg(long)]
        email: Option<String>,

        /// Account type, e.g. individual or business.
        #[arg(long, default_value = "individual")]
        user_type: String,

        #[arg(long)]
        organization_id: Option<String>,

        /// Password for scripts. Prompted securely when omitted.
        #[arg(long, env = "PARLEY_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// End the session on this device.
    Logout,

    /// Show the signed-in user.
    Whoami,

    /// Change the password of the signed-in user.
    #[command(name = "change-password")]
    ChangePassword,

    /// Request a password reset email.
    #[command(name = "forgot-password")]
    ForgotPassword {
        #[arg(long)]
        email: Option<String>,
    },

    /// Set a new password with a reset token.
    #[command(name = "reset-password")]
    ResetPassword {
        /// Token from the reset email.
        #[arg(long)]
        token: String,
    },

    /// Send one message and print the reply.
    Send {
        /// Message text.
        message: String,

        /// Continue an existing conversation.
        #[arg(long, short)]
        conversation: Option<String>,

        /// Open the realtime link first and deliver over it.
        #[arg(long)]
        realtime: bool,
    },

    /// Start an interactive chat.
    Chat {
        /// Continue an existing conversation.
        #[arg(long, short)]
        conversation: Option<String>,
    },

    /// Connect to the realtime endpoint and print inbound events.
    Listen,

    /// Session and configuration summary.
    Status,

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_follow_subcommands() {
        let cli = Cli::try_parse_from(["parley", "send", "hi", "--json", "-vv"]).unwrap();
        assert!(cli.json);
        assert_eq!(cli.verbose, 2);
        assert!(matches!(
            cli.command,
            Commands::Send { ref message, conversation: None, realtime: false } if message == "hi"
        ));
    }

    #[test]
    fn log_format_parses_from_flag() {
        let cli = Cli::try_parse_from(["parley", "--log-format", "json", "status"]).unwrap();
        assert_eq!(cli.log_format, LogFormat::Json);
        assert!(Cli::try_parse_from(["parley", "--log-format", "xml", "status"]).is_err());
    }

    #[test]
    fn reset_password_requires_token() {
        assert!(Cli::try_parse_from(["parley", "reset-password"]).is_err());
    }
}
