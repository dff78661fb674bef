//! Xenon CLI - command line front end for the Xenon admin API session.
//!
//! Every invocation resumes the stored session first (one renewal round
//! trip), then runs the requested command.

mod commands;

use std::io;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use xenon_core::Config;

/// Log file name prefix in the cache directory
const LOG_FILE: &str = "xenon.log";

#[derive(Parser)]
#[command(name = "xenon")]
#[command(about = "Sign in to the Xenon admin API, manage the session and inspect the audit log")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in; the password is read from XENON_PASSWORD or prompted
    Login {
        #[arg(short, long)]
        username: Option<String>,
    },

    /// Sign out and forget the stored session
    Logout,

    /// Show session state, user and renewal timer
    Status,

    /// List or select the operational branch
    Branch {
        #[command(subcommand)]
        command: BranchCommands,
    },

    /// Read the audit log and verify its hash chain
    Audit {
        #[command(subcommand)]
        command: AuditCommands,
    },
}

#[derive(Subcommand)]
enum BranchCommands {
    /// List branches available to the signed-in user
    List,
    /// Select the branch sent with every request
    Select {
        /// Branch ID
        id: String,
    },
}

#[derive(Subcommand)]
enum AuditCommands {
    /// Ask the server to verify the hash chain
    Verify,
    /// List entries
    List {
        #[arg(short, long, default_value = "20")]
        limit: u32,
        #[arg(short, long, default_value = "0")]
        offset: u32,
        /// Entity type (e.g. cliente, producto)
        #[arg(short, long)]
        entity: Option<String>,
        /// Action kind (CREATE, UPDATE, DELETE, LOGIN, ...)
        #[arg(short, long)]
        action: Option<String>,
    },
    /// Show one entry
    Show {
        /// Entry ID
        id: String,
    },
    /// History of one entity
    History {
        entity: String,
        entity_id: String,
    },
    /// Totals per action, entity and day
    Stats,
}

/// Initialize the tracing subscriber for logging.
///
/// Console output goes to stderr; a daily rolling file is kept in the cache
/// directory when one is available. The returned guard must live until exit.
fn init_tracing(config: &Config) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let log_dir = config
        .cache_dir()
        .ok()
        .map(|dir| dir.join("logs"))
        .filter(|dir| std::fs::create_dir_all(dir).is_ok());

    match log_dir {
        Some(dir) => {
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, LOG_FILE));
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(io::stderr))
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .with(filter)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(io::stderr))
                .with(filter)
                .init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let mut config = Config::load()?;
    let _log_guard = init_tracing(&config);
    info!("Xenon CLI starting");

    match cli.command {
        Commands::Login { username } => commands::login(&mut config, username).await,
        Commands::Logout => commands::logout(&config).await,
        Commands::Status => commands::status(&config).await,
        Commands::Branch { command } => match command {
            BranchCommands::List => commands::branch_list(&config).await,
            BranchCommands::Select { id } => commands::branch_select(&mut config, &id).await,
        },
        Commands::Audit { command } => match command {
            AuditCommands::Verify => commands::audit_verify(&config).await,
            AuditCommands::List {
                limit,
                offset,
                entity,
                action,
            } => commands::audit_list(&config, limit, offset, entity, action).await,
            AuditCommands::Show { id } => commands::audit_show(&config, &id).await,
            AuditCommands::History { entity, entity_id } => {
                commands::audit_history(&config, &entity, &entity_id).await
            }
            AuditCommands::Stats => commands::audit_stats(&config).await,
        },
    }
}
