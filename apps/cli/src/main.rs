//! recsync command-line entry point.

mod commands;
mod config;
mod context;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use recsync_sync::{SyncError, UserAction};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;
use crate::context::Context;

#[derive(Parser)]
#[command(name = "recsync", version, about = "Sync recordings with remote storage")]
struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging for recsync crates
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Credential management
    Auth {
        #[command(subcommand)]
        action: commands::auth::AuthAction,
    },
    /// Upload a recording, skipping content that is already remote
    Upload(commands::files::UploadArgs),
    /// Download a remote object
    Download(commands::files::DownloadArgs),
    /// List recordings
    List(commands::files::ListArgs),
    /// Delete a remote object
    Delete {
        /// Remote object id
        remote_id: String,
    },
    /// Show storage usage
    Quota,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "info,recsync=debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => report(&e),
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let path = match cli.config {
        Some(path) => path,
        None => config::config_path()?,
    };
    let app = AppConfig::load(&path)?;
    tracing::debug!(path = %path.display(), "configuration loaded");
    let ctx = Context::new(&app)?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted, stopping after the current chunk");
            on_interrupt.cancel();
        }
    });

    match cli.command {
        Commands::Auth { action } => commands::auth::run(&ctx, action).await,
        Commands::Upload(args) => commands::files::upload(&ctx, args, &cancel).await,
        Commands::Download(args) => commands::files::download(&ctx, args, &cancel).await,
        Commands::List(args) => commands::files::list(&ctx, args, &cancel).await,
        Commands::Delete { remote_id } => commands::files::delete(&ctx, &remote_id).await,
        Commands::Quota => commands::quota::run(&ctx).await,
    }
}

fn report(err: &anyhow::Error) -> ExitCode {
    let Some(sync_err) = err.downcast_ref::<SyncError>() else {
        eprintln!("error: {err:#}");
        return ExitCode::FAILURE;
    };
    if !sync_err.is_user_visible_failure() {
        tracing::info!("cancelled");
        return ExitCode::from(130);
    }
    eprintln!("error: {sync_err}");
    match sync_err.suggested_action() {
        UserAction::Reauthenticate => eprintln!("hint: run `recsync auth login`"),
        UserAction::RetryManually => eprintln!("hint: the transfer can be retried"),
        UserAction::ShowMessage | UserAction::None => {}
    }
    ExitCode::FAILURE
}
