use clap::Subcommand;
use recsync_credentials::CredentialStatus;

use crate::context::Context;

#[derive(Subcommand)]
pub enum AuthAction {
    /// Authorize access in the browser
    Login,
    /// Forget the stored credential
    Logout,
    /// Show the stored credential's state
    Status,
}

pub async fn run(ctx: &Context, action: AuthAction) -> anyhow::Result<()> {
    match action {
        AuthAction::Login => {
            if !ctx.oauth_configured() {
                anyhow::bail!("set oauth.client_id in the configuration file first");
            }
            let credential = ctx
                .credentials
                .acquire_interactive_with(|url| {
                    eprintln!("Open this URL to authorize recsync:\n\n  {url}\n");
                    if let Err(e) = open::that(url) {
                        tracing::debug!(error = %e, "could not launch browser");
                    }
                })
                .await?;
            println!(
                "authenticated (token valid until {})",
                credential.expires_at.format("%Y-%m-%d %H:%M UTC")
            );
        }
        AuthAction::Logout => {
            ctx.credentials.invalidate().await?;
            println!("signed out");
        }
        AuthAction::Status => match ctx.credentials.status().await {
            CredentialStatus::NotAuthenticated => println!("not authenticated"),
            CredentialStatus::Valid { expires_at } => {
                println!(
                    "authenticated (token valid until {})",
                    expires_at.format("%Y-%m-%d %H:%M UTC")
                );
            }
            CredentialStatus::Expired { refreshable: true } => {
                println!("authenticated (token expired, will refresh on next use)");
            }
            CredentialStatus::Expired { refreshable: false } => {
                println!("session expired, run `recsync auth login`");
            }
        },
    }
    Ok(())
}
