use std::path::PathBuf;

use clap::Args;
use recsync_sync::{UploadOutcome, parse_tags};
use recsync_transfer::ProgressFn;
use tokio_util::sync::CancellationToken;

use super::{human_bytes, print_progress};
use crate::context::Context;

#[derive(Args)]
pub struct UploadArgs {
    /// Recording to upload
    pub path: PathBuf,
    /// Remote name (defaults to the file name)
    #[arg(long)]
    pub name: Option<String>,
    /// Comma-separated tags
    #[arg(long, default_value = "")]
    pub tags: String,
    /// Suppress the progress line
    #[arg(long)]
    pub quiet: bool,
}

#[derive(Args)]
pub struct DownloadArgs {
    /// Remote object id
    pub remote_id: String,
    /// Destination file
    pub dest: PathBuf,
    /// Check the downloaded bytes against the remote fingerprint
    #[arg(long)]
    pub verify: bool,
    #[arg(long)]
    pub quiet: bool,
}

#[derive(Args)]
pub struct ListArgs {
    /// Folder id (defaults to the configured recordings folder)
    #[arg(long)]
    pub folder: Option<String>,
}

pub async fn upload(ctx: &Context, args: UploadArgs, cancel: &CancellationToken) -> anyhow::Result<()> {
    let service = ctx.sync_service()?;
    let tags = parse_tags(&args.tags);
    let progress: &ProgressFn = &print_progress;
    let outcome = service
        .upload(
            &args.path,
            args.name.as_deref(),
            &tags,
            (!args.quiet).then_some(progress),
            cancel,
        )
        .await?;

    match outcome {
        UploadOutcome::Uploaded(object) => {
            println!(
                "uploaded {} ({}) as {}",
                object.name,
                human_bytes(object.size),
                object.remote_id
            );
        }
        UploadOutcome::Duplicate(object) => {
            println!(
                "already uploaded as {} ({}), nothing to do",
                object.remote_id, object.name
            );
        }
    }
    Ok(())
}

pub async fn download(
    ctx: &Context,
    args: DownloadArgs,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let service = ctx.sync_service()?;
    let progress: &ProgressFn = &print_progress;
    let object = service
        .download(
            &args.remote_id,
            &args.dest,
            (!args.quiet).then_some(progress),
            cancel,
        )
        .await?;
    println!(
        "downloaded {} ({}) to {}",
        object.name,
        human_bytes(object.size),
        args.dest.display()
    );

    if args.verify {
        if service.verify_download(&args.dest, &args.remote_id).await? {
            println!("content verified");
        } else {
            anyhow::bail!("downloaded content does not match the remote fingerprint");
        }
    }
    Ok(())
}

pub async fn list(ctx: &Context, args: ListArgs, cancel: &CancellationToken) -> anyhow::Result<()> {
    let service = ctx.sync_service()?;
    let folder_id = match args.folder {
        Some(id) => id,
        None => service.recordings_folder(cancel).await?.remote_id,
    };
    let files = service.list(&folder_id).await?;
    if files.is_empty() {
        println!("no recordings");
        return Ok(());
    }
    for object in &files {
        let tags = if object.tags.is_empty() {
            String::new()
        } else {
            format!("  [{}]", object.tags.join(", "))
        };
        println!(
            "{:<36}  {:>10}  {}{}",
            object.remote_id,
            human_bytes(object.size),
            object.name,
            tags
        );
    }
    Ok(())
}

pub async fn delete(ctx: &Context, remote_id: &str) -> anyhow::Result<()> {
    let service = ctx.sync_service()?;
    if service.delete(remote_id).await? {
        println!("deleted {remote_id}");
    } else {
        println!("{remote_id} was already gone");
    }
    Ok(())
}
