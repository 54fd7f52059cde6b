//! Remote command - list and clean up a remote registry.

use super::CredentialArgs;
use crate::context::{Context, cancel_on_ctrl_c};
use crate::output::progress::Spinner;
use crate::output::table::Table;
use crate::output::{format_bytes, info, success};
use anyhow::Result;
use artisan_core::elapsed_label;
use artisan_registry::{NO_TAG, RemoteAdmin};
use chrono::Utc;
use clap::{Args, Subcommand};

/// Arguments for the remote command
#[derive(Args, Debug, Clone)]
pub struct RemoteArgs {
    #[command(subcommand)]
    pub command: RemoteCommand,
}

/// Remote subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum RemoteCommand {
    /// List every package on a registry
    Ls(RemoteLsArgs),
    /// Remove tags matching a regular expression
    Rm(RemoteRmArgs),
    /// Remove packages by name or id prefix
    RmId(RemoteRmIdArgs),
}

/// Arguments for `remote ls`
#[derive(Args, Debug, Clone)]
pub struct RemoteLsArgs {
    /// Registry domain
    pub domain: String,

    /// Only print package ids
    #[arg(short, long)]
    pub quiet: bool,

    #[command(flatten)]
    pub auth: CredentialArgs,
}

/// Arguments for `remote rm`
#[derive(Args, Debug, Clone)]
pub struct RemoteRmArgs {
    /// Registry domain
    pub domain: String,

    /// Regular expression matched against `group/name:tag`
    pub filter: String,

    /// Print what would be removed without removing it
    #[arg(long)]
    pub dry_run: bool,

    #[command(flatten)]
    pub auth: CredentialArgs,
}

/// Arguments for `remote rm-id`
#[derive(Args, Debug, Clone)]
pub struct RemoteRmIdArgs {
    /// Registry domain
    pub domain: String,

    /// Package names or id prefixes
    #[arg(required = true)]
    pub refs: Vec<String>,

    #[command(flatten)]
    pub auth: CredentialArgs,
}

/// Run the remote command
pub async fn run(ctx: &Context, args: &RemoteArgs) -> Result<()> {
    match &args.command {
        RemoteCommand::Ls(args) => list(ctx, args).await,
        RemoteCommand::Rm(args) => remove_by_filter(ctx, args).await,
        RemoteCommand::RmId(args) => remove_by_ref(ctx, args).await,
    }
}

fn admin(ctx: &Context, domain: &str, auth: &CredentialArgs) -> Result<RemoteAdmin> {
    let admin = RemoteAdmin::new(domain, auth.resolve(), &ctx.client)?;
    cancel_on_ctrl_c(admin.cancellation_token());
    Ok(admin)
}

async fn list(ctx: &Context, args: &RemoteLsArgs) -> Result<()> {
    let admin = admin(ctx, &args.domain, &args.auth)?;

    if args.quiet {
        for id in admin.list_quiet().await? {
            println!("{id}");
        }
        return Ok(());
    }

    let spinner = Spinner::new(format!("Listing {}", admin.domain()));
    let entries = admin.list().await;
    spinner.finish_and_clear();
    let entries = entries?;

    let now = Utc::now();
    let mut table = Table::new();
    table.headers(["REPOSITORY", "TAG", "PACKAGE ID", "TYPE", "CREATED", "SIZE"]);
    for entry in &entries {
        let package = &entry.package;
        table.styled_row(vec![
            table.name_cell(&entry.repository),
            table.dim_cell(entry.tag.as_deref().unwrap_or(NO_TAG)),
            package.short_id().into(),
            package.package_type.as_str().into(),
            elapsed_label(package.created, now).into(),
            format_bytes(package.size).into(),
        ]);
    }
    table.print();
    Ok(())
}

async fn remove_by_filter(ctx: &Context, args: &RemoteRmArgs) -> Result<()> {
    let admin = admin(ctx, &args.domain, &args.auth)?;
    let removed = admin.remove_by_filter(&args.filter, args.dry_run).await?;

    if removed.is_empty() {
        info(&format!("Nothing on {} matches '{}'", args.domain, args.filter));
        return Ok(());
    }
    for name in &removed {
        if args.dry_run {
            info(&format!("Would remove {name}"));
        } else {
            success(&format!("Removed {name}"));
        }
    }
    Ok(())
}

async fn remove_by_ref(ctx: &Context, args: &RemoteRmIdArgs) -> Result<()> {
    let admin = admin(ctx, &args.domain, &args.auth)?;
    for name in admin.remove_by_name_or_id(&args.refs).await? {
        success(&format!("Removed {name}"));
    }
    Ok(())
}
