//! Ls command - list the local index.

use crate::context::Context;
use crate::output::format_bytes;
use crate::output::table::Table;
use anyhow::Result;
use artisan_core::elapsed_label;
use chrono::Utc;
use clap::Args;

/// Arguments for the ls command
#[derive(Args, Debug, Clone)]
pub struct LsArgs {
    /// Only print package ids
    #[arg(short, long)]
    pub quiet: bool,
}

/// Run the ls command
pub async fn run(ctx: &Context, args: &LsArgs) -> Result<()> {
    let index = ctx.open_index()?;

    if args.quiet {
        for id in index.list_quiet() {
            println!("{id}");
        }
        return Ok(());
    }

    let now = Utc::now();
    let mut table = Table::new();
    table.headers(["REPOSITORY", "TAG", "PACKAGE ID", "TYPE", "CREATED", "SIZE"]);
    for entry in index.list() {
        let package = entry.package;
        table.styled_row(vec![
            table.name_cell(entry.repository),
            table.dim_cell(entry.tag_label()),
            package.short_id().into(),
            package.package_type.as_str().into(),
            elapsed_label(package.created, now).into(),
            format_bytes(package.size).into(),
        ]);
    }
    table.print();
    Ok(())
}
