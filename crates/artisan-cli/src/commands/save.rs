//! Save command - export packages to a tar archive.

use crate::context::Context;
use crate::output::success;
use anyhow::{Context as _, Result};
use artisan_core::PackageName;
use artisan_registry::archive;
use clap::Args;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

/// Arguments for the save command
#[derive(Args, Debug, Clone)]
pub struct SaveArgs {
    /// Package names to export
    #[arg(required = true)]
    pub names: Vec<String>,

    /// Archive to write
    #[arg(short, long)]
    pub output: PathBuf,
}

/// Run the save command
pub async fn run(ctx: &Context, args: &SaveArgs) -> Result<()> {
    let names = args
        .names
        .iter()
        .map(|n| PackageName::parse(n))
        .collect::<artisan_core::Result<Vec<_>>>()?;
    let index = ctx.open_index()?;

    let file = File::create(&args.output)
        .with_context(|| format!("cannot create {}", args.output.display()))?;
    let mut writer = archive::export(&index, &names, BufWriter::new(file))?;
    writer.flush()?;

    success(&format!(
        "Saved {} package(s) to {}",
        names.len(),
        args.output.display()
    ));
    Ok(())
}
