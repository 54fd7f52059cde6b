//! Import command - load packages from a tar archive.

use crate::context::Context;
use crate::output::success;
use anyhow::{Context as _, Result};
use artisan_core::DigestVerifier;
use artisan_registry::archive;
use clap::Args;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

/// Arguments for the import command
#[derive(Args, Debug, Clone)]
pub struct ImportArgs {
    /// Archive written by `artisan save`
    pub file: PathBuf,
}

/// Run the import command
pub async fn run(ctx: &Context, args: &ImportArgs) -> Result<()> {
    let file = File::open(&args.file)
        .with_context(|| format!("cannot open {}", args.file.display()))?;
    let mut index = ctx.open_index()?;
    for name in archive::import(&mut index, BufReader::new(file), &DigestVerifier)? {
        success(&format!("Imported {name}"));
    }
    Ok(())
}
