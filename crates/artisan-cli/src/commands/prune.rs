//! Prune command - drop untagged packages.

use crate::context::Context;
use crate::output::{info, success};
use anyhow::Result;
use clap::Args;

/// Arguments for the prune command
#[derive(Args, Debug, Clone, Default)]
pub struct PruneArgs {}

/// Run the prune command
pub async fn run(ctx: &Context, _args: &PruneArgs) -> Result<()> {
    let mut index = ctx.open_index()?;
    match index.prune()? {
        0 => info("Nothing to prune"),
        n => success(&format!("Pruned {n} untagged package(s)")),
    }
    Ok(())
}
