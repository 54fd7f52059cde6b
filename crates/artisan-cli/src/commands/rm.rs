//! Rm command - remove local packages.

use crate::context::Context;
use crate::output::success;
use anyhow::Result;
use clap::Args;

/// Arguments for the rm command
#[derive(Args, Debug, Clone)]
pub struct RmArgs {
    /// Package names or id prefixes
    #[arg(required = true)]
    pub refs: Vec<String>,
}

/// Run the rm command
pub async fn run(ctx: &Context, args: &RmArgs) -> Result<()> {
    let mut index = ctx.open_index()?;
    for removed in index.remove(&args.refs)? {
        success(&format!("Removed {removed}"));
    }
    Ok(())
}
