//! Tag command - name an indexed package.

use crate::context::Context;
use crate::output::success;
use anyhow::Result;
use artisan_core::PackageName;
use clap::Args;

/// Arguments for the tag command
#[derive(Args, Debug, Clone)]
pub struct TagArgs {
    /// Existing package name
    pub source: String,

    /// New name for the same package
    pub target: String,
}

/// Run the tag command
pub async fn run(ctx: &Context, args: &TagArgs) -> Result<()> {
    let source = PackageName::parse(&args.source)?;
    let target = PackageName::parse(&args.target)?;
    let mut index = ctx.open_index()?;
    index.tag(&source, &target)?;
    success(&format!("Tagged {source} as {target}"));
    Ok(())
}
