//! Pull command - download a package from its registry.

use super::CredentialArgs;
use crate::context::Context;
use crate::output::progress::Spinner;
use crate::output::{info, success};
use anyhow::Result;
use artisan_core::PackageName;
use artisan_registry::PullOutcome;
use clap::Args;

/// Arguments for the pull command
#[derive(Args, Debug, Clone)]
pub struct PullArgs {
    /// Package name, including the registry domain
    pub name: String,

    #[command(flatten)]
    pub auth: CredentialArgs,
}

/// Run the pull command
pub async fn run(ctx: &Context, args: &PullArgs) -> Result<()> {
    let name = PackageName::parse(&args.name)?;
    let mut client = ctx.registry_client()?;

    let spinner = Spinner::new(format!("Pulling {name}"));
    let outcome = client.pull(&name, &args.auth.resolve()).await;
    spinner.finish_and_clear();

    match outcome? {
        PullOutcome::AlreadyPresent => info(&format!("{name} is up to date")),
        PullOutcome::Tagged => success(&format!("Tagged {name} from local content")),
        PullOutcome::Downloaded => success(&format!("Pulled {name}")),
    }
    Ok(())
}
