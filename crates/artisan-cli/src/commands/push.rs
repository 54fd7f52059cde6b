//! Push command - upload a package to its registry.

use super::CredentialArgs;
use crate::context::Context;
use crate::output::progress::Spinner;
use crate::output::{info, success};
use anyhow::Result;
use artisan_core::PackageName;
use artisan_registry::PushOutcome;
use clap::Args;

/// Arguments for the push command
#[derive(Args, Debug, Clone)]
pub struct PushArgs {
    /// Package name, including the registry domain
    pub name: String,

    #[command(flatten)]
    pub auth: CredentialArgs,
}

/// Run the push command
pub async fn run(ctx: &Context, args: &PushArgs) -> Result<()> {
    let name = PackageName::parse(&args.name)?;
    let client = ctx.registry_client()?;

    let spinner = Spinner::new(format!("Pushing {name}"));
    let outcome = client.push(&name, &args.auth.resolve()).await;
    spinner.finish_and_clear();

    match outcome? {
        PushOutcome::NothingToPush => info(&format!("{name} is already on {}", name.domain())),
        PushOutcome::TagPushed => success(&format!("Tagged {name} on the remote")),
        PushOutcome::Uploaded => success(&format!("Pushed {name}")),
    }
    Ok(())
}
