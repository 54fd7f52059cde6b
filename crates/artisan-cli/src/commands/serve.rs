//! Serve command - run the registry server.

use crate::output::info;
use anyhow::Result;
use artisan_server::{Server, ServerConfig, shutdown_signal};
use clap::Args;

/// Arguments for the serve command
#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Port to listen on, overriding the environment
    #[arg(short, long)]
    pub port: Option<u16>,
}

/// Run the serve command
pub async fn run(args: &ServeArgs) -> Result<()> {
    let mut config = ServerConfig::from_env()?;
    if let Some(port) = args.port {
        config.port = port;
    }

    let server = Server::bind(&config).await?;
    info(&format!("Listening on {}", server.local_addr()?));
    server.run(shutdown_signal()).await?;
    Ok(())
}
