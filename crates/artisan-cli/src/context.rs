//! Settings shared by every command.

use crate::commands::Cli;
use artisan_registry::{ClientConfig, LocalIndex, RegistryClient, RegistryHome};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Resolved global options.
#[derive(Debug, Clone)]
pub struct Context {
    /// Local registry home.
    pub home: RegistryHome,
    /// Network settings.
    pub client: ClientConfig,
}

impl Context {
    /// Resolve the home directory and network settings from the global flags.
    pub fn new(cli: &Cli) -> anyhow::Result<Self> {
        let force_ansi = match (cli.ansi, cli.no_ansi) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        };
        crate::output::init(force_ansi, cli.quiet);

        let home = match &cli.home {
            Some(dir) => RegistryHome::new(dir),
            None => RegistryHome::from_env()?,
        };
        let mut client = ClientConfig {
            tls: cli.tls.into(),
            ..ClientConfig::default()
        };
        if let Some(secs) = cli.timeout {
            client.timeout = Duration::from_secs(secs);
        }
        if let Some(attempts) = cli.retries {
            client.attempts = attempts.max(1);
        }
        debug!(home = %home.root().display(), tls = ?client.tls, "context ready");
        Ok(Self { home, client })
    }

    /// Open the local index.
    pub fn open_index(&self) -> anyhow::Result<LocalIndex> {
        Ok(LocalIndex::open(self.home.clone())?)
    }

    /// Protocol client over the local index; Ctrl-C cancels its retries.
    pub fn registry_client(&self) -> anyhow::Result<RegistryClient> {
        let client = RegistryClient::new(self.open_index()?, self.client.clone());
        cancel_on_ctrl_c(client.cancellation_token());
        Ok(client)
    }
}

/// Cancel `token` when the user presses Ctrl-C.
pub fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            debug!("interrupted");
            token.cancel();
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use artisan_registry::TlsMode;
    use clap::Parser;

    #[test]
    fn flags_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let home = dir.path().to_string_lossy().into_owned();
        let cli = Cli::try_parse_from([
            "artisan", "--home", &home, "--tls", "require", "--timeout", "5", "--retries", "0",
            "ls",
        ])
        .unwrap();

        let ctx = Context::new(&cli).unwrap();
        assert_eq!(ctx.home.root(), dir.path());
        assert_eq!(ctx.client.tls, TlsMode::Require);
        assert_eq!(ctx.client.timeout, Duration::from_secs(5));
        assert_eq!(ctx.client.attempts, 1);

        let index = ctx.open_index().unwrap();
        assert!(index.list().is_empty());
    }
}
