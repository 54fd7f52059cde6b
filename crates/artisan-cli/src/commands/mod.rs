//! CLI commands for Artisan.

pub mod import;
pub mod ls;
pub mod prune;
pub mod pull;
pub mod push;
pub mod remote;
pub mod rm;
pub mod save;
pub mod serve;
pub mod tag;

use artisan_core::Credentials;
use artisan_registry::TlsMode;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Artisan - build, tag and distribute sealed packages
#[derive(Parser, Debug)]
#[command(name = "artisan")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only print errors
    #[arg(short = 's', long = "silent", global = true)]
    pub quiet: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Force ANSI colors
    #[arg(long, global = true, conflicts_with = "no_ansi")]
    pub ansi: bool,

    /// Disable ANSI colors
    #[arg(long, global = true)]
    pub no_ansi: bool,

    /// Local registry directory
    #[arg(long, global = true, env = artisan_registry::HOME_ENV)]
    pub home: Option<PathBuf>,

    /// How to reach remote registries
    #[arg(long, global = true, value_enum, default_value_t = TlsArg::Probe)]
    pub tls: TlsArg,

    /// Per-request timeout in seconds
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    /// Attempts per remote call
    #[arg(long, global = true)]
    pub retries: Option<u32>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List local packages
    #[command(alias = "list")]
    Ls(ls::LsArgs),

    /// Give a local package another name
    Tag(tag::TagArgs),

    /// Remove local packages by name or id
    Rm(rm::RmArgs),

    /// Remove every untagged local package
    Prune(prune::PruneArgs),

    /// Upload a package to its registry
    Push(push::PushArgs),

    /// Download a package from its registry
    Pull(pull::PullArgs),

    /// Inspect and clean up a remote registry
    Remote(remote::RemoteArgs),

    /// Write packages to a tar archive
    Save(save::SaveArgs),

    /// Load packages from a tar archive
    Import(import::ImportArgs),

    /// Run the registry server
    Serve(serve::ServeArgs),
}

/// `--tls` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TlsArg {
    /// HTTPS, falling back to HTTP with a warning
    Probe,
    /// HTTPS only
    Require,
    /// Plain HTTP
    Disable,
}

impl From<TlsArg> for TlsMode {
    fn from(arg: TlsArg) -> Self {
        match arg {
            TlsArg::Probe => Self::Probe,
            TlsArg::Require => Self::Require,
            TlsArg::Disable => Self::Disable,
        }
    }
}

/// Registry credentials accepted by network commands.
#[derive(Args, Debug, Clone)]
pub struct CredentialArgs {
    /// Registry credentials as user:password
    #[arg(short = 'u', long = "user", env = "ARTISAN_CREDENTIALS", hide_env_values = true)]
    pub credentials: Option<Credentials>,
}

impl CredentialArgs {
    /// Credentials, empty when none were given.
    pub fn resolve(&self) -> Credentials {
        self.credentials.clone().unwrap_or_default()
    }
}
