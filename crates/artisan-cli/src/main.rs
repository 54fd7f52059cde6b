//! Artisan CLI - build, tag and distribute sealed packages.
//!
//! Manages the local package index, moves packages to and from remote
//! registries, and runs the registry server itself.

#![deny(clippy::all)]
#![allow(clippy::module_name_repetitions)]

mod commands;
mod context;
mod output;

use clap::Parser;
use commands::{Cli, Commands};
use context::Context;
use std::process::ExitCode;
use tracing::Level;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 if cli.quiet => Level::ERROR,
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let filter = EnvFilter::builder()
        .with_default_directive(log_level.into())
        .from_env_lossy();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if cli.log_json {
        subscriber.json().init();
    } else {
        subscriber.without_time().init();
    }

    let ctx = match Context::new(&cli) {
        Ok(ctx) => ctx,
        Err(e) => {
            output::error(&format!("Failed to initialize: {e:#}"));
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            output::error(&format!("Failed to start the async runtime: {e}"));
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run_command(&cli, &ctx)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            output::error(&format!("{e:#}"));
            ExitCode::FAILURE
        }
    }
}

async fn run_command(cli: &Cli, ctx: &Context) -> anyhow::Result<()> {
    match &cli.command {
        // Local index
        Commands::Ls(args) => commands::ls::run(ctx, args).await,
        Commands::Tag(args) => commands::tag::run(ctx, args).await,
        Commands::Rm(args) => commands::rm::run(ctx, args).await,
        Commands::Prune(args) => commands::prune::run(ctx, args).await,
        Commands::Save(args) => commands::save::run(ctx, args).await,
        Commands::Import(args) => commands::import::run(ctx, args).await,

        // Remote registries
        Commands::Push(args) => commands::push::run(ctx, args).await,
        Commands::Pull(args) => commands::pull::run(ctx, args).await,
        Commands::Remote(args) => commands::remote::run(ctx, args).await,

        Commands::Serve(args) => commands::serve::run(args).await,
    }
}
