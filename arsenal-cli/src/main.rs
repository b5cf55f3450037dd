use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

mod args;
mod runner;

use args::{Args, Command};
use arsenal_core::config::ArsenalConfig;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let default_filter = match args.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &args.config {
        Some(path) => ArsenalConfig::from_file(path)?,
        None => ArsenalConfig::load_default(),
    };
    config.expand_env_vars();

    // Ctrl-C cancels in-flight scan work, including child processes
    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_token.cancel();
        }
    });

    match &args.command {
        Command::List => runner::list(&config).await,
        Command::Install { id } => {
            runner::require_known_tool(id)?;
            runner::install(&config, id).await
        }
        Command::InstallAll => runner::install_all(&config).await,
        Command::Update { id } => {
            runner::require_known_tool(id)?;
            runner::update(&config, id).await
        }
        Command::UpdateAll => runner::update_all(&config).await,
        Command::Check => runner::check(&config).await,
        Command::Scan {
            target,
            budget,
            model,
        } => {
            if let Some(model) = model {
                config.provider.model = model.clone();
            }
            runner::scan(&config, target, *budget, cancel.clone()).await
        }
    }
}
