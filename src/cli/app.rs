use anyhow::Result;
use clap::Parser;
use flowreplay_cli::config::{load_config, load_local_env_overrides, Config, LoadedConfig};
use tracing::{debug, error, info};

use super::candidates::cmd_candidates;
use super::commands::Commands;
use super::env::CliArgs;
use super::inspect::cmd_inspect;
use super::replay::cmd_replay;
use super::runtime::init_logging;

pub async fn run() -> Result<()> {
    load_local_env_overrides();
    let cli = CliArgs::parse();

    let LoadedConfig { config, path } = load_config(cli.config.as_deref()).await?;
    let log_dir = cli.log_dir.clone().or_else(|| config.logging.dir.clone());
    let _log_guard = init_logging(
        &cli.log_level,
        cli.debug,
        cli.log_json || config.logging.json,
        log_dir.as_deref(),
    )?;

    info!("Starting flowreplay v{}", env!("CARGO_PKG_VERSION"));
    match &path {
        Some(path) => info!(path = %path.display(), "configuration loaded"),
        None => debug!("no config file found, using defaults"),
    }

    match dispatch(&cli, &config).await {
        Ok(()) => {
            info!("Command completed successfully");
            Ok(())
        }
        Err(err) => {
            error!("Command failed: {:#}", err);
            Err(err)
        }
    }
}

async fn dispatch(cli: &CliArgs, config: &Config) -> Result<()> {
    match cli.command.clone() {
        Commands::Replay(args) => cmd_replay(args, config, cli.output).await,
        Commands::Candidates(args) => cmd_candidates(args, cli.output).await,
        Commands::Inspect(args) => cmd_inspect(args, cli.output).await,
    }
}
