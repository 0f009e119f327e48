//! Birtu CLI entry point

use std::path::Path;

use clap::Parser;
use tracing::{error, info};

use birtu_cli::{app::BirtuApp, cli::Cli, commands::CommandDispatcher, config::AppConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::resolve(cli.config.as_deref().map(Path::new))?;
    setup_logging(cli.verbose || config.cli.verbose);

    // Flags win over the environment, which wins over the file
    config.apply_env_overrides();
    if let Some(base_url) = &cli.base_url {
        config.channel.base_url = base_url.clone();
    }
    if let Some(data_dir) = &cli.data_dir {
        config.session.data_dir = Some(data_dir.into());
    }

    let app = BirtuApp::new(config)?;

    if let Err(e) = CommandDispatcher::execute(cli.command, app).await {
        error!("Command failed: {}", e);
        std::process::exit(1);
    }

    info!("Birtu CLI exited successfully");
    Ok(())
}

/// Setup logging based on verbosity level
fn setup_logging(verbose: bool) {
    let log_level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
