use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};

use launch_server::config::CONFIG_FILE_NAME;
use launch_server::utils::logging::init_logging;
use launch_server::{LaunchServer, LaunchServerConfig, Result};

/// Signed update distribution and player authentication for game launchers.
#[derive(Parser)]
#[command(name = "launch-server", version, about, long_about = None)]
struct Cli {
    /// Server directory; relative paths in the config resolve against it
    #[arg(short, long, default_value = ".")]
    dir: PathBuf,

    /// Config file, created with defaults when missing
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Build the launcher artifact and exit
    #[arg(long)]
    build_only: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| cli.dir.join(CONFIG_FILE_NAME));

    let mut config = LaunchServerConfig::load_or_create(&config_path)?;
    config.apply_env();
    init_logging(&config.logging)?;
    info!(config = %config_path.display(), "Configuration loaded");

    if cli.build_only {
        let report = LaunchServer::build_launcher(&cli.dir, config)?;
        info!(output = %report.output.display(), "Launcher built");
        return Ok(());
    }

    let server = LaunchServer::start(&cli.dir, config).await?;
    wait_for_shutdown(&server).await?;
    server.close().await;
    Ok(())
}

/// SIGHUP triggers a full resync; Ctrl-C stops the server.
#[cfg(unix)]
async fn wait_for_shutdown(server: &LaunchServer) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup())?;
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => return Ok(result?),
            _ = hangup.recv() => {
                info!("SIGHUP received, resyncing");
                if let Err(e) = server.request_resync(None).await {
                    error!(error = %e, "Resync failed");
                }
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown(_server: &LaunchServer) -> Result<()> {
    Ok(tokio::signal::ctrl_c().await?)
}
