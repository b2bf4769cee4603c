use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use unifi_backup::config::{Config, LoggingConfig};
use unifi_backup::controller::{UnifiClient, UnifiClientOptions};
use unifi_backup::logging;
use unifi_backup::pipeline::{BackupPipeline, PipelineSettings};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const COMMIT: &str = match option_env!("GIT_COMMIT") {
    Some(commit) => commit,
    None => "unknown",
};

// ============================================================================
// CLI Types
// ============================================================================

/// Back up a UniFi Network controller to local, cloud or SMB storage
#[derive(Parser, Debug)]
#[command(name = "unifi-backup", about, long_about = None, disable_version_flag = true)]
struct Cli {
    /// Path to configuration file (YAML or JSON)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Show version information and exit
    #[arg(short = 'V', long)]
    version: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show version information and exit
    Version,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.version || matches!(cli.command, Some(Command::Version)) {
        println!("unifi-backup {} (commit {})", VERSION, COMMIT);
        return ExitCode::SUCCESS;
    }

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            logging::init(&LoggingConfig::default());
            error!(error = %e, "Failed to load configuration");
            return ExitCode::FAILURE;
        }
    };
    logging::init(&config.logging);

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    match run(&config, cancel).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %format!("{:#}", e), "Backup failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: &Config, cancel: CancellationToken) -> Result<()> {
    info!(
        version = VERSION,
        base_url = %config.unifi.url,
        site = %config.unifi.site,
        include_days = config.unifi.include_days,
        "Starting UniFi backup"
    );

    let settings = PipelineSettings::from_config(config)?;
    let client = UnifiClient::new(
        config.unifi.url.as_str(),
        UnifiClientOptions {
            site: config.unifi.site.clone(),
            insecure_skip_verify: config.unifi.insecure_skip_verify,
            timeout: config.timeout()?,
        },
    )
    .context("failed to create UniFi client")?;

    let report = BackupPipeline::new(client, settings)
        .with_cancellation(cancel)
        .run(&config.storage.url)
        .await
        .context("backup run failed")?;

    if let Some(cleanup) = &report.cleanup {
        info!(
            deleted = cleanup.deleted.len(),
            failed = cleanup.failed.len(),
            remaining = cleanup.remaining(),
            "Retention applied"
        );
    }
    Ok(())
}

// ============================================================================
// Signals
// ============================================================================

async fn cancel_on_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, cancelling backup..."),
        _ = terminate => info!("Received SIGTERM, cancelling backup..."),
    }
    cancel.cancel();
}
