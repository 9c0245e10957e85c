//! strandd - strand storage daemon
//!
//! Usage:
//!   strandd --drive /srv/strand/vol1 --socket /run/strand/strandd.sock

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use uuid::Uuid;

use strand_config::logging::{init_logging, LogLevel};
use strand_config::{Config, DriveEntry};

/// strand storage daemon
#[derive(Parser)]
#[command(name = "strandd", version, about)]
struct Cli {
    /// Drive root to manage, in addition to configured drives
    /// (repeatable; gets a fresh uuid each run)
    #[arg(long = "drive", value_name = "DIR")]
    drives: Vec<PathBuf>,

    /// Control socket path (overrides config)
    #[arg(long, value_name = "PATH")]
    socket: Option<PathBuf>,

    /// Log level when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: LogLevel,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level);

    let mut config = Config::load().context("failed to load configuration")?;

    for path in cli.drives {
        let path = path
            .canonicalize()
            .with_context(|| format!("drive root does not resolve: {}", path.display()))?;
        let uuid = Uuid::new_v4();
        info!(uuid = %uuid, path = %path.display(), "ad-hoc drive");
        config.drives.push(DriveEntry {
            uuid,
            path,
            label: None,
        });
    }
    if let Some(socket) = cli.socket {
        config.daemon.socket = socket;
    }

    if config.drives.is_empty() {
        anyhow::bail!("no drives configured; pass --drive or populate config.toml");
    }

    strandd::run_daemon(config).await
}
