//! # strandd
//!
//! The strand storage daemon.
//!
//! ## Architecture
//!
//! One process manages a set of drive roots:
//! - builds the virtual tree for every configured drive at startup
//! - keeps it current with watch-triggered, debounced re-scans
//! - serves the control surface (lookups, scans, copy tasks) over a
//!   Unix domain socket with framed JSON messages

pub mod commands;
pub mod frame;
pub mod protocol;
pub mod socket;
pub mod watch;

use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{info, warn};

use strand_config::Config;
use strand_vfs::{Vfs, VfsEvent};

use commands::CommandHandler;

/// Main daemon entry point.
pub async fn run_daemon(config: Config) -> Result<()> {
    let (event_tx, mut event_rx) = mpsc::channel::<VfsEvent>(64);
    let vfs = Vfs::with_events(event_tx);

    // Build the tree for every configured drive.
    for drive in &config.drives {
        vfs.create_root(drive.uuid, drive.path.clone())
            .await
            .with_context(|| format!("failed to register drive {}", drive.path.display()))?;
        info!(
            uuid = %drive.uuid,
            path = %drive.path.display(),
            label = drive.label.as_deref().unwrap_or(""),
            "drive ready"
        );
    }

    // Scan-completion log drain.
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            let VfsEvent::ScanCompleted { root } = event;
            info!(root = %root, "scan settled");
        }
    });

    // Re-scan pipeline: consumer first, then the watch producers.
    let (trigger_tx, trigger_rx) = mpsc::channel(1024);
    tokio::spawn(watch::run_rescan_consumer(vfs.clone(), trigger_rx));
    if config.watch.enabled {
        let debounce = Duration::from_millis(config.watch.debounce_ms);
        for drive in &config.drives {
            match watch::spawn_watch(drive.uuid, drive.path.clone(), debounce, trigger_tx.clone())
            {
                Ok(_handle) => {}
                Err(e) => {
                    warn!(path = %drive.path.display(), error = %e, "watch unavailable for drive");
                }
            }
        }
    }

    let handler = CommandHandler::new(vfs, config.copy.clone());
    let socket_path = config.daemon.socket.clone();

    tokio::select! {
        result = socket::run_listener(&socket_path, handler) => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal");
        }
    }

    Ok(())
}
