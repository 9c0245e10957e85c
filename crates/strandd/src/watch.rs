//! Filesystem watch driving live re-scans.
//!
//! One watcher thread per drive root coalesces event bursts inside a
//! debounce window and emits a single re-scan trigger; a single
//! consumer task performs the scans so they never overlap.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use strand_vfs::Vfs;

/// Watch one drive root; sends the drive uuid whenever activity
/// settles for `debounce`.
pub fn spawn_watch(
    root: Uuid,
    path: PathBuf,
    debounce: Duration,
    tx: mpsc::Sender<Uuid>,
) -> notify::Result<std::thread::JoinHandle<()>> {
    let (raw_tx, raw_rx) = std::sync::mpsc::channel();
    let mut watcher = RecommendedWatcher::new(
        move |res| {
            let _ = raw_tx.send(res);
        },
        notify::Config::default(),
    )?;
    watcher.watch(&path, RecursiveMode::Recursive)?;
    info!(root = %root, path = %path.display(), "filesystem watch started");

    let handle = std::thread::spawn(move || {
        // Owns the watcher for its lifetime.
        let _watcher = watcher;
        loop {
            match raw_rx.recv() {
                Ok(_event) => {
                    // Coalesce the burst: keep draining until the
                    // window stays quiet.
                    let mut deadline = Instant::now() + debounce;
                    while raw_rx
                        .recv_timeout(deadline.saturating_duration_since(Instant::now()))
                        .is_ok()
                    {
                        deadline = Instant::now() + debounce;
                    }
                    debug!(root = %root, "change burst settled, triggering re-scan");
                    if tx.blocking_send(root).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
        debug!(root = %root, "filesystem watch stopped");
    });
    Ok(handle)
}

/// Consume re-scan triggers one at a time.
pub async fn run_rescan_consumer(vfs: Vfs, mut rx: mpsc::Receiver<Uuid>) {
    while let Some(root) = rx.recv().await {
        if let Err(e) = vfs.scan_root(root).await {
            warn!(root = %root, error = %e, "triggered re-scan failed");
        }
    }
}
