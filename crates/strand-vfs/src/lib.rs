//! # strand-vfs
//!
//! An in-memory, uuid-addressed tree over native directory trees.
//!
//! Each managed drive root anchors one subtree. The tree is built and
//! kept current by scanning the underlying filesystem through the
//! identity layer, so every node's uuid equals the identity record of
//! the entry it mirrors. The filesystem can change outside our control
//! at any time; scans are therefore incremental and guarded by
//! per-directory generation counters, and every structural mutation is
//! applied atomically between suspension points.

mod forest;
mod node;

pub use node::NodeSummary;

use std::fs;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, RwLock};

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use strand_xstat::{self as xstat, EntryKind, XstatError};

use forest::{DriveRoot, Forest};
use node::{Node, ScannedEntry};

/// Give up applying a scan after this many generation collisions.
const MAX_SCAN_RETRIES: u32 = 3;

/// Errors that can occur during tree operations
#[derive(Debug, Error)]
pub enum VfsError {
    #[error("node not found: {0}")]
    NodeNotFound(Uuid),

    #[error("not a directory: {0}")]
    NotADirectory(Uuid),

    #[error("drive root already registered: {0}")]
    RootExists(Uuid),

    #[error("scan kept losing to concurrent changes under {0}")]
    ScanContention(Uuid),

    #[error(transparent)]
    Xstat(#[from] XstatError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, VfsError>;

/// Tree lifecycle notifications for daemon consumers.
#[derive(Debug, Clone)]
pub enum VfsEvent {
    /// A root's recursive scan settled.
    ScanCompleted { root: Uuid },
}

/// The virtual tree: drive forests plus registered native mounts.
///
/// Cheap to clone; all clones share the same arena.
#[derive(Clone, Default)]
pub struct Vfs {
    inner: Arc<RwLock<Forest>>,
    events: Option<mpsc::Sender<VfsEvent>>,
}

impl Vfs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach an event channel; scan completions are reported there.
    pub fn with_events(events: mpsc::Sender<VfsEvent>) -> Self {
        Self {
            inner: Arc::default(),
            events: Some(events),
        }
    }

    // -----------------------------------------------------------------
    // Roots
    // -----------------------------------------------------------------

    /// Register a drive root and build its tree with a full recursive
    /// scan.
    pub async fn create_root(&self, uuid: Uuid, path: PathBuf) -> Result<()> {
        {
            let mut forest = self.inner.write().unwrap();
            if forest.drives.iter().any(|d| d.uuid == uuid) {
                return Err(VfsError::RootExists(uuid));
            }
            let meta = fs::symlink_metadata(&path)?;
            if !meta.is_dir() {
                return Err(VfsError::NotADirectory(uuid));
            }
            let mtime = xstat::mtime_ms(&meta)?;
            forest.drives.push(DriveRoot {
                uuid,
                path: path.clone(),
            });
            forest
                .nodes
                .insert(uuid, Node::new_dir(uuid, String::new(), None, mtime));
        }
        info!(root = %uuid, path = %path.display(), "drive root registered");
        self.scan_root(uuid).await
    }

    /// Register an unmanaged mount. Entries below it carry no identity
    /// records and are never mirrored into the tree.
    pub fn add_native_root(&self, path: PathBuf) {
        let mut forest = self.inner.write().unwrap();
        if !forest.natives.contains(&path) {
            forest.natives.push(path);
        }
    }

    pub fn native_roots(&self) -> Vec<PathBuf> {
        self.inner.read().unwrap().natives.clone()
    }

    /// Registered drives as `(uuid, path)` pairs.
    pub fn drives(&self) -> Vec<(Uuid, PathBuf)> {
        let forest = self.inner.read().unwrap();
        forest
            .drives
            .iter()
            .map(|d| (d.uuid, d.path.clone()))
            .collect()
    }

    /// Drive root owning the given directory path, if any.
    pub fn drive_for_path(&self, path: &Path) -> Option<Uuid> {
        let forest = self.inner.read().unwrap();
        forest
            .drives
            .iter()
            .find(|d| path.starts_with(&d.path))
            .map(|d| d.uuid)
    }

    // -----------------------------------------------------------------
    // Scanning
    // -----------------------------------------------------------------

    /// Re-scan a whole drive and emit a completion event.
    pub async fn scan_root(&self, root: Uuid) -> Result<()> {
        self.scan(root).await?;
        if let Some(events) = &self.events {
            let _ = events.send(VfsEvent::ScanCompleted { root }).await;
        }
        Ok(())
    }

    /// Scan one directory node: list its entries, identify each,
    /// reconcile the children, and recurse into sub-directories. The
    /// returned future resolves once the subtree has settled.
    pub fn scan<'a>(
        &'a self,
        dir: Uuid,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let mut child_dirs = None;

            for _ in 0..MAX_SCAN_RETRIES {
                // Capture the directory's location and generation.
                let (path, generation) = {
                    let forest = self.inner.read().unwrap();
                    (forest.path_of(dir)?, forest.dir_generation(dir)?)
                };

                // Listing and identity reads happen without the lock;
                // the filesystem may drift underneath us meanwhile.
                let listing = list_dir(&path)?;

                // Apply atomically, unless a newer structural change
                // already won.
                let applied = {
                    let mut forest = self.inner.write().unwrap();
                    if forest.dir_generation(dir)? != generation {
                        None
                    } else {
                        Some(forest.reconcile(dir, listing)?)
                    }
                };

                match applied {
                    Some(dirs) => {
                        child_dirs = Some(dirs);
                        break;
                    }
                    None => {
                        debug!(dir = %dir, "scan result stale, retrying");
                        continue;
                    }
                }
            }

            let child_dirs = child_dirs.ok_or(VfsError::ScanContention(dir))?;
            for child in child_dirs {
                // A child may vanish between apply and recursion.
                match self.scan(child).await {
                    Ok(()) => {}
                    Err(VfsError::NodeNotFound(_)) => {}
                    Err(e) => return Err(e),
                }
            }
            Ok(())
        })
    }

    // -----------------------------------------------------------------
    // Lookups
    // -----------------------------------------------------------------

    pub fn find_by_uuid(&self, uuid: Uuid) -> Option<NodeSummary> {
        let forest = self.inner.read().unwrap();
        forest.nodes.get(&uuid).map(NodeSummary::of)
    }

    /// First node carrying `name`; with a hint, only nodes whose parent
    /// is named `parent_name_hint` match. Order among equally named
    /// nodes is unspecified.
    pub fn find_by_name(&self, name: &str, parent_name_hint: Option<&str>) -> Option<NodeSummary> {
        let forest = self.inner.read().unwrap();
        forest
            .nodes
            .values()
            .filter(|n| n.name == name)
            .find(|n| match parent_name_hint {
                None => true,
                Some(hint) => n
                    .parent
                    .and_then(|p| forest.nodes.get(&p))
                    .is_some_and(|p| p.name == hint),
            })
            .map(NodeSummary::of)
    }

    /// Absolute path of a node.
    pub fn node_path(&self, uuid: Uuid) -> Result<PathBuf> {
        self.inner.read().unwrap().path_of(uuid)
    }

    /// Drive root owning a node.
    pub fn node_drive(&self, uuid: Uuid) -> Result<Uuid> {
        self.inner.read().unwrap().drive_of(uuid)
    }

    /// Immediate children of a directory node.
    pub fn children(&self, dir: Uuid) -> Result<Vec<NodeSummary>> {
        let forest = self.inner.read().unwrap();
        match &forest.node(dir)?.kind {
            node::NodeKind::Dir { children, .. } => Ok(children
                .values()
                .filter_map(|u| forest.nodes.get(u))
                .map(NodeSummary::of)
                .collect()),
            node::NodeKind::File { .. } => Err(VfsError::NotADirectory(dir)),
        }
    }

    /// Total number of live nodes, drive roots included.
    pub fn node_count(&self) -> usize {
        self.inner.read().unwrap().nodes.len()
    }
}

/// List a directory's immediate entries through the identity layer.
///
/// Unsupported entry kinds are skipped, as are entries that vanish
/// mid-listing and in-flight temp files.
fn list_dir(path: &Path) -> Result<Vec<ScannedEntry>> {
    let mut out = Vec::new();
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.ends_with(strand_fs::TMP_SUFFIX) {
            continue;
        }
        let entry_path = entry.path();
        match xstat::identify(&entry_path) {
            Ok((kind, record)) => {
                let meta = match fs::symlink_metadata(&entry_path) {
                    Ok(m) => m,
                    Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                    Err(e) => return Err(e.into()),
                };
                out.push(ScannedEntry {
                    name,
                    kind,
                    mtime_ms: xstat::mtime_ms(&meta)?,
                    size: if kind == EntryKind::File { meta.len() } else { 0 },
                    record,
                });
            }
            Err(XstatError::UnsupportedEntryType) => {
                debug!(path = %entry_path.display(), "skipping special entry");
            }
            Err(XstatError::NotFound) => {}
            Err(XstatError::Io(e)) => {
                warn!(path = %entry_path.display(), error = %e, "identity read failed");
                return Err(XstatError::Io(e).into());
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(out)
}
