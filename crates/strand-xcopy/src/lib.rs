//! # strand-xcopy
//!
//! The tree-copy task engine: replicates a selected set of entries from
//! a source location into a destination location, recursively for
//! directories, across four operation kinds:
//!
//! - `copy` / `move`: both endpoints inside the virtual tree
//! - `import` / `export`: one endpoint is an unmanaged native mount
//!
//! Every selected entry becomes a task node driven through a state
//! machine; name/type collisions park the node in `Conflict` until a
//! policy arrives through the control surface. One controller task owns
//! the whole tree; see [`create`] and [`XcopyTask`].

pub mod policy;
pub mod state;
mod task;
pub mod view;

pub use policy::{NodePatch, Policies, PolicyKind, TypedPolicy};
pub use state::NodeState;
pub use view::{NodeView, TaskView};

use std::fs;
use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use uuid::Uuid;

use strand_fs::{FsError, Policy};
use strand_vfs::{Vfs, VfsError};
use strand_xstat::{self as xstat, EntryKind, XstatError};

use task::{ChildSpec, Cmd, Engine};

/// Queue depth for control commands.
const CMD_CHANNEL_CAPACITY: usize = 16;

/// Directional composition of internal/external endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum XcopyKind {
    Copy,
    Move,
    Import,
    Export,
}

/// One endpoint of a task: a directory inside a managed drive, or a
/// path on an unmanaged native mount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Location {
    Vfs { drive: Uuid, dir: Uuid },
    Native { path: PathBuf },
}

/// Errors surfaced by the copy engine
#[derive(Debug, Error)]
pub enum XcopyError {
    #[error("unknown task node: {0}")]
    UnknownNode(Uuid),

    #[error("operation kind does not match endpoint domains")]
    InvalidEndpoints,

    #[error("source entry not found: {0}")]
    MissingEntry(String),

    #[error("task is no longer running")]
    TaskGone,

    #[error(transparent)]
    Vfs(#[from] VfsError),

    #[error(transparent)]
    Fs(#[from] FsError),

    #[error(transparent)]
    Xstat(#[from] XstatError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, XcopyError>;

/// Creation parameters for one task.
#[derive(Debug, Clone)]
pub struct XcopyRequest {
    pub kind: XcopyKind,
    pub src: Location,
    pub dst: Location,
    /// Names of the selected entries inside the source directory.
    pub entries: Vec<String>,
    /// Task-level policy defaults; per-node overrides arrive later via
    /// the control surface.
    pub policies: Policies,
    pub dir_concurrency: usize,
    pub file_concurrency: usize,
}

impl XcopyRequest {
    pub fn new(kind: XcopyKind, src: Location, dst: Location, entries: Vec<String>) -> Self {
        Self {
            kind,
            src,
            dst,
            entries,
            policies: Policies::default(),
            dir_concurrency: 2,
            file_concurrency: 4,
        }
    }
}

/// Build the task tree for the selected entries and start the
/// controller. The returned handle is the only owner; dropping it
/// tears the controller down once in-flight work settles.
pub async fn create(vfs: &Vfs, req: XcopyRequest) -> Result<XcopyTask> {
    let (managed_src, managed_dst) = match req.kind {
        XcopyKind::Copy | XcopyKind::Move => (true, true),
        XcopyKind::Import => (false, true),
        XcopyKind::Export => (true, false),
    };

    let src_dir = resolve_endpoint(vfs, &req.src, managed_src)?;
    let dst_dir = resolve_endpoint(vfs, &req.dst, managed_dst)?;

    let (stopped_tx, stopped_rx) = watch::channel(false);
    let id = Uuid::new_v4();
    let mut engine = Engine::new(
        id,
        req.kind,
        dst_dir.clone(),
        req.policies,
        req.dir_concurrency,
        req.file_concurrency,
        managed_src,
        managed_dst,
        stopped_tx,
    );

    for name in &req.entries {
        let spec = entry_spec(&src_dir, name, managed_src)?;
        engine.add_root(spec, dst_dir.clone());
    }

    let (cmd_tx, cmd_rx) = mpsc::channel(CMD_CHANNEL_CAPACITY);
    tokio::spawn(engine.run(cmd_rx));

    Ok(XcopyTask {
        id,
        cmd_tx,
        stopped_rx,
    })
}

fn resolve_endpoint(vfs: &Vfs, loc: &Location, managed: bool) -> Result<PathBuf> {
    match (loc, managed) {
        (Location::Vfs { drive, dir }, true) => {
            if vfs.node_drive(*dir)? != *drive {
                return Err(XcopyError::InvalidEndpoints);
            }
            let node = vfs
                .find_by_uuid(*dir)
                .ok_or(VfsError::NodeNotFound(*dir))?;
            if node.kind != EntryKind::Dir {
                return Err(VfsError::NotADirectory(*dir).into());
            }
            Ok(vfs.node_path(*dir)?)
        }
        (Location::Native { path }, false) => {
            let meta = match fs::symlink_metadata(path) {
                Ok(m) => m,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    return Err(FsError::NotFound.into())
                }
                Err(e) => return Err(e.into()),
            };
            if !meta.is_dir() {
                return Err(FsError::NotADirectory.into());
            }
            Ok(path.clone())
        }
        _ => Err(XcopyError::InvalidEndpoints),
    }
}

/// Identify one selected entry of the source directory.
fn entry_spec(src_dir: &std::path::Path, name: &str, managed_src: bool) -> Result<ChildSpec> {
    let path = src_dir.join(name);
    if managed_src {
        let (kind, record) = match xstat::identify(&path) {
            Ok(v) => v,
            Err(XstatError::NotFound) => return Err(XcopyError::MissingEntry(name.to_string())),
            Err(e) => return Err(e.into()),
        };
        let meta = fs::symlink_metadata(&path)?;
        Ok(ChildSpec {
            name: name.to_string(),
            kind,
            size: if kind == EntryKind::File { meta.len() } else { 0 },
            src_uuid: Some(record.uuid),
            src_mtime_ms: xstat::mtime_ms(&meta)?,
            expected_hash: record.hash,
            src_path: path,
        })
    } else {
        let meta = match fs::symlink_metadata(&path) {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(XcopyError::MissingEntry(name.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let ft = meta.file_type();
        let kind = if ft.is_dir() {
            EntryKind::Dir
        } else if ft.is_file() {
            EntryKind::File
        } else {
            return Err(XstatError::UnsupportedEntryType.into());
        };
        Ok(ChildSpec {
            name: name.to_string(),
            kind,
            size: if kind == EntryKind::File { meta.len() } else { 0 },
            src_uuid: None,
            src_mtime_ms: xstat::mtime_ms(&meta)?,
            expected_hash: None,
            src_path: path,
        })
    }
}

/// Handle to a running copy task.
///
/// All methods go through the controller's command channel; the
/// controller exits once the handle is dropped and in-flight workers
/// have settled.
#[derive(Debug)]
pub struct XcopyTask {
    id: Uuid,
    cmd_tx: mpsc::Sender<Cmd>,
    stopped_rx: watch::Receiver<bool>,
}

impl XcopyTask {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Set one per-type policy on a node. With `recursive`, the policy
    /// also resolves every unresolved descendant conflict of that kind.
    pub async fn set_policy(
        &self,
        node: Uuid,
        kind: PolicyKind,
        policy: Option<Policy>,
        recursive: bool,
    ) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Cmd::SetPolicy {
                node,
                kind,
                policy: TypedPolicy { policy, recursive },
                reply,
            })
            .await
            .map_err(|_| XcopyError::TaskGone)?;
        rx.await.map_err(|_| XcopyError::TaskGone)?
    }

    /// Apply a partial policy patch to a node.
    pub async fn update(&self, node: Uuid, patch: NodePatch) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Cmd::Update { node, patch, reply })
            .await
            .map_err(|_| XcopyError::TaskGone)?;
        rx.await.map_err(|_| XcopyError::TaskGone)?
    }

    /// Stop dispatching, let in-flight I/O settle, discard pending
    /// nodes. Cooperative: returns once the controller accepted the
    /// abort, not once everything settled (use [`Self::wait_stopped`]).
    pub async fn abort(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Cmd::Abort { reply })
            .await
            .map_err(|_| XcopyError::TaskGone)?;
        rx.await.map_err(|_| XcopyError::TaskGone)
    }

    /// Snapshot of the task tree.
    pub async fn view(&self) -> Result<TaskView> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Cmd::View { reply })
            .await
            .map_err(|_| XcopyError::TaskGone)?;
        rx.await.map_err(|_| XcopyError::TaskGone)
    }

    /// Resolve once the scheduler has no dispatchable work left: every
    /// node is terminal, or every open node waits for a policy.
    pub async fn wait_stopped(&self) {
        let mut rx = self.stopped_rx.clone();
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}
