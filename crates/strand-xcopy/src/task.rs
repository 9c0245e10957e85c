//! Task-tree controller and scheduler.
//!
//! One `Engine` owns the whole shadow tree of a copy task and runs as a
//! single actor: workers for directory reads and file transfers are
//! spawned up to the configured limits and report back over a channel,
//! so every mutation of the tree happens on the actor. Control calls
//! (policies, abort, view) arrive over a command channel from the
//! [`XcopyTask`] handle.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use strand_fs::{clone_file, mkdir, CloneRequest, FsError, Policy};
use strand_xstat::{self as xstat, EntryKind, IdentityRecord, XstatError};

use crate::policy::{NodePatch, Policies, PolicyKind, TypedPolicy};
use crate::state::NodeState;
use crate::view::{NodeView, TaskView};
use crate::{XcopyError, XcopyKind};

/// Queue depth for worker completions; bounded well above the
/// concurrency limits so workers never block the actor.
const DONE_CHANNEL_CAPACITY: usize = 64;

/// One element of the shadow tree tracking one source entry.
#[derive(Debug)]
pub(crate) struct TaskNode {
    pub id: Uuid,
    pub name: String,
    pub kind: EntryKind,
    pub parent: Option<Uuid>,
    pub children: Vec<Uuid>,
    /// Absolute source path of the entry.
    pub src_path: PathBuf,
    /// Destination parent directory (already resolved for this node).
    pub dst_dir: PathBuf,
    /// Identity of the created/resolved destination entry.
    pub dst_uuid: Option<Uuid>,
    /// Resolved destination path (directories, after creation).
    pub dst_path: Option<PathBuf>,
    /// Explicit per-node policy overrides.
    pub policies: Policies,
    pub state: NodeState,
    /// Declared size (files).
    pub size: u64,
    /// Source identity (None on a native source).
    pub src_uuid: Option<Uuid>,
    pub src_mtime_ms: i64,
    /// Source hash expectation, when the identity record carried one.
    pub expected_hash: Option<String>,
}

impl TaskNode {
    fn policy_kind(&self) -> PolicyKind {
        match self.kind {
            EntryKind::Dir => PolicyKind::Dir,
            EntryKind::File => PolicyKind::File,
        }
    }
}

/// A source entry discovered while reading a directory.
pub(crate) struct ChildSpec {
    pub name: String,
    pub kind: EntryKind,
    pub size: u64,
    pub src_uuid: Option<Uuid>,
    pub src_mtime_ms: i64,
    pub expected_hash: Option<String>,
    pub src_path: PathBuf,
}

struct DirOutcome {
    /// Destination record and resolved path; `None` when skipped.
    resolved: Option<(Option<IdentityRecord>, PathBuf)>,
    children: Vec<ChildSpec>,
}

struct FileOutcome {
    dst_record: Option<IdentityRecord>,
}

enum WorkerDone {
    DirRead {
        node: Uuid,
        result: Result<DirOutcome, FsError>,
    },
    FileDone {
        node: Uuid,
        result: Result<FileOutcome, FsError>,
    },
}

pub(crate) enum Cmd {
    SetPolicy {
        node: Uuid,
        kind: PolicyKind,
        policy: TypedPolicy,
        reply: oneshot::Sender<Result<(), XcopyError>>,
    },
    Update {
        node: Uuid,
        patch: NodePatch,
        reply: oneshot::Sender<Result<(), XcopyError>>,
    },
    Abort {
        reply: oneshot::Sender<()>,
    },
    View {
        reply: oneshot::Sender<TaskView>,
    },
}

pub(crate) struct Engine {
    id: Uuid,
    kind: XcopyKind,
    /// Destination directory the whole task writes under; its
    /// disappearance is fatal for the task as a whole.
    dst_root: PathBuf,
    /// Top-level error that aborted the task.
    fatal: Option<String>,
    nodes: HashMap<Uuid, TaskNode>,
    roots: Vec<Uuid>,
    pending: VecDeque<Uuid>,
    /// Nodes currently in `Reading`.
    reading: HashSet<Uuid>,
    /// Nodes currently in `Conflict`.
    conflicts: HashSet<Uuid>,
    active_reads: usize,
    active_works: usize,
    dir_limit: usize,
    file_limit: usize,
    /// Task-level policy defaults from the creation request.
    defaults: Policies,
    managed_src: bool,
    managed_dst: bool,
    aborted: bool,
    cancel: Arc<AtomicBool>,
    done_tx: mpsc::Sender<WorkerDone>,
    done_rx: Option<mpsc::Receiver<WorkerDone>>,
    stopped_tx: watch::Sender<bool>,
}

#[allow(clippy::too_many_arguments)]
impl Engine {
    pub fn new(
        id: Uuid,
        kind: XcopyKind,
        dst_root: PathBuf,
        defaults: Policies,
        dir_limit: usize,
        file_limit: usize,
        managed_src: bool,
        managed_dst: bool,
        stopped_tx: watch::Sender<bool>,
    ) -> Self {
        let (done_tx, done_rx) = mpsc::channel(DONE_CHANNEL_CAPACITY);
        Self {
            id,
            kind,
            dst_root,
            fatal: None,
            nodes: HashMap::new(),
            roots: Vec::new(),
            pending: VecDeque::new(),
            reading: HashSet::new(),
            conflicts: HashSet::new(),
            active_reads: 0,
            active_works: 0,
            dir_limit: dir_limit.max(1),
            file_limit: file_limit.max(1),
            defaults,
            managed_src,
            managed_dst,
            aborted: false,
            cancel: Arc::new(AtomicBool::new(false)),
            done_tx,
            done_rx: Some(done_rx),
            stopped_tx,
        }
    }

    /// Install a selected top-level entry as a root task node.
    pub fn add_root(&mut self, spec: ChildSpec, dst_dir: PathBuf) {
        let id = spec.src_uuid.unwrap_or_else(Uuid::new_v4);
        self.nodes.insert(
            id,
            TaskNode {
                id,
                name: spec.name,
                kind: spec.kind,
                parent: None,
                children: Vec::new(),
                src_path: spec.src_path,
                dst_dir,
                dst_uuid: None,
                dst_path: None,
                policies: Policies::default(),
                state: NodeState::Pending,
                size: spec.size,
                src_uuid: spec.src_uuid,
                src_mtime_ms: spec.src_mtime_ms,
                expected_hash: spec.expected_hash,
            },
        );
        self.roots.push(id);
        self.pending.push_back(id);
    }

    /// Actor loop: runs until the task handle is dropped.
    pub async fn run(mut self, mut cmd_rx: mpsc::Receiver<Cmd>) {
        let mut done_rx = self.done_rx.take().expect("engine runs once");

        info!(task = %self.id, kind = ?self.kind, roots = self.roots.len(), "xcopy task started");
        self.dispatch();
        self.update_stopped();

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(cmd) => self.handle_cmd(cmd),
                    None => break,
                },
                Some(done) = done_rx.recv() => {
                    match done {
                        WorkerDone::DirRead { node, result } => self.on_dir_done(node, result),
                        WorkerDone::FileDone { node, result } => self.on_file_done(node, result),
                    }
                    self.dispatch();
                    self.update_stopped();
                }
            }
        }
        debug!(task = %self.id, "xcopy task handle dropped, engine exiting");
    }

    // -----------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------

    fn handle_cmd(&mut self, cmd: Cmd) {
        match cmd {
            Cmd::SetPolicy {
                node,
                kind,
                policy,
                reply,
            } => {
                let result = self.apply_policy(node, kind, policy);
                self.dispatch();
                self.update_stopped();
                let _ = reply.send(result);
            }
            Cmd::Update { node, patch, reply } => {
                let result = self.apply_patch(node, patch);
                self.dispatch();
                self.update_stopped();
                let _ = reply.send(result);
            }
            Cmd::Abort { reply } => {
                self.do_abort();
                self.update_stopped();
                let _ = reply.send(());
            }
            Cmd::View { reply } => {
                let _ = reply.send(self.build_view());
            }
        }
    }

    fn apply_policy(
        &mut self,
        id: Uuid,
        kind: PolicyKind,
        policy: TypedPolicy,
    ) -> Result<(), XcopyError> {
        let node = self.nodes.get_mut(&id).ok_or(XcopyError::UnknownNode(id))?;
        node.policies.set(kind, policy);
        self.requeue_if_resolvable(id);
        if policy.recursive {
            for descendant in self.descendants(id) {
                self.requeue_if_resolvable(descendant);
            }
        }
        Ok(())
    }

    fn apply_patch(&mut self, id: Uuid, patch: NodePatch) -> Result<(), XcopyError> {
        if let Some(dir) = patch.dir {
            self.apply_policy(id, PolicyKind::Dir, dir)?;
        }
        if let Some(file) = patch.file {
            self.apply_policy(id, PolicyKind::File, file)?;
        }
        Ok(())
    }

    fn do_abort(&mut self) {
        if self.aborted {
            return;
        }
        info!(task = %self.id, "xcopy task aborted");
        self.aborted = true;
        self.cancel.store(true, Ordering::Relaxed);

        // Discard everything not yet in flight; workers settle on their
        // own and report back.
        let pending: Vec<Uuid> = self.pending.drain(..).collect();
        for id in pending {
            self.fail_node(id, "aborted");
        }
        let conflicted: Vec<Uuid> = self.conflicts.iter().copied().collect();
        for id in conflicted {
            self.fail_node(id, "aborted");
        }
    }

    // -----------------------------------------------------------------
    // Scheduling
    // -----------------------------------------------------------------

    /// Fill free worker slots breadth-first across the pending set.
    fn dispatch(&mut self) {
        if self.aborted {
            return;
        }
        let mut blocked: Vec<Uuid> = Vec::new();
        while let Some(id) = self.pending.pop_front() {
            let Some(node) = self.nodes.get(&id) else {
                continue;
            };
            if node.state != NodeState::Pending {
                continue;
            }
            match node.kind {
                EntryKind::Dir if self.active_reads < self.dir_limit => self.start_dir(id),
                EntryKind::File if self.active_works < self.file_limit => self.start_file(id),
                _ => blocked.push(id),
            }
            if self.active_reads >= self.dir_limit && self.active_works >= self.file_limit {
                break;
            }
        }
        for id in blocked.into_iter().rev() {
            self.pending.push_front(id);
        }
    }

    fn start_dir(&mut self, id: Uuid) {
        let policy = self.effective_policy(id, PolicyKind::Dir);
        let (src_path, dst_dir, name) = {
            let Some(node) = self.nodes.get_mut(&id) else {
                return;
            };
            if !node.state.transition(NodeState::Reading) {
                return;
            }
            (
                node.src_path.clone(),
                node.dst_dir.clone(),
                node.name.clone(),
            )
        };
        self.reading.insert(id);
        self.active_reads += 1;

        let managed_src = self.managed_src;
        let managed_dst = self.managed_dst;
        let done = self.done_tx.clone();
        tokio::spawn(async move {
            let result = run_dir(&src_path, &dst_dir, &name, policy, managed_src, managed_dst);
            let _ = done.send(WorkerDone::DirRead { node: id, result }).await;
        });
    }

    fn start_file(&mut self, id: Uuid) {
        let policy = self.effective_policy(id, PolicyKind::File);
        let remove_source = self.kind == XcopyKind::Move;
        let (src_path, dst_dir, name, size, expected_hash, src_uuid, src_mtime_ms) = {
            let Some(node) = self.nodes.get_mut(&id) else {
                return;
            };
            if !node.state.transition(NodeState::Working) {
                return;
            }
            (
                node.src_path.clone(),
                node.dst_dir.clone(),
                node.name.clone(),
                node.size,
                node.expected_hash.clone(),
                node.src_uuid,
                node.src_mtime_ms,
            )
        };
        self.active_works += 1;

        let managed_src = self.managed_src;
        let managed_dst = self.managed_dst;
        let cancel = Arc::clone(&self.cancel);
        let done = self.done_tx.clone();
        tokio::spawn(async move {
            let result = run_file(
                &src_path,
                &dst_dir,
                &name,
                size,
                expected_hash,
                policy,
                managed_src,
                managed_dst,
                src_uuid,
                src_mtime_ms,
                remove_source,
                &cancel,
            )
            .await;
            let _ = done.send(WorkerDone::FileDone { node: id, result }).await;
        });
    }

    /// Effective policy for a node: its explicit setting, else the
    /// nearest ancestor's recursive setting, else the task default.
    /// An ancestor's non-recursive policy never reaches a descendant,
    /// and a descendant's explicit policy is never overridden.
    fn effective_policy(&self, id: Uuid, kind: PolicyKind) -> Option<Policy> {
        let node = self.nodes.get(&id)?;
        if let Some(policy) = node.policies.get(kind).policy {
            return Some(policy);
        }
        let mut cursor = node.parent;
        while let Some(parent_id) = cursor {
            let parent = self.nodes.get(&parent_id)?;
            let typed = parent.policies.get(kind);
            if typed.recursive {
                if let Some(policy) = typed.policy {
                    return Some(policy);
                }
            }
            cursor = parent.parent;
        }
        self.defaults.get(kind).policy
    }

    fn requeue_if_resolvable(&mut self, id: Uuid) {
        let Some(node) = self.nodes.get(&id) else {
            return;
        };
        if !node.state.is_conflict() {
            return;
        }
        let kind = node.policy_kind();
        if self.effective_policy(id, kind).is_some() {
            self.conflicts.remove(&id);
            if let Some(node) = self.nodes.get_mut(&id) {
                node.state.transition(NodeState::Pending);
                self.pending.push_back(id);
            }
        }
    }

    // -----------------------------------------------------------------
    // Worker completions
    // -----------------------------------------------------------------

    fn on_dir_done(&mut self, id: Uuid, result: Result<DirOutcome, FsError>) {
        self.active_reads -= 1;
        match result {
            Ok(DirOutcome { resolved: None, .. }) => {
                // Policy skipped the directory; the source subtree is
                // left untouched even on move.
                self.finish_node(id, false);
            }
            Ok(DirOutcome {
                resolved: Some((record, dst_path)),
                children,
            }) => {
                if let Some(node) = self.nodes.get_mut(&id) {
                    node.dst_uuid = record.map(|r| r.uuid);
                    node.dst_path = Some(dst_path.clone());
                }
                if children.is_empty() {
                    self.finish_node(id, true);
                    return;
                }
                let mut child_ids = Vec::with_capacity(children.len());
                for spec in children {
                    let child_id = spec.src_uuid.unwrap_or_else(Uuid::new_v4);
                    self.nodes.insert(
                        child_id,
                        TaskNode {
                            id: child_id,
                            name: spec.name,
                            kind: spec.kind,
                            parent: Some(id),
                            children: Vec::new(),
                            src_path: spec.src_path,
                            dst_dir: dst_path.clone(),
                            dst_uuid: None,
                            dst_path: None,
                            policies: Policies::default(),
                            state: NodeState::Pending,
                            size: spec.size,
                            src_uuid: spec.src_uuid,
                            src_mtime_ms: spec.src_mtime_ms,
                            expected_hash: spec.expected_hash,
                        },
                    );
                    child_ids.push(child_id);
                    self.pending.push_back(child_id);
                }
                if let Some(node) = self.nodes.get_mut(&id) {
                    node.children = child_ids;
                }
                if self.aborted {
                    let discarded: Vec<Uuid> = self.pending.drain(..).collect();
                    for child in discarded {
                        self.fail_node(child, "aborted");
                    }
                }
                // The node stays in Reading until its children settle.
            }
            Err(FsError::EntryExists { conflict }) => self.conflict_node(id, conflict),
            Err(FsError::Aborted) => self.fail_node(id, "aborted"),
            Err(e) => {
                self.fail_node(id, &e.to_string());
                self.check_fatal();
            }
        }
    }

    fn on_file_done(&mut self, id: Uuid, result: Result<FileOutcome, FsError>) {
        self.active_works -= 1;
        match result {
            Ok(outcome) => {
                if let Some(node) = self.nodes.get_mut(&id) {
                    node.dst_uuid = outcome.dst_record.map(|r| r.uuid);
                }
                self.finish_node(id, false);
            }
            Err(FsError::EntryExists { conflict }) => self.conflict_node(id, conflict),
            Err(FsError::Aborted) => self.fail_node(id, "aborted"),
            Err(e) => {
                // Local failure: siblings keep going.
                self.fail_node(id, &e.to_string());
                self.check_fatal();
            }
        }
    }

    /// Distinguish a local I/O failure from the destination mount
    /// disappearing entirely: the latter aborts the whole task and is
    /// surfaced as one top-level error.
    fn check_fatal(&mut self) {
        if self.fatal.is_some() || self.aborted {
            return;
        }
        let alive = std::fs::symlink_metadata(&self.dst_root)
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if alive {
            return;
        }
        let message = format!("destination root vanished: {}", self.dst_root.display());
        warn!(task = %self.id, "{}", message);
        self.fatal = Some(message);
        self.do_abort();
    }

    // -----------------------------------------------------------------
    // State bookkeeping
    // -----------------------------------------------------------------

    fn conflict_node(&mut self, id: Uuid, conflict: strand_fs::ConflictKind) {
        self.reading.remove(&id);
        if let Some(node) = self.nodes.get_mut(&id) {
            node.state.transition(NodeState::Conflict { conflict });
            self.conflicts.insert(id);
        }
    }

    /// Mark a node finished; `remove_dir_source` additionally removes
    /// the source directory on a move (never after an abort, and never
    /// for a skipped node).
    fn finish_node(&mut self, id: Uuid, remove_dir_source: bool) {
        self.reading.remove(&id);
        let is_move = self.kind == XcopyKind::Move;
        let aborted = self.aborted;
        let (dir_src, parent) = {
            let Some(node) = self.nodes.get_mut(&id) else {
                return;
            };
            node.state.transition(NodeState::Finished);
            let dir_src = (node.kind == EntryKind::Dir).then(|| node.src_path.clone());
            (dir_src, node.parent)
        };

        if remove_dir_source && is_move && !aborted {
            if let Some(src) = dir_src {
                if let Err(e) = strand_fs::remove(&src) {
                    // Skipped or failed children legitimately leave the
                    // source directory non-empty.
                    debug!(path = %src.display(), error = %e, "move: source directory kept");
                }
            }
        }

        if let Some(parent) = parent {
            self.maybe_finish_dir(parent);
        }
    }

    fn fail_node(&mut self, id: Uuid, reason: &str) {
        self.reading.remove(&id);
        self.conflicts.remove(&id);
        let Some(node) = self.nodes.get_mut(&id) else {
            return;
        };
        node.state.transition(NodeState::Failed {
            reason: reason.to_string(),
        });
        let parent = node.parent;
        if let Some(parent) = parent {
            self.maybe_finish_dir(parent);
        }
    }

    /// A directory is finished only once every child task is terminal.
    fn maybe_finish_dir(&mut self, id: Uuid) {
        let Some(node) = self.nodes.get(&id) else {
            return;
        };
        if node.state != NodeState::Reading {
            return;
        }
        let all_terminal = node
            .children
            .iter()
            .all(|c| self.nodes.get(c).is_some_and(|n| n.state.is_terminal()));
        if all_terminal {
            self.finish_node(id, true);
        }
    }

    fn descendants(&self, id: Uuid) -> Vec<Uuid> {
        let mut out = Vec::new();
        let mut queue: VecDeque<Uuid> = self
            .nodes
            .get(&id)
            .map(|n| n.children.iter().copied().collect())
            .unwrap_or_default();
        while let Some(next) = queue.pop_front() {
            out.push(next);
            if let Some(node) = self.nodes.get(&next) {
                queue.extend(node.children.iter().copied());
            }
        }
        out
    }

    fn update_stopped(&mut self) {
        let stopped =
            self.pending.is_empty() && self.active_reads == 0 && self.active_works == 0;
        self.stopped_tx.send_replace(stopped);
    }

    fn build_view(&self) -> TaskView {
        let mut nodes = Vec::with_capacity(self.nodes.len());
        let mut queue: VecDeque<Uuid> = self.roots.iter().copied().collect();
        while let Some(id) = queue.pop_front() {
            let Some(node) = self.nodes.get(&id) else {
                continue;
            };
            nodes.push(NodeView {
                id: node.id,
                parent: node.parent,
                name: node.name.clone(),
                kind: node.kind,
                state: node.state.clone(),
                policies: node.policies,
                dst: node.dst_uuid,
            });
            queue.extend(node.children.iter().copied());
        }
        TaskView {
            id: self.id,
            kind: self.kind,
            aborted: self.aborted,
            fatal: self.fatal.clone(),
            stopped: *self.stopped_tx.borrow(),
            finished: self.nodes.values().all(|n| n.state.is_terminal()),
            reading: self.reading.len(),
            conflicts: self.conflicts.iter().copied().collect(),
            nodes,
        }
    }
}

// ---------------------------------------------------------------------------
// Workers
// ---------------------------------------------------------------------------

/// Resolve the destination directory and list the source children.
fn run_dir(
    src_path: &Path,
    dst_dir: &Path,
    name: &str,
    policy: Option<Policy>,
    managed_src: bool,
    managed_dst: bool,
) -> Result<DirOutcome, FsError> {
    let resolved = mkdir(dst_dir, name, policy, managed_dst)?;
    let Some(dst_path) = resolved.path.clone() else {
        return Ok(DirOutcome {
            resolved: None,
            children: Vec::new(),
        });
    };

    let children = if managed_src {
        list_managed(src_path)?
    } else {
        list_native(src_path)?
    };
    Ok(DirOutcome {
        resolved: Some((resolved.record, dst_path)),
        children,
    })
}

/// List source children through the identity layer (managed side).
fn list_managed(dir: &Path) -> Result<Vec<ChildSpec>, FsError> {
    let mut out = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.ends_with(strand_fs::TMP_SUFFIX) {
            continue;
        }
        let path = entry.path();
        match xstat::identify(&path) {
            Ok((kind, record)) => {
                let meta = match std::fs::symlink_metadata(&path) {
                    Ok(m) => m,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                    Err(e) => return Err(e.into()),
                };
                out.push(ChildSpec {
                    name,
                    kind,
                    size: if kind == EntryKind::File { meta.len() } else { 0 },
                    src_uuid: Some(record.uuid),
                    src_mtime_ms: xstat::mtime_ms(&meta)?,
                    expected_hash: record.hash,
                    src_path: path,
                });
            }
            Err(XstatError::UnsupportedEntryType) | Err(XstatError::NotFound) => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(out)
}

/// List source children with raw stat calls (native side; no identity
/// records exist there).
fn list_native(dir: &Path) -> Result<Vec<ChildSpec>, FsError> {
    let mut out = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let path = entry.path();
        let meta = match std::fs::symlink_metadata(&path) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };
        let ft = meta.file_type();
        let kind = if ft.is_dir() {
            EntryKind::Dir
        } else if ft.is_file() {
            EntryKind::File
        } else {
            continue;
        };
        out.push(ChildSpec {
            name,
            kind,
            size: if kind == EntryKind::File { meta.len() } else { 0 },
            src_uuid: None,
            src_mtime_ms: xstat::mtime_ms(&meta)?,
            expected_hash: None,
            src_path: path,
        });
    }
    Ok(out)
}

/// Stream one file to its destination with verification, then handle
/// move bookkeeping.
#[allow(clippy::too_many_arguments)]
async fn run_file(
    src_path: &Path,
    dst_dir: &Path,
    name: &str,
    size: u64,
    expected_hash: Option<String>,
    policy: Option<Policy>,
    managed_src: bool,
    managed_dst: bool,
    src_uuid: Option<Uuid>,
    src_mtime_ms: i64,
    remove_source: bool,
    cancel: &AtomicBool,
) -> Result<FileOutcome, FsError> {
    let out = clone_file(CloneRequest {
        src: src_path,
        dst_dir,
        name,
        expected_size: Some(size),
        expected_hash: expected_hash.as_deref(),
        policy,
        managed: managed_dst,
        cancel: Some(cancel),
    })
    .await?;

    // A skipped file resolves its request without a copy; the source
    // is left in place even on move.
    if out.outcome.is_skipped() {
        return Ok(FileOutcome { dst_record: None });
    }

    // Opportunistically persist the digest observed on the wire onto a
    // managed source that had no valid hash yet. The timestamp CAS
    // rejects the update if the source changed underneath the copy.
    if managed_src && expected_hash.is_none() {
        if let (Some(uuid), Some(digest)) = (src_uuid, out.streamed_hash.as_deref()) {
            match xstat::update_hash(src_path, uuid, digest, src_mtime_ms) {
                Ok(_) => {}
                Err(XstatError::InstanceMismatch { .. }) | Err(XstatError::Outdated { .. }) => {
                    debug!(path = %src_path.display(), "source changed during copy, digest not cached");
                }
                Err(e) => {
                    debug!(path = %src_path.display(), error = %e, "source hash cache failed");
                }
            }
        }
    }

    if remove_source {
        if let Err(e) = strand_fs::remove(src_path) {
            warn!(path = %src_path.display(), error = %e, "move: source file removal failed");
        }
    }

    Ok(FileOutcome {
        dst_record: out.outcome.record,
    })
}
