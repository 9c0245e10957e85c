//! Tree node types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strand_xstat::{EntryKind, IdentityRecord};
use uuid::Uuid;

/// One mirrored filesystem entry inside one drive's tree.
#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub uuid: Uuid,
    pub name: String,
    /// Owning parent; `None` for a drive root.
    pub parent: Option<Uuid>,
    pub mtime_ms: i64,
    pub kind: NodeKind,
}

#[derive(Debug, Clone)]
pub(crate) enum NodeKind {
    Dir {
        /// Immediate children by entry name.
        children: BTreeMap<String, Uuid>,
        /// Bumped on every structural change; a scan that captured an
        /// older value is discarded instead of applied.
        generation: u64,
    },
    File {
        size: u64,
        hash: Option<String>,
    },
}

impl Node {
    pub fn new_dir(uuid: Uuid, name: String, parent: Option<Uuid>, mtime_ms: i64) -> Self {
        Self {
            uuid,
            name,
            parent,
            mtime_ms,
            kind: NodeKind::Dir {
                children: BTreeMap::new(),
                generation: 0,
            },
        }
    }

    pub fn new_file(
        uuid: Uuid,
        name: String,
        parent: Option<Uuid>,
        mtime_ms: i64,
        size: u64,
        hash: Option<String>,
    ) -> Self {
        Self {
            uuid,
            name,
            parent,
            mtime_ms,
            kind: NodeKind::File { size, hash },
        }
    }

    pub fn entry_kind(&self) -> EntryKind {
        match self.kind {
            NodeKind::Dir { .. } => EntryKind::Dir,
            NodeKind::File { .. } => EntryKind::File,
        }
    }
}

/// Read-only snapshot of a node, safe to hand out of the tree lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSummary {
    pub uuid: Uuid,
    pub name: String,
    pub parent: Option<Uuid>,
    pub kind: EntryKind,
    pub mtime_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

impl NodeSummary {
    pub(crate) fn of(node: &Node) -> Self {
        let (size, hash) = match &node.kind {
            NodeKind::File { size, hash } => (Some(*size), hash.clone()),
            NodeKind::Dir { .. } => (None, None),
        };
        Self {
            uuid: node.uuid,
            name: node.name.clone(),
            parent: node.parent,
            kind: node.entry_kind(),
            mtime_ms: node.mtime_ms,
            size,
            hash,
        }
    }
}

/// One directory entry observed during a scan, identity already read.
#[derive(Debug, Clone)]
pub(crate) struct ScannedEntry {
    pub name: String,
    pub kind: EntryKind,
    pub record: IdentityRecord,
    pub mtime_ms: i64,
    pub size: u64,
}
