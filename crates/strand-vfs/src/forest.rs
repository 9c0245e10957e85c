//! Node arena and reconciliation.
//!
//! The filesystem is the ground truth; this arena is a cache with
//! explicit invalidation. Nodes are addressed by uuid with parent
//! back-references by uuid, so ownership never cycles.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use tracing::debug;
use uuid::Uuid;

use strand_xstat::EntryKind;

use crate::node::{Node, NodeKind, ScannedEntry};
use crate::{Result, VfsError};

/// One managed drive root.
#[derive(Debug, Clone)]
pub(crate) struct DriveRoot {
    pub uuid: Uuid,
    pub path: PathBuf,
}

#[derive(Debug, Default)]
pub(crate) struct Forest {
    pub drives: Vec<DriveRoot>,
    pub nodes: HashMap<Uuid, Node>,
    pub natives: Vec<PathBuf>,
}

impl Forest {
    pub fn node(&self, uuid: Uuid) -> Result<&Node> {
        self.nodes.get(&uuid).ok_or(VfsError::NodeNotFound(uuid))
    }

    pub fn node_mut(&mut self, uuid: Uuid) -> Result<&mut Node> {
        self.nodes.get_mut(&uuid).ok_or(VfsError::NodeNotFound(uuid))
    }

    /// Absolute path of a node: the drive anchor plus the name chain.
    pub fn path_of(&self, uuid: Uuid) -> Result<PathBuf> {
        let mut names: Vec<String> = Vec::new();
        let mut cursor = self.node(uuid)?;
        loop {
            match cursor.parent {
                Some(parent) => {
                    names.push(cursor.name.clone());
                    cursor = self.node(parent)?;
                }
                None => break,
            }
        }
        let drive = self
            .drives
            .iter()
            .find(|d| d.uuid == cursor.uuid)
            .ok_or(VfsError::NodeNotFound(cursor.uuid))?;
        let mut path = drive.path.clone();
        for name in names.iter().rev() {
            path.push(name);
        }
        Ok(path)
    }

    /// Drive root owning a node.
    pub fn drive_of(&self, uuid: Uuid) -> Result<Uuid> {
        let mut cursor = self.node(uuid)?;
        while let Some(parent) = cursor.parent {
            cursor = self.node(parent)?;
        }
        Ok(cursor.uuid)
    }

    pub fn dir_generation(&self, uuid: Uuid) -> Result<u64> {
        match &self.node(uuid)?.kind {
            NodeKind::Dir { generation, .. } => Ok(*generation),
            NodeKind::File { .. } => Err(VfsError::NotADirectory(uuid)),
        }
    }

    /// Drop a node and its whole subtree from the arena.
    pub fn remove_subtree(&mut self, uuid: Uuid) {
        let Some(node) = self.nodes.remove(&uuid) else {
            return;
        };
        if let NodeKind::Dir { children, .. } = node.kind {
            for child in children.values() {
                self.remove_subtree(*child);
            }
        }
    }

    /// Apply a settled directory listing to `dir`'s children, keeping
    /// untouched nodes and dropping vanished ones. Returns the uuids of
    /// the directory children to recurse into.
    ///
    /// The caller has already checked the generation captured at scan
    /// start; this runs entirely inside one lock acquisition.
    pub fn reconcile(&mut self, dir: Uuid, listing: Vec<ScannedEntry>) -> Result<Vec<Uuid>> {
        let old_children = match &self.node(dir)?.kind {
            NodeKind::Dir { children, .. } => children.clone(),
            NodeKind::File { .. } => return Err(VfsError::NotADirectory(dir)),
        };

        let listed: BTreeMap<String, ScannedEntry> = listing
            .into_iter()
            .map(|e| (e.name.clone(), e))
            .collect();

        let mut structural = false;

        // Removal pass: anything not listed under its old name, or
        // listed with a different identity or kind, is gone. A node
        // that was adopted by another directory between scans is only
        // unlinked here, never destroyed.
        for (name, uuid) in &old_children {
            let survives = listed.get(name).is_some_and(|e| {
                e.record.uuid == *uuid
                    && self
                        .nodes
                        .get(uuid)
                        .is_some_and(|n| n.entry_kind() == e.kind)
            });
            if !survives {
                let still_ours = self
                    .nodes
                    .get(uuid)
                    .is_some_and(|n| n.parent == Some(dir));
                if still_ours {
                    debug!(name = %name, uuid = %uuid, "dropping vanished node");
                    self.remove_subtree(*uuid);
                }
                structural = true;
            }
        }

        // Insert/update pass.
        let mut children: BTreeMap<String, Uuid> = BTreeMap::new();
        let mut child_dirs: Vec<Uuid> = Vec::new();
        for (name, entry) in listed {
            let uuid = entry.record.uuid;
            if let Some(node) = self.nodes.get_mut(&uuid) {
                node.name = name.clone();
                node.parent = Some(dir);
                node.mtime_ms = entry.mtime_ms;
                if let NodeKind::File { size, hash } = &mut node.kind {
                    *size = entry.size;
                    *hash = entry.record.hash.clone();
                }
            } else {
                let node = match entry.kind {
                    EntryKind::Dir => Node::new_dir(uuid, name.clone(), Some(dir), entry.mtime_ms),
                    EntryKind::File => Node::new_file(
                        uuid,
                        name.clone(),
                        Some(dir),
                        entry.mtime_ms,
                        entry.size,
                        entry.record.hash.clone(),
                    ),
                };
                self.nodes.insert(uuid, node);
                structural = true;
            }
            if entry.kind == EntryKind::Dir {
                child_dirs.push(uuid);
            }
            children.insert(name, uuid);
        }

        let node = self.node_mut(dir)?;
        if let NodeKind::Dir {
            children: slot,
            generation,
        } = &mut node.kind
        {
            *slot = children;
            if structural {
                *generation += 1;
            }
        }

        Ok(child_dirs)
    }
}
