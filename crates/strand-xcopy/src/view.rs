//! Serializable task-tree snapshots for the control surface.

use serde::Serialize;
use strand_xstat::EntryKind;
use uuid::Uuid;

use crate::policy::Policies;
use crate::state::NodeState;
use crate::XcopyKind;

/// Point-in-time snapshot of a whole task, safe to poll from an
/// external API layer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskView {
    pub id: Uuid,
    pub kind: XcopyKind,
    pub aborted: bool,
    /// Top-level error that aborted the whole task (e.g. the
    /// destination mount disappeared).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fatal: Option<String>,
    /// Scheduler idleness: no dispatchable work remained when the
    /// snapshot was taken.
    pub stopped: bool,
    /// Every node is terminal.
    pub finished: bool,
    /// Number of nodes currently reading a directory.
    pub reading: usize,
    /// Nodes waiting for a resolving policy.
    pub conflicts: Vec<Uuid>,
    /// All nodes, breadth-first from the selected entries.
    pub nodes: Vec<NodeView>,
}

/// One task node in a snapshot.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeView {
    pub id: Uuid,
    pub parent: Option<Uuid>,
    pub name: String,
    pub kind: EntryKind,
    #[serde(flatten)]
    pub state: NodeState,
    pub policies: Policies,
    /// Resolved destination identity, once created.
    pub dst: Option<Uuid>,
}

impl TaskView {
    /// Nodes currently in conflict, joined with their names.
    pub fn conflicted_nodes(&self) -> Vec<&NodeView> {
        self.nodes.iter().filter(|n| n.state.is_conflict()).collect()
    }

    /// Find a node by the name of its source entry.
    pub fn node_named(&self, name: &str) -> Option<&NodeView> {
        self.nodes.iter().find(|n| n.name == name)
    }
}
