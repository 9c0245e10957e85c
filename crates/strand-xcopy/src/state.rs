//! Task-node state machine.
//!
//! A node's state is a pure function of source existence, destination
//! existence/type, and the applicable policy. Transitions are validated
//! centrally; the side effects (dispatching workers, bookkeeping sets)
//! live in the scheduler.

use serde::Serialize;
use strand_fs::ConflictKind;
use tracing::debug;

/// Replication progress of one task node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum NodeState {
    /// Not yet dispatched.
    Pending,
    /// Directory: destination resolved, source children being listed,
    /// or listed and waiting for child tasks to settle.
    Reading,
    /// File: content stream in flight.
    Working,
    /// Destination collision awaiting a resolving policy.
    Conflict { conflict: ConflictKind },
    /// Terminal success; directories only once every child is terminal.
    Finished,
    /// Terminal failure local to this node.
    Failed { reason: String },
}

impl NodeState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, NodeState::Finished | NodeState::Failed { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, NodeState::Conflict { .. })
    }

    fn can_transition(&self, next: &NodeState) -> bool {
        matches!(
            (self, next),
            (NodeState::Pending, NodeState::Reading)
                | (NodeState::Pending, NodeState::Working)
                | (NodeState::Pending, NodeState::Failed { .. })
                | (NodeState::Reading, NodeState::Conflict { .. })
                | (NodeState::Reading, NodeState::Finished)
                | (NodeState::Reading, NodeState::Failed { .. })
                | (NodeState::Working, NodeState::Conflict { .. })
                | (NodeState::Working, NodeState::Finished)
                | (NodeState::Working, NodeState::Failed { .. })
                | (NodeState::Conflict { .. }, NodeState::Pending)
                | (NodeState::Conflict { .. }, NodeState::Failed { .. })
        )
    }

    /// Apply a transition (returns false and leaves the state untouched
    /// if the step is not allowed).
    pub fn transition(&mut self, next: NodeState) -> bool {
        if self.can_transition(&next) {
            debug!(from = ?self, to = ?next, "task node transition");
            *self = next;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_paths() {
        let mut file = NodeState::Pending;
        assert!(file.transition(NodeState::Working));
        assert!(file.transition(NodeState::Finished));

        let mut dir = NodeState::Pending;
        assert!(dir.transition(NodeState::Reading));
        assert!(dir.transition(NodeState::Finished));
    }

    #[test]
    fn test_conflict_reenters_via_pending() {
        let mut state = NodeState::Pending;
        assert!(state.transition(NodeState::Working));
        assert!(state.transition(NodeState::Conflict {
            conflict: ConflictKind::SameKind
        }));
        assert!(state.transition(NodeState::Pending));
        assert!(state.transition(NodeState::Working));
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut state = NodeState::Finished;
        assert!(!state.transition(NodeState::Pending));
        assert!(!state.transition(NodeState::Failed {
            reason: "late".into()
        }));
        assert_eq!(state, NodeState::Finished);

        let mut failed = NodeState::Failed {
            reason: "io".into(),
        };
        assert!(!failed.transition(NodeState::Pending));
    }

    #[test]
    fn test_serialized_tag() {
        let json = serde_json::to_string(&NodeState::Conflict {
            conflict: ConflictKind::DifferentKind,
        })
        .unwrap();
        assert_eq!(json, r#"{"state":"conflict","conflict":"differentKind"}"#);
    }
}
