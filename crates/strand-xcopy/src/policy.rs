//! Per-type conflict policies on task nodes.

use serde::{Deserialize, Serialize};
use strand_fs::Policy;

/// Which node kind a policy addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyKind {
    Dir,
    File,
}

/// A policy for one node kind. With `recursive` set on a directory
/// node, the policy also resolves every unresolved descendant conflict
/// of that kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TypedPolicy {
    pub policy: Option<Policy>,
    pub recursive: bool,
}

/// Both per-type policies of a task node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Policies {
    pub dir: TypedPolicy,
    pub file: TypedPolicy,
}

impl Policies {
    pub fn get(&self, kind: PolicyKind) -> TypedPolicy {
        match kind {
            PolicyKind::Dir => self.dir,
            PolicyKind::File => self.file,
        }
    }

    pub fn set(&mut self, kind: PolicyKind, value: TypedPolicy) {
        match kind {
            PolicyKind::Dir => self.dir = value,
            PolicyKind::File => self.file = value,
        }
    }
}

/// Partial policy update applied through the control surface. Sides
/// left as `None` keep the node's current setting.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodePatch {
    pub dir: Option<TypedPolicy>,
    pub file: Option<TypedPolicy>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policies_get_set() {
        let mut policies = Policies::default();
        assert!(policies.get(PolicyKind::Dir).policy.is_none());

        policies.set(
            PolicyKind::Dir,
            TypedPolicy {
                policy: Some(Policy::Rename),
                recursive: true,
            },
        );
        assert_eq!(policies.get(PolicyKind::Dir).policy, Some(Policy::Rename));
        assert!(policies.get(PolicyKind::Dir).recursive);
        assert!(policies.get(PolicyKind::File).policy.is_none());
    }

    #[test]
    fn test_patch_wire_shape() {
        let patch: NodePatch =
            serde_json::from_str(r#"{"file":{"policy":"skip"}}"#).unwrap();
        assert!(patch.dir.is_none());
        assert_eq!(patch.file.unwrap().policy, Some(Policy::Skip));
        assert!(!patch.file.unwrap().recursive);
    }
}
