//! Conflict policies for name/type collisions.

use serde::{Deserialize, Serialize};

/// Caller-selected strategy for resolving a collision at the target
/// path. Absence of a policy (`Option::None` at the call sites) means
/// any collision is reported as an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Policy {
    /// An existing entry of the same kind satisfies the request.
    Keep,
    /// Overwrite content in place, preserving the target's uuid.
    Replace,
    /// Create under a disambiguated name (`"name (2)"`, `"name (3)"`, ...).
    Rename,
    /// Do nothing and report the request as skipped.
    Skip,
}

/// How the existing entry's kind relates to the requested one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConflictKind {
    /// Target holds an entry of the requested kind.
    SameKind,
    /// Target holds an entry of the other kind.
    DifferentKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_wire_names() {
        assert_eq!(serde_json::to_string(&Policy::Replace).unwrap(), "\"replace\"");
        assert_eq!(
            serde_json::from_str::<Policy>("\"rename\"").unwrap(),
            Policy::Rename
        );
    }

    #[test]
    fn test_conflict_kind_wire_names() {
        assert_eq!(
            serde_json::to_string(&ConflictKind::SameKind).unwrap(),
            "\"sameKind\""
        );
    }
}
