//! Control-socket request/response vocabulary.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use strand_fs::Policy;
use strand_vfs::NodeSummary;
use strand_xcopy::{Location, NodePatch, Policies, PolicyKind, XcopyKind};

/// Requests accepted on the control socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "camelCase")]
pub enum Request {
    Handshake {
        client_version: String,
    },
    Status,
    ListDrives,
    /// Look a node up by uuid.
    Lookup {
        uuid: Uuid,
    },
    /// Look a node up by name, optionally constrained by the parent's
    /// name.
    FindByName {
        name: String,
        #[serde(default)]
        parent: Option<String>,
    },
    /// Content classification of a file node (computed lazily).
    Classify {
        uuid: Uuid,
    },
    /// Re-scan a whole drive.
    Scan {
        drive: Uuid,
    },
    /// Rename an entry in place.
    Rename {
        uuid: Uuid,
        new_name: String,
        #[serde(default)]
        policy: Option<Policy>,
    },
    /// Delete a file or empty directory.
    Remove {
        uuid: Uuid,
    },
    XcopyCreate {
        kind: XcopyKind,
        src: Location,
        dst: Location,
        entries: Vec<String>,
        #[serde(default)]
        policies: Policies,
    },
    XcopySetPolicy {
        task: Uuid,
        node: Uuid,
        kind: PolicyKind,
        policy: Option<Policy>,
        #[serde(default)]
        recursive: bool,
    },
    XcopyUpdate {
        task: Uuid,
        node: Uuid,
        patch: NodePatch,
    },
    XcopyAbort {
        task: Uuid,
    },
    XcopyView {
        task: Uuid,
    },
}

/// One managed drive on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriveInfo {
    pub uuid: Uuid,
    pub path: PathBuf,
}

/// Responses to control requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "reply", rename_all = "camelCase")]
pub enum Response {
    HandshakeAck {
        server_version: String,
    },
    StatusAck {
        drives: usize,
        tasks: usize,
        nodes: usize,
    },
    Drives {
        drives: Vec<DriveInfo>,
    },
    Node {
        node: Option<NodeSummary>,
    },
    Classified {
        magic: Option<String>,
    },
    Done,
    TaskCreated {
        task: Uuid,
    },
    /// Serialized task-tree snapshot.
    TaskView {
        view: serde_json::Value,
    },
    Error {
        message: String,
    },
}

impl Response {
    pub fn error(e: impl std::fmt::Display) -> Self {
        Response::Error {
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_shape() {
        let json = r#"{"cmd":"xcopyCreate","kind":"copy",
            "src":{"type":"vfs","drive":"3a0f2a80-45f5-4b38-9f6b-2f8a14c20a1b",
                   "dir":"3a0f2a80-45f5-4b38-9f6b-2f8a14c20a1b"},
            "dst":{"type":"native","path":"/mnt/usb"},
            "entries":["foo"]}"#;
        let req: Request = serde_json::from_str(json).unwrap();
        match req {
            Request::XcopyCreate { kind, entries, .. } => {
                assert_eq!(kind, XcopyKind::Copy);
                assert_eq!(entries, vec!["foo"]);
            }
            other => panic!("unexpected request: {:?}", other),
        }
    }

    #[test]
    fn test_response_roundtrip() {
        let resp = Response::TaskCreated {
            task: Uuid::new_v4(),
        };
        let json = serde_json::to_string(&resp).unwrap();
        let back: Response = serde_json::from_str(&json).unwrap();
        match (resp, back) {
            (Response::TaskCreated { task: a }, Response::TaskCreated { task: b }) => {
                assert_eq!(a, b)
            }
            _ => panic!("variant changed across the wire"),
        }
    }
}
