//! # strand-fs
//!
//! Policy-aware filesystem primitives.
//!
//! Each operation takes a target location and a conflict policy, applies
//! the resolution rules for whatever it finds there, and returns the
//! identity of the resulting entry. File creation streams content
//! through SHA-256 and refuses to leave a partial file behind on any
//! verification failure.

mod naming;
mod ops;
pub mod policy;

pub use naming::disambiguate;
pub use ops::{clone_file, mkdir, remove, rename, CloneOutcome, CloneRequest, TMP_SUFFIX};
pub use policy::{ConflictKind, Policy};

use std::io;
use std::path::PathBuf;

use strand_xstat::{IdentityRecord, XstatError};
use thiserror::Error;

/// Errors that can occur during underlying operations
#[derive(Debug, Error)]
pub enum FsError {
    #[error("no entry at path")]
    NotFound,

    #[error("ancestor is not a directory")]
    NotADirectory,

    #[error("target exists ({conflict:?})")]
    EntryExists { conflict: ConflictKind },

    #[error("size mismatch: expected {expected}, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("operation aborted")]
    Aborted,

    #[error(transparent)]
    Xstat(#[from] XstatError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, FsError>;

/// Outcome of a policy-resolved operation.
#[derive(Debug, Clone)]
pub struct Resolved {
    /// Identity of the resulting entry. `None` when the operation was
    /// skipped, or when the destination is an unmanaged mount.
    pub record: Option<IdentityRecord>,
    /// Final absolute path of the entry. Differs from the requested
    /// target under the rename policy; `None` when skipped.
    pub path: Option<PathBuf>,
    /// True when an existing entry satisfied the request instead of a
    /// new one being created.
    pub resolved: bool,
}

impl Resolved {
    pub(crate) fn created(record: Option<IdentityRecord>, path: PathBuf) -> Self {
        Self {
            record,
            path: Some(path),
            resolved: false,
        }
    }

    pub(crate) fn existing(record: Option<IdentityRecord>, path: PathBuf) -> Self {
        Self {
            record,
            path: Some(path),
            resolved: true,
        }
    }

    pub(crate) fn skipped() -> Self {
        Self {
            record: None,
            path: None,
            resolved: true,
        }
    }

    /// True when the conflict policy elected to do nothing.
    pub fn is_skipped(&self) -> bool {
        self.path.is_none()
    }
}
