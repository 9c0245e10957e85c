//! # strand-xstat
//!
//! Persistent identity for filesystem entries.
//!
//! Every managed file or directory carries an identity record in a
//! single extended attribute. The record holds a stable uuid that
//! survives renames, and, for files, a content hash that is valid only
//! while the recorded timestamp matches the entry's modification time.
//!
//! Records are self-healing: a missing or unparsable record is replaced
//! by a freshly minted one on the next read, and records written by the
//! previous schema generation are upgraded in place.

pub mod classify;
pub mod hash;
mod record;

pub use record::IdentityRecord;

use std::fs;
use std::io;
use std::path::Path;
use std::time::UNIX_EPOCH;

use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

/// Extended attribute key holding the identity record.
pub const XATTR_NAME: &str = "user.strand";

/// Errors that can occur during identity operations
#[derive(Debug, Error)]
pub enum XstatError {
    #[error("no entry at path")]
    NotFound,

    #[error("entry is neither a regular file nor a directory")]
    UnsupportedEntryType,

    #[error("entry identity changed: expected {expected}, found {actual}")]
    InstanceMismatch { expected: Uuid, actual: Uuid },

    #[error("entry was modified: expected mtime {expected}, found {actual}")]
    Outdated { expected: i64, actual: i64 },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, XstatError>;

/// Kind of a managed filesystem entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Dir,
}

/// Modification time of an entry in milliseconds since the Unix epoch.
///
/// All hash validity comparisons happen in whole milliseconds on both
/// sides, so sub-millisecond precision is deliberately truncated.
pub fn mtime_ms(meta: &fs::Metadata) -> Result<i64> {
    let mtime = meta.modified()?;
    let ms = match mtime.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_millis() as i64,
        Err(e) => -(e.duration().as_millis() as i64),
    };
    Ok(ms)
}

/// Read the identity of the entry at `path`, repairing the stored
/// record as needed.
///
/// Fails with [`XstatError::NotFound`] when nothing exists at `path`.
/// Symlinks and special files are refused with
/// [`XstatError::UnsupportedEntryType`]; a broken symlink reports
/// `NotFound`, since it is indistinguishable from an absent target.
pub fn identify(path: &Path) -> Result<(EntryKind, IdentityRecord)> {
    let meta = match fs::symlink_metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(XstatError::NotFound),
        Err(e) => return Err(e.into()),
    };

    let ft = meta.file_type();
    if ft.is_symlink() {
        // Follow once to distinguish a dangling link from a real one.
        return match fs::metadata(path) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(XstatError::NotFound),
            _ => Err(XstatError::UnsupportedEntryType),
        };
    }
    let kind = if ft.is_dir() {
        EntryKind::Dir
    } else if ft.is_file() {
        EntryKind::File
    } else {
        return Err(XstatError::UnsupportedEntryType);
    };

    let mtime = mtime_ms(&meta)?;
    let (mut rec, mut dirty) = match record::read(path) {
        Some((rec, upgraded)) => (rec, upgraded),
        None => (IdentityRecord::new(Uuid::new_v4()), true),
    };

    if rec.sanitize(kind, mtime) {
        dirty = true;
    }

    if dirty {
        // Best-effort: a failed persist still yields a usable identity;
        // the next reader will retry the repair.
        if let Err(e) = record::write(path, &rec) {
            debug!(path = %path.display(), error = %e, "identity record persist failed");
        }
    }

    Ok((kind, rec))
}

/// Persist a freshly computed content hash for the file at `path`.
///
/// The caller declares the uuid it computed the hash for and the
/// modification time the file had when the hash was taken. The update
/// is applied only if both still match the live entry; the timestamp
/// acts as the optimistic-concurrency token against writers outside
/// the process.
pub fn update_hash(
    path: &Path,
    expected_uuid: Uuid,
    new_hash: &str,
    expected_time_ms: i64,
) -> Result<IdentityRecord> {
    let (kind, mut rec) = identify(path)?;
    if kind != EntryKind::File {
        return Err(XstatError::UnsupportedEntryType);
    }
    if rec.uuid != expected_uuid {
        return Err(XstatError::InstanceMismatch {
            expected: expected_uuid,
            actual: rec.uuid,
        });
    }
    let meta = fs::symlink_metadata(path)?;
    let actual = mtime_ms(&meta)?;
    if actual != expected_time_ms {
        return Err(XstatError::Outdated {
            expected: expected_time_ms,
            actual,
        });
    }

    rec.hash = Some(new_hash.to_string());
    rec.hash_time = Some(expected_time_ms);
    record::write(path, &rec)?;
    Ok(rec)
}

/// Replace the identity record at `path` wholesale.
///
/// Used when an operation materializes a new entry and already knows
/// the identity it must carry (e.g. content replacement preserving the
/// previous uuid).
pub fn put_record(path: &Path, rec: &IdentityRecord) -> Result<()> {
    record::write(path, rec)
}

/// Content classification of the file at `path`, computed lazily and
/// cached in the identity record.
///
/// Directories classify as `None`. Unrecognized content also returns
/// `None` and is not cached, so a later write can still classify.
pub fn classify_entry(path: &Path) -> Result<Option<String>> {
    let (kind, mut rec) = identify(path)?;
    if kind != EntryKind::File {
        return Ok(None);
    }
    if rec.magic.is_some() {
        return Ok(rec.magic);
    }

    let label = classify::sniff_file(path)?;
    if let Some(label) = label {
        rec.magic = Some(label.to_string());
        record::write(path, &rec)?;
        return Ok(rec.magic);
    }
    Ok(None)
}
