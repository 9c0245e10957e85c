//! Identity record encoding.
//!
//! The on-disk form is compact JSON in one extended attribute. Two
//! schema generations exist: the current one, and a legacy one that
//! additionally embedded ownership lists. The stored form is modeled as
//! a versioned union and upgraded exactly once, on read.

use std::path::Path;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{EntryKind, Result, XATTR_NAME};

/// Identity attached to exactly one filesystem entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IdentityRecord {
    /// Stable identifier; survives rename, not deletion.
    pub uuid: Uuid,

    /// SHA-256 of the file content, 64 lowercase hex chars.
    /// Valid only while `hash_time` equals the live mtime.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,

    /// Modification time (ms since epoch) the hash was computed at.
    #[serde(
        rename = "hashTimestamp",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub hash_time: Option<i64>,

    /// Cached content classification (files only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub magic: Option<String>,
}

impl IdentityRecord {
    pub fn new(uuid: Uuid) -> Self {
        Self {
            uuid,
            hash: None,
            hash_time: None,
            magic: None,
        }
    }

    /// Enforce schema rules against the live entry. Returns true when
    /// anything was stripped and the record must be re-persisted.
    ///
    /// The hash pair must be complete and its timestamp must equal the
    /// current mtime; directories never carry file-only fields.
    pub(crate) fn sanitize(&mut self, kind: EntryKind, mtime_ms: i64) -> bool {
        let mut changed = false;

        if kind == EntryKind::Dir {
            if self.hash.is_some() || self.hash_time.is_some() || self.magic.is_some() {
                self.hash = None;
                self.hash_time = None;
                self.magic = None;
                changed = true;
            }
            return changed;
        }

        let complete = self.hash.is_some() && self.hash_time.is_some();
        if !complete && (self.hash.is_some() || self.hash_time.is_some()) {
            self.hash = None;
            self.hash_time = None;
            changed = true;
        } else if complete && self.hash_time != Some(mtime_ms) {
            self.hash = None;
            self.hash_time = None;
            changed = true;
        }
        changed
    }
}

/// Previous schema generation: identity plus ownership lists.
/// The lists are dropped on upgrade.
#[derive(Debug, Deserialize)]
struct LegacyRecord {
    uuid: Uuid,
    #[serde(default)]
    #[allow(dead_code)]
    owner: Vec<Uuid>,
    #[serde(default)]
    #[allow(dead_code)]
    writelist: Vec<Uuid>,
    #[serde(default)]
    #[allow(dead_code)]
    readlist: Vec<Uuid>,
    #[serde(default)]
    hash: Option<String>,
    #[serde(rename = "hashTimestamp", default)]
    hash_time: Option<i64>,
    #[serde(default)]
    magic: Option<String>,
}

impl LegacyRecord {
    fn upgrade(self) -> IdentityRecord {
        IdentityRecord {
            uuid: self.uuid,
            hash: self.hash,
            hash_time: self.hash_time,
            magic: self.magic,
        }
    }
}

/// Stored record union across schema generations.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StoredRecord {
    Current(IdentityRecord),
    Legacy(LegacyRecord),
}

/// Read and decode the record at `path`.
///
/// Returns `None` for an absent or unparsable attribute (the caller
/// synthesizes a fresh identity). The flag reports whether a legacy
/// record was upgraded and must be re-persisted.
pub(crate) fn read(path: &Path) -> Option<(IdentityRecord, bool)> {
    let bytes = xattr::get(path, XATTR_NAME).ok().flatten()?;
    match serde_json::from_slice::<StoredRecord>(&bytes) {
        Ok(StoredRecord::Current(rec)) => Some((rec, false)),
        Ok(StoredRecord::Legacy(legacy)) => Some((legacy.upgrade(), true)),
        Err(_) => None,
    }
}

/// Persist the record at `path`.
pub(crate) fn write(path: &Path, rec: &IdentityRecord) -> Result<()> {
    let bytes = serde_json::to_vec(rec).expect("identity record serializes");
    xattr::set(path, XATTR_NAME, &bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_record_roundtrip() {
        let rec = IdentityRecord {
            uuid: Uuid::new_v4(),
            hash: Some("ab".repeat(32)),
            hash_time: Some(1_700_000_000_000),
            magic: Some("jpeg".to_string()),
        };
        let json = serde_json::to_string(&rec).unwrap();
        assert!(json.contains("hashTimestamp"));
        let back: IdentityRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(rec, back);
    }

    #[test]
    fn test_minimal_record_omits_optionals() {
        let rec = IdentityRecord::new(Uuid::new_v4());
        let json = serde_json::to_string(&rec).unwrap();
        assert!(!json.contains("hash"));
        assert!(!json.contains("magic"));
    }

    #[test]
    fn test_legacy_record_upgrades_on_read() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.txt");
        fs::write(&file, b"x").unwrap();

        let uuid = Uuid::new_v4();
        let legacy = format!(
            r#"{{"uuid":"{}","owner":["{}"],"writelist":[],"readlist":[]}}"#,
            uuid,
            Uuid::new_v4()
        );
        xattr::set(&file, XATTR_NAME, legacy.as_bytes()).unwrap();

        let (rec, upgraded) = read(&file).unwrap();
        assert!(upgraded);
        assert_eq!(rec.uuid, uuid);

        // Re-persist and confirm the ownership fields are gone
        write(&file, &rec).unwrap();
        let raw = xattr::get(&file, XATTR_NAME).unwrap().unwrap();
        let text = String::from_utf8(raw).unwrap();
        assert!(!text.contains("owner"));
        assert!(!text.contains("writelist"));
    }

    #[test]
    fn test_unparsable_record_reads_as_none() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.txt");
        fs::write(&file, b"x").unwrap();
        xattr::set(&file, XATTR_NAME, b"\x00\x01garbage").unwrap();
        assert!(read(&file).is_none());
    }

    #[test]
    fn test_sanitize_strips_lone_timestamp() {
        let mut rec = IdentityRecord::new(Uuid::new_v4());
        rec.hash_time = Some(123);
        assert!(rec.sanitize(EntryKind::File, 123));
        assert!(rec.hash_time.is_none());
    }

    #[test]
    fn test_sanitize_strips_stale_pair() {
        let mut rec = IdentityRecord::new(Uuid::new_v4());
        rec.hash = Some("cd".repeat(32));
        rec.hash_time = Some(1000);
        assert!(rec.sanitize(EntryKind::File, 2000));
        assert!(rec.hash.is_none());

        let mut fresh = IdentityRecord::new(Uuid::new_v4());
        fresh.hash = Some("cd".repeat(32));
        fresh.hash_time = Some(2000);
        assert!(!fresh.sanitize(EntryKind::File, 2000));
        assert!(fresh.hash.is_some());
    }

    #[test]
    fn test_sanitize_clears_file_fields_on_dir() {
        let mut rec = IdentityRecord::new(Uuid::new_v4());
        rec.hash = Some("ef".repeat(32));
        rec.hash_time = Some(1);
        rec.magic = Some("pdf".to_string());
        assert!(rec.sanitize(EntryKind::Dir, 0));
        assert!(rec.hash.is_none());
        assert!(rec.magic.is_none());
    }
}
