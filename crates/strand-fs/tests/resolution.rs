//! Conflict-resolution behavior of the underlying operations.
//!
//! Walks the full (existing-kind x policy) table for directory and
//! file creation, and exercises the verification and disambiguation
//! guarantees around file streaming.

use std::fs;
use std::path::{Path, PathBuf};

use strand_fs::{clone_file, mkdir, remove, rename, CloneRequest, ConflictKind, FsError, Policy};
use strand_xstat::hash::hash_bytes;
use tempfile::tempdir;

fn write_src(dir: &Path, name: &str, contents: &[u8]) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).unwrap();
    path
}

fn plain_clone<'a>(src: &'a Path, dst_dir: &'a Path, name: &'a str) -> CloneRequest<'a> {
    CloneRequest {
        src,
        dst_dir,
        name,
        expected_size: None,
        expected_hash: None,
        policy: None,
        managed: true,
        cancel: None,
    }
}

// ==================== mkdir resolution table ====================

#[test]
fn test_mkdir_no_conflict_creates_for_every_policy() {
    for policy in [
        None,
        Some(Policy::Keep),
        Some(Policy::Replace),
        Some(Policy::Rename),
        Some(Policy::Skip),
    ] {
        let temp = tempdir().unwrap();
        let out = mkdir(temp.path(), "fresh", policy, true).unwrap();
        assert!(!out.resolved, "policy {:?}", policy);
        assert_eq!(out.path.as_deref(), Some(temp.path().join("fresh").as_path()));
        assert!(out.record.is_some());
    }
}

#[test]
fn test_mkdir_same_type_table() {
    // none -> conflict
    let temp = tempdir().unwrap();
    fs::create_dir(temp.path().join("d")).unwrap();
    let err = mkdir(temp.path(), "d", None, true).unwrap_err();
    assert!(matches!(
        err,
        FsError::EntryExists {
            conflict: ConflictKind::SameKind
        }
    ));

    // keep -> existing entry, resolved
    let existing = mkdir(temp.path(), "d", Some(Policy::Keep), true).unwrap();
    assert!(existing.resolved);
    let kept_uuid = existing.record.as_ref().unwrap().uuid;

    // replace -> still the existing entry and uuid
    let replaced = mkdir(temp.path(), "d", Some(Policy::Replace), true).unwrap();
    assert!(replaced.resolved);
    assert_eq!(replaced.record.unwrap().uuid, kept_uuid);

    // rename -> new sibling "d (2)"
    let renamed = mkdir(temp.path(), "d", Some(Policy::Rename), true).unwrap();
    assert!(!renamed.resolved);
    assert_eq!(renamed.path.unwrap(), temp.path().join("d (2)"));
    assert_ne!(renamed.record.unwrap().uuid, kept_uuid);

    // skip -> no-op, resolved
    let skipped = mkdir(temp.path(), "d", Some(Policy::Skip), true).unwrap();
    assert!(skipped.resolved);
    assert!(skipped.is_skipped());
}

#[test]
fn test_mkdir_cross_type_table() {
    let temp = tempdir().unwrap();
    fs::write(temp.path().join("x"), b"file in the way").unwrap();

    for policy in [None, Some(Policy::Keep)] {
        let err = mkdir(temp.path(), "x", policy, true).unwrap_err();
        assert!(
            matches!(
                err,
                FsError::EntryExists {
                    conflict: ConflictKind::DifferentKind
                }
            ),
            "policy {:?}",
            policy
        );
    }

    // replace and rename both side-step to a disambiguated name
    let replaced = mkdir(temp.path(), "x", Some(Policy::Replace), true).unwrap();
    assert!(!replaced.resolved);
    assert_eq!(replaced.path.unwrap(), temp.path().join("x (2)"));

    let renamed = mkdir(temp.path(), "x", Some(Policy::Rename), true).unwrap();
    assert!(!renamed.resolved);
    assert_eq!(renamed.path.unwrap(), temp.path().join("x (3)"));

    // the original file was never touched
    assert_eq!(fs::read(temp.path().join("x")).unwrap(), b"file in the way");

    let skipped = mkdir(temp.path(), "x", Some(Policy::Skip), true).unwrap();
    assert!(skipped.resolved && skipped.is_skipped());
}

#[test]
fn test_parent_errors_are_distinct() {
    let temp = tempdir().unwrap();

    let missing = temp.path().join("absent").join("deeper");
    assert!(matches!(
        mkdir(&missing, "d", None, true).unwrap_err(),
        FsError::NotFound
    ));

    fs::write(temp.path().join("blocker"), b"").unwrap();
    let through_file = temp.path().join("blocker").join("deeper");
    assert!(matches!(
        mkdir(&through_file, "d", None, true).unwrap_err(),
        FsError::NotADirectory
    ));
}

// ==================== clone_file resolution table ====================

#[tokio::test]
async fn test_clone_no_conflict_creates() {
    let temp = tempdir().unwrap();
    let src = write_src(temp.path(), "src.bin", b"content");
    let dst = temp.path().join("dst");
    fs::create_dir(&dst).unwrap();

    let out = clone_file(plain_clone(&src, &dst, "copy.bin")).await.unwrap();
    assert!(!out.outcome.resolved);
    assert_eq!(fs::read(dst.join("copy.bin")).unwrap(), b"content");
    assert_eq!(
        out.outcome.record.unwrap().hash.as_deref(),
        Some(hash_bytes(b"content").as_str())
    );
}

#[tokio::test]
async fn test_clone_same_type_table() {
    let temp = tempdir().unwrap();
    let src = write_src(temp.path(), "src.bin", b"new content");
    let dst = temp.path().join("dst");
    fs::create_dir(&dst).unwrap();
    fs::write(dst.join("t.bin"), b"old content").unwrap();

    // none -> conflict
    let err = clone_file(plain_clone(&src, &dst, "t.bin")).await.unwrap_err();
    assert!(matches!(
        err,
        FsError::EntryExists {
            conflict: ConflictKind::SameKind
        }
    ));

    // keep -> existing file untouched, resolved
    let mut req = plain_clone(&src, &dst, "t.bin");
    req.policy = Some(Policy::Keep);
    let kept = clone_file(req).await.unwrap();
    assert!(kept.outcome.resolved);
    assert!(kept.streamed_hash.is_none());
    assert_eq!(fs::read(dst.join("t.bin")).unwrap(), b"old content");
    let kept_uuid = kept.outcome.record.unwrap().uuid;

    // replace -> content overwritten, uuid preserved
    let mut req = plain_clone(&src, &dst, "t.bin");
    req.policy = Some(Policy::Replace);
    let replaced = clone_file(req).await.unwrap();
    assert!(replaced.outcome.resolved);
    assert_eq!(fs::read(dst.join("t.bin")).unwrap(), b"new content");
    assert_eq!(replaced.outcome.record.unwrap().uuid, kept_uuid);

    // rename -> sibling under the next free suffix
    let mut req = plain_clone(&src, &dst, "t.bin");
    req.policy = Some(Policy::Rename);
    let renamed = clone_file(req).await.unwrap();
    assert!(!renamed.outcome.resolved);
    assert_eq!(renamed.outcome.path.unwrap(), dst.join("t.bin (2)"));

    // skip -> nothing written
    let mut req = plain_clone(&src, &dst, "t.bin");
    req.policy = Some(Policy::Skip);
    let skipped = clone_file(req).await.unwrap();
    assert!(skipped.outcome.resolved && skipped.outcome.is_skipped());
}

#[tokio::test]
async fn test_clone_cross_type_table() {
    let temp = tempdir().unwrap();
    let src = write_src(temp.path(), "src.bin", b"payload");
    let dst = temp.path().join("dst");
    fs::create_dir(&dst).unwrap();
    fs::create_dir(dst.join("t.bin")).unwrap();

    for policy in [None, Some(Policy::Keep)] {
        let mut req = plain_clone(&src, &dst, "t.bin");
        req.policy = policy;
        let err = clone_file(req).await.unwrap_err();
        assert!(
            matches!(
                err,
                FsError::EntryExists {
                    conflict: ConflictKind::DifferentKind
                }
            ),
            "policy {:?}",
            policy
        );
    }

    let mut req = plain_clone(&src, &dst, "t.bin");
    req.policy = Some(Policy::Replace);
    let replaced = clone_file(req).await.unwrap();
    assert_eq!(replaced.outcome.path.unwrap(), dst.join("t.bin (2)"));

    let mut req = plain_clone(&src, &dst, "t.bin");
    req.policy = Some(Policy::Skip);
    let skipped = clone_file(req).await.unwrap();
    assert!(skipped.outcome.is_skipped());

    // the directory in the way survives
    assert!(dst.join("t.bin").is_dir());
}

// ==================== verification ====================

#[tokio::test]
async fn test_clone_hash_mismatch_leaves_no_partial() {
    let temp = tempdir().unwrap();
    let src = write_src(temp.path(), "src.bin", b"actual bytes");
    let dst = temp.path().join("dst");
    fs::create_dir(&dst).unwrap();

    let wrong = hash_bytes(b"other bytes");
    let mut req = plain_clone(&src, &dst, "out.bin");
    req.expected_hash = Some(&wrong);
    let err = clone_file(req).await.unwrap_err();
    assert!(matches!(err, FsError::HashMismatch { .. }));

    // neither the target nor any temp remains
    assert!(fs::read_dir(&dst).unwrap().next().is_none());
}

#[tokio::test]
async fn test_clone_size_mismatch_leaves_no_partial() {
    let temp = tempdir().unwrap();
    let src = write_src(temp.path(), "src.bin", b"12345");
    let dst = temp.path().join("dst");
    fs::create_dir(&dst).unwrap();

    let mut req = plain_clone(&src, &dst, "out.bin");
    req.expected_size = Some(99);
    let err = clone_file(req).await.unwrap_err();
    assert!(matches!(
        err,
        FsError::SizeMismatch {
            expected: 99,
            actual: 5
        }
    ));
    assert!(fs::read_dir(&dst).unwrap().next().is_none());
}

#[tokio::test]
async fn test_clone_verifies_matching_expectations() {
    let temp = tempdir().unwrap();
    let src = write_src(temp.path(), "src.bin", b"verified payload");
    let dst = temp.path().join("dst");
    fs::create_dir(&dst).unwrap();

    let digest = hash_bytes(b"verified payload");
    let mut req = plain_clone(&src, &dst, "out.bin");
    req.expected_size = Some(16);
    req.expected_hash = Some(&digest);
    let out = clone_file(req).await.unwrap();
    assert_eq!(out.streamed_hash.as_deref(), Some(digest.as_str()));
}

#[tokio::test]
async fn test_clone_unmanaged_destination_gets_no_record() {
    let temp = tempdir().unwrap();
    let src = write_src(temp.path(), "src.bin", b"export");
    let dst = temp.path().join("native");
    fs::create_dir(&dst).unwrap();

    let mut req = plain_clone(&src, &dst, "out.bin");
    req.managed = false;
    let out = clone_file(req).await.unwrap();
    assert!(out.outcome.record.is_none());
    assert!(xattr::get(dst.join("out.bin"), strand_xstat::XATTR_NAME)
        .unwrap()
        .is_none());
}

// ==================== remove / rename ====================

#[test]
fn test_remove_file_and_empty_dir() {
    let temp = tempdir().unwrap();
    let file = write_src(temp.path(), "f", b"x");
    let dir = temp.path().join("d");
    fs::create_dir(&dir).unwrap();

    remove(&file).unwrap();
    remove(&dir).unwrap();
    assert!(matches!(remove(&file).unwrap_err(), FsError::NotFound));
}

#[test]
fn test_rename_no_conflict() {
    let temp = tempdir().unwrap();
    let file = write_src(temp.path(), "old", b"x");
    let (_, before) = strand_xstat::identify(&file).unwrap();

    let out = rename(&file, "new", None, true).unwrap();
    assert!(!out.resolved);
    assert_eq!(out.record.unwrap().uuid, before.uuid);
    assert!(temp.path().join("new").exists());
}

#[test]
fn test_rename_conflict_policies() {
    let temp = tempdir().unwrap();
    let moving = write_src(temp.path(), "a", b"moving");
    write_src(temp.path(), "b", b"in place");

    assert!(matches!(
        rename(&moving, "b", None, true).unwrap_err(),
        FsError::EntryExists {
            conflict: ConflictKind::SameKind
        }
    ));

    let renamed = rename(&moving, "b", Some(Policy::Rename), true).unwrap();
    assert_eq!(renamed.path.unwrap(), temp.path().join("b (2)"));
    assert_eq!(fs::read(temp.path().join("b")).unwrap(), b"in place");
}

#[test]
fn test_rename_replace_preserves_target_uuid() {
    let temp = tempdir().unwrap();
    let moving = write_src(temp.path(), "a", b"moving");
    let target = write_src(temp.path(), "b", b"in place");
    let (_, target_rec) = strand_xstat::identify(&target).unwrap();

    let out = rename(&moving, "b", Some(Policy::Replace), true).unwrap();
    assert!(out.resolved);
    assert_eq!(out.record.unwrap().uuid, target_rec.uuid);
    assert_eq!(fs::read(temp.path().join("b")).unwrap(), b"moving");
    assert!(!temp.path().join("a").exists());
}
