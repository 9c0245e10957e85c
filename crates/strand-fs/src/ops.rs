//! Policy-resolved operations against the native filesystem.
//!
//! Creation streams content to a hidden temp name and renames into
//! place only after size/hash verification, so a failed or aborted
//! transfer never leaves a partial file at the target path.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use sha2::{Digest, Sha256};
use tokio::fs as afs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;
use uuid::Uuid;

use strand_xstat::{self as xstat, hash::HASH_BUF_SIZE, IdentityRecord};

use crate::naming::disambiguate;
use crate::policy::{ConflictKind, Policy};
use crate::{FsError, Resolved, Result};

/// Suffix of in-flight temp files; never visible as a finished entry.
pub const TMP_SUFFIX: &str = ".strand-tmp";

/// What currently occupies a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Existing {
    File,
    Dir,
    Other,
}

fn existing_at(path: &Path) -> Result<Option<Existing>> {
    match fs::symlink_metadata(path) {
        Ok(meta) => {
            let ft = meta.file_type();
            Ok(Some(if ft.is_dir() {
                Existing::Dir
            } else if ft.is_file() {
                Existing::File
            } else {
                Existing::Other
            }))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Validate the parent path of an operation target, reporting a missing
/// ancestor distinctly from an ancestor that exists but is not a
/// directory.
fn check_parent(parent: &Path) -> Result<()> {
    match fs::symlink_metadata(parent) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(FsError::NotADirectory),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            for ancestor in parent.ancestors().skip(1) {
                match fs::symlink_metadata(ancestor) {
                    Ok(meta) if meta.is_dir() => return Err(FsError::NotFound),
                    Ok(_) => return Err(FsError::NotADirectory),
                    Err(_) => continue,
                }
            }
            Err(FsError::NotFound)
        }
        Err(e) => Err(e.into()),
    }
}

fn record_of(path: &Path, managed: bool) -> Result<Option<IdentityRecord>> {
    if managed {
        Ok(Some(xstat::identify(path)?.1))
    } else {
        Ok(None)
    }
}

fn conflict_against(existing: Existing, want_dir: bool) -> ConflictKind {
    match (existing, want_dir) {
        (Existing::Dir, true) | (Existing::File, false) => ConflictKind::SameKind,
        _ => ConflictKind::DifferentKind,
    }
}

// ---------------------------------------------------------------------------
// mkdir
// ---------------------------------------------------------------------------

/// Create a directory named `name` under `parent`, resolving an
/// existing entry according to `policy`.
///
/// With `managed` set, the resulting entry's identity record is read
/// (and minted if necessary) and returned.
pub fn mkdir(parent: &Path, name: &str, policy: Option<Policy>, managed: bool) -> Result<Resolved> {
    check_parent(parent)?;
    let target = parent.join(name);

    match existing_at(&target)? {
        None => create_dir_at(&target, managed),
        Some(Existing::Dir) => match policy {
            None => Err(FsError::EntryExists {
                conflict: ConflictKind::SameKind,
            }),
            // Directory replace keeps the existing entry and uuid; it
            // does not remove pre-existing descendants.
            Some(Policy::Keep) | Some(Policy::Replace) => {
                Ok(Resolved::existing(record_of(&target, managed)?, target))
            }
            Some(Policy::Rename) => create_dir_disambiguated(parent, name, managed),
            Some(Policy::Skip) => Ok(Resolved::skipped()),
        },
        Some(_) => match policy {
            None | Some(Policy::Keep) => Err(FsError::EntryExists {
                conflict: ConflictKind::DifferentKind,
            }),
            Some(Policy::Replace) | Some(Policy::Rename) => {
                create_dir_disambiguated(parent, name, managed)
            }
            Some(Policy::Skip) => Ok(Resolved::skipped()),
        },
    }
}

fn create_dir_at(target: &Path, managed: bool) -> Result<Resolved> {
    fs::create_dir(target)?;
    Ok(Resolved::created(record_of(target, managed)?, target.to_path_buf()))
}

fn create_dir_disambiguated(parent: &Path, name: &str, managed: bool) -> Result<Resolved> {
    let candidate = parent.join(disambiguate(parent, name)?);
    match fs::create_dir(&candidate) {
        Ok(()) => Ok(Resolved::created(record_of(&candidate, managed)?, candidate)),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            // A concurrent creator claimed the suffix; rescan once.
            let retry = parent.join(disambiguate(parent, name)?);
            fs::create_dir(&retry)?;
            Ok(Resolved::created(record_of(&retry, managed)?, retry))
        }
        Err(e) => Err(e.into()),
    }
}

// ---------------------------------------------------------------------------
// clone_file
// ---------------------------------------------------------------------------

/// A file-creation request: stream `src` into `dst_dir/name`.
#[derive(Debug)]
pub struct CloneRequest<'a> {
    /// Readable source path (managed or native).
    pub src: &'a Path,
    /// Destination directory.
    pub dst_dir: &'a Path,
    /// Requested entry name.
    pub name: &'a str,
    /// Declared source size; verified against the streamed byte count.
    pub expected_size: Option<u64>,
    /// Declared source hash (lowercase hex); verified against the
    /// streamed digest.
    pub expected_hash: Option<&'a str>,
    /// Conflict policy for an occupied target.
    pub policy: Option<Policy>,
    /// Whether the destination gains an identity record.
    pub managed: bool,
    /// Cooperative cancellation flag checked between chunks.
    pub cancel: Option<&'a AtomicBool>,
}

/// Result of a clone, including the digest observed on the wire when a
/// transfer actually happened.
#[derive(Debug)]
pub struct CloneOutcome {
    pub outcome: Resolved,
    pub streamed_hash: Option<String>,
}

impl CloneOutcome {
    fn settled(outcome: Resolved) -> Self {
        Self {
            outcome,
            streamed_hash: None,
        }
    }
}

/// Create (or replace) a file by streaming the source content through
/// SHA-256, resolving an occupied target according to the policy.
pub async fn clone_file(req: CloneRequest<'_>) -> Result<CloneOutcome> {
    check_parent(req.dst_dir)?;
    let target = req.dst_dir.join(req.name);

    match existing_at(&target)? {
        None => stream_into(&req, target, None, false).await,
        Some(Existing::File) => match req.policy {
            None => Err(FsError::EntryExists {
                conflict: ConflictKind::SameKind,
            }),
            Some(Policy::Keep) => Ok(CloneOutcome::settled(Resolved::existing(
                record_of(&target, req.managed)?,
                target,
            ))),
            Some(Policy::Replace) => {
                let preserve = if req.managed {
                    Some(xstat::identify(&target)?.1.uuid)
                } else {
                    None
                };
                stream_into(&req, target, preserve, true).await
            }
            Some(Policy::Rename) => {
                let alt = req.dst_dir.join(disambiguate(req.dst_dir, req.name)?);
                stream_into(&req, alt, None, false).await
            }
            Some(Policy::Skip) => Ok(CloneOutcome::settled(Resolved::skipped())),
        },
        Some(_) => match req.policy {
            None | Some(Policy::Keep) => Err(FsError::EntryExists {
                conflict: ConflictKind::DifferentKind,
            }),
            Some(Policy::Replace) | Some(Policy::Rename) => {
                let alt = req.dst_dir.join(disambiguate(req.dst_dir, req.name)?);
                stream_into(&req, alt, None, false).await
            }
            Some(Policy::Skip) => Ok(CloneOutcome::settled(Resolved::skipped())),
        },
    }
}

async fn stream_into(
    req: &CloneRequest<'_>,
    dest: PathBuf,
    preserve_uuid: Option<Uuid>,
    replacing: bool,
) -> Result<CloneOutcome> {
    let tmp = req.dst_dir.join(format!(
        ".{}.{}{}",
        req.name,
        Uuid::new_v4().simple(),
        TMP_SUFFIX
    ));

    let digest = match stream_verified(req, &tmp).await {
        Ok(digest) => digest,
        Err(e) => {
            let _ = afs::remove_file(&tmp).await;
            return Err(e);
        }
    };

    let mut dest = dest;
    if !replacing {
        if let Some(existing) = existing_at(&dest)? {
            // The name was claimed while we streamed.
            if dest == req.dst_dir.join(req.name) {
                let _ = afs::remove_file(&tmp).await;
                return Err(FsError::EntryExists {
                    conflict: conflict_against(existing, false),
                });
            }
            // Disambiguated suffix raced; rescan once.
            debug!(path = %dest.display(), "disambiguated name raced, retrying");
            dest = req.dst_dir.join(disambiguate(req.dst_dir, req.name)?);
        }
    }

    afs::rename(&tmp, &dest).await?;

    let record = if req.managed {
        let meta = fs::symlink_metadata(&dest)?;
        let rec = IdentityRecord {
            uuid: preserve_uuid.unwrap_or_else(Uuid::new_v4),
            hash: Some(digest.clone()),
            hash_time: Some(xstat::mtime_ms(&meta)?),
            magic: None,
        };
        xstat::put_record(&dest, &rec)?;
        Some(rec)
    } else {
        None
    };

    let outcome = if replacing {
        Resolved::existing(record, dest)
    } else {
        Resolved::created(record, dest)
    };
    Ok(CloneOutcome {
        outcome,
        streamed_hash: Some(digest),
    })
}

/// Stream source to `tmp`, hashing as we go, and verify the declared
/// expectations. The caller removes `tmp` on error.
async fn stream_verified(req: &CloneRequest<'_>, tmp: &Path) -> Result<String> {
    let mut src = match afs::File::open(req.src).await {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(FsError::NotFound),
        Err(e) => return Err(e.into()),
    };
    let mut dst = afs::File::create(tmp).await?;

    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_BUF_SIZE];
    let mut total: u64 = 0;

    loop {
        if let Some(cancel) = req.cancel {
            if cancel.load(Ordering::Relaxed) {
                return Err(FsError::Aborted);
            }
        }
        let n = src.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        dst.write_all(&buf[..n]).await?;
        total += n as u64;
    }
    dst.flush().await?;
    drop(dst);

    if let Some(expected) = req.expected_size {
        if expected != total {
            return Err(FsError::SizeMismatch {
                expected,
                actual: total,
            });
        }
    }
    let digest = hex::encode(hasher.finalize());
    if let Some(expected) = req.expected_hash {
        if expected != digest {
            return Err(FsError::HashMismatch {
                expected: expected.to_string(),
                actual: digest,
            });
        }
    }
    Ok(digest)
}

// ---------------------------------------------------------------------------
// remove / rename
// ---------------------------------------------------------------------------

/// Remove a file or an empty directory. The entry's identity does not
/// survive its deletion.
pub fn remove(path: &Path) -> Result<()> {
    match existing_at(path)? {
        None => Err(FsError::NotFound),
        Some(Existing::Dir) => Ok(fs::remove_dir(path)?),
        Some(_) => Ok(fs::remove_file(path)?),
    }
}

/// Rename an entry within its directory, resolving a collision at the
/// new name according to `policy`.
pub fn rename(path: &Path, new_name: &str, policy: Option<Policy>, managed: bool) -> Result<Resolved> {
    let src_meta = match fs::symlink_metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(FsError::NotFound),
        Err(e) => return Err(e.into()),
    };
    let dir = path.parent().ok_or(FsError::NotFound)?;
    let src_is_dir = src_meta.is_dir();
    let target = dir.join(new_name);

    if target == path {
        return Ok(Resolved::existing(record_of(path, managed)?, target));
    }

    match existing_at(&target)? {
        None => {
            fs::rename(path, &target)?;
            Ok(Resolved::created(record_of(&target, managed)?, target))
        }
        Some(existing) => {
            let conflict = conflict_against(existing, src_is_dir);
            match policy {
                None => Err(FsError::EntryExists { conflict }),
                Some(Policy::Keep) => {
                    if conflict == ConflictKind::SameKind {
                        Ok(Resolved::existing(record_of(&target, managed)?, target))
                    } else {
                        Err(FsError::EntryExists { conflict })
                    }
                }
                Some(Policy::Replace) => {
                    if conflict == ConflictKind::SameKind && !src_is_dir {
                        // The moved file takes the target's place but
                        // keeps the target's uuid.
                        let preserve = if managed {
                            Some(xstat::identify(&target)?.1.uuid)
                        } else {
                            None
                        };
                        let src_record = record_of(path, managed)?;
                        fs::rename(path, &target)?;
                        let record = match (preserve, src_record) {
                            (Some(uuid), Some(mut rec)) => {
                                rec.uuid = uuid;
                                xstat::put_record(&target, &rec)?;
                                Some(rec)
                            }
                            (_, rec) => rec,
                        };
                        Ok(Resolved {
                            record,
                            path: Some(target),
                            resolved: true,
                        })
                    } else {
                        rename_disambiguated(path, dir, new_name, managed)
                    }
                }
                Some(Policy::Rename) => rename_disambiguated(path, dir, new_name, managed),
                Some(Policy::Skip) => Ok(Resolved::skipped()),
            }
        }
    }
}

fn rename_disambiguated(path: &Path, dir: &Path, name: &str, managed: bool) -> Result<Resolved> {
    let target = dir.join(disambiguate(dir, name)?);
    fs::rename(path, &target)?;
    Ok(Resolved::created(record_of(&target, managed)?, target))
}
