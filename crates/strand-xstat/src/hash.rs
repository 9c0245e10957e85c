//! Streaming SHA-256 content hashing.
//!
//! Hashes are computed incrementally over fixed-size chunks so
//! multi-gigabyte inputs never need whole-file buffering.

use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::Result;

/// Chunk size for streaming reads (64 KiB).
pub const HASH_BUF_SIZE: usize = 64 * 1024;

/// Hash everything the reader yields; returns the lowercase hex digest
/// and the number of bytes consumed.
pub async fn hash_reader<R: AsyncRead + Unpin>(reader: &mut R) -> Result<(String, u64)> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_BUF_SIZE];
    let mut total: u64 = 0;

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }

    Ok((hex::encode(hasher.finalize()), total))
}

/// Hash the file at `path`.
pub async fn hash_file(path: &Path) -> Result<(String, u64)> {
    let mut file = File::open(path).await?;
    hash_reader(&mut file).await
}

/// Hash an in-memory buffer. Convenience for small payloads and tests.
pub fn hash_bytes(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_hash_bytes_known_vector() {
        // SHA-256 of the empty input
        assert_eq!(
            hash_bytes(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[tokio::test]
    async fn test_hash_file_matches_hash_bytes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("blob");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(b"strand hash check").unwrap();
        drop(f);

        let (digest, size) = hash_file(&path).await.unwrap();
        assert_eq!(size, 17);
        assert_eq!(digest, hash_bytes(b"strand hash check"));
    }

    #[tokio::test]
    async fn test_hash_file_spanning_chunks() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("big");
        let data = vec![0xA5u8; HASH_BUF_SIZE * 3 + 17];
        std::fs::write(&path, &data).unwrap();

        let (digest, size) = hash_file(&path).await.unwrap();
        assert_eq!(size, data.len() as u64);
        assert_eq!(digest, hash_bytes(&data));
    }
}
