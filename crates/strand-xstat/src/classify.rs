//! Content classification by leading byte signature.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::Result;

/// Bytes inspected from the head of a file.
const SNIFF_LEN: usize = 512;

/// Classify a buffer by its leading signature.
pub fn sniff(buf: &[u8]) -> Option<&'static str> {
    if buf.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some("jpeg");
    }
    if buf.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
        return Some("png");
    }
    if buf.starts_with(b"GIF87a") || buf.starts_with(b"GIF89a") {
        return Some("gif");
    }
    if buf.starts_with(b"%PDF-") {
        return Some("pdf");
    }
    if !buf.is_empty() && looks_like_text(buf) {
        return Some("text");
    }
    None
}

/// Read the head of `path` and classify it.
pub fn sniff_file(path: &Path) -> Result<Option<&'static str>> {
    let mut file = File::open(path)?;
    let mut buf = [0u8; SNIFF_LEN];
    let mut filled = 0;
    while filled < SNIFF_LEN {
        let n = file.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(sniff(&buf[..filled]))
}

fn looks_like_text(buf: &[u8]) -> bool {
    // Valid UTF-8 up to a possibly clipped trailing sequence, with no
    // control bytes other than whitespace.
    let valid = match std::str::from_utf8(buf) {
        Ok(s) => s,
        Err(e) if e.error_len().is_none() => {
            std::str::from_utf8(&buf[..e.valid_up_to()]).unwrap_or("")
        }
        Err(_) => return false,
    };
    !valid.is_empty()
        && valid
            .chars()
            .all(|c| !c.is_control() || c == '\n' || c == '\r' || c == '\t')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sniff_signatures() {
        assert_eq!(sniff(&[0xFF, 0xD8, 0xFF, 0xE1]), Some("jpeg"));
        assert_eq!(
            sniff(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0]),
            Some("png")
        );
        assert_eq!(sniff(b"GIF89a...."), Some("gif"));
        assert_eq!(sniff(b"%PDF-1.7"), Some("pdf"));
    }

    #[test]
    fn test_sniff_text() {
        assert_eq!(sniff(b"plain notes\nwith lines\n"), Some("text"));
        assert_eq!(sniff("unicode caf\u{e9}".as_bytes()), Some("text"));
    }

    #[test]
    fn test_sniff_unknown() {
        assert_eq!(sniff(&[]), None);
        assert_eq!(sniff(&[0x00, 0x01, 0x02, 0x7F]), None);
    }
}
