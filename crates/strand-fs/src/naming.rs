//! Disambiguated sibling naming.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use crate::Result;

/// Find the lowest unused `"name (n)"`, n >= 2, among the existing
/// entries of `dir`.
///
/// Callers creating under the returned name must tolerate one retry:
/// a concurrent creator can claim the same suffix between the scan and
/// the create.
pub fn disambiguate(dir: &Path, name: &str) -> Result<String> {
    let mut taken: HashSet<String> = HashSet::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        taken.insert(entry.file_name().to_string_lossy().into_owned());
    }

    let mut n: u32 = 2;
    loop {
        let candidate = format!("{} ({})", name, n);
        if !taken.contains(&candidate) {
            return Ok(candidate);
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_first_suffix_is_two() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("report"), b"").unwrap();
        assert_eq!(disambiguate(dir.path(), "report").unwrap(), "report (2)");
    }

    #[test]
    fn test_lowest_unused_suffix() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("report"), b"").unwrap();
        fs::write(dir.path().join("report (2)"), b"").unwrap();
        fs::write(dir.path().join("report (4)"), b"").unwrap();
        assert_eq!(disambiguate(dir.path(), "report").unwrap(), "report (3)");
    }

    #[test]
    fn test_suffixes_increase_without_collisions() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"").unwrap();
        for expected in 2..=5 {
            let name = disambiguate(dir.path(), "a.txt").unwrap();
            assert_eq!(name, format!("a.txt ({})", expected));
            fs::write(dir.path().join(&name), b"").unwrap();
        }
    }
}
