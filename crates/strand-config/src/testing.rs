//! Test environment abstraction for isolated testing.
//!
//! Provides `TestEnvironment` to manage isolated drive roots, a native
//! (unmanaged) mount, and a unique daemon socket path per test. Tests
//! control every lifecycle themselves; nothing is auto-started.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::TempDir;

/// Atomic counter for unique test IDs
static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Isolated test environment with unique paths
pub struct TestEnvironment {
    /// Temporary directory (dropped on cleanup)
    _temp_dir: TempDir,
    /// Source drive root
    pub src_root: PathBuf,
    /// Destination drive root
    pub dst_root: PathBuf,
    /// Unmanaged mount for import/export tests
    pub native_root: PathBuf,
    /// Unique socket path for this test
    pub socket_path: PathBuf,
    /// Unique test ID
    pub test_id: u32,
}

impl TestEnvironment {
    /// Create a fresh environment; all directories exist on return.
    pub fn new() -> Self {
        let test_id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        let temp_dir = TempDir::new().expect("create test tempdir");
        let base = temp_dir.path();

        let src_root = base.join("src-drive");
        let dst_root = base.join("dst-drive");
        let native_root = base.join("native");
        let socket_path = base.join(format!("strandd_{}.sock", test_id));

        std::fs::create_dir_all(&src_root).expect("create src drive");
        std::fs::create_dir_all(&dst_root).expect("create dst drive");
        std::fs::create_dir_all(&native_root).expect("create native mount");

        Self {
            _temp_dir: temp_dir,
            src_root,
            dst_root,
            native_root,
            socket_path,
            test_id,
        }
    }
}

impl Default for TestEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_is_isolated() {
        let a = TestEnvironment::new();
        let b = TestEnvironment::new();
        assert_ne!(a.src_root, b.src_root);
        assert_ne!(a.socket_path, b.socket_path);
        assert!(a.src_root.is_dir());
        assert!(a.native_root.is_dir());
    }
}
