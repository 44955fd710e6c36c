//! Crate-local test utilities, and `proptest` strategies exported to
//! downstream crates under the `test_utils` feature.

#[cfg(feature = "test_utils")]
pub use crate::cid::proptest_support::arb_cid;

use std::path::{Path, PathBuf};

use crate::store::Store;

/// A `tempfile`-free scratch directory, removed on drop. Shared by every
/// module's tests so each one isn't hand-rolling its own copy.
pub(crate) struct TempDir(PathBuf);

impl TempDir {
    pub(crate) fn new() -> Self {
        let path = std::env::temp_dir().join(format!(
            "blockswap-engine-test-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        std::fs::create_dir_all(&path).unwrap();
        Self(path)
    }

    pub(crate) fn path(&self) -> &Path {
        &self.0
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.0);
    }
}

/// An initialized [`Store`] rooted in a fresh [`TempDir`]; the directory
/// is removed once the returned guard is dropped.
pub(crate) async fn temp_store() -> (Store, TempDir) {
    let dir = TempDir::new();
    let store = Store::new(dir.path());
    store.init().await.unwrap();
    (store, dir)
}
