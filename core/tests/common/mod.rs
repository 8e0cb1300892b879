use std::sync::OnceLock;

use tempfile::TempDir;

/// Pins this test binary's storage root to a scratch directory.
///
/// The root resolver caches on first use, so every test calls this before
/// touching the library. The scratch directory lives for the whole test run.
pub fn init_storage_root() {
    static SCRATCH: OnceLock<TempDir> = OnceLock::new();
    SCRATCH.get_or_init(|| {
        let dir = tempfile::tempdir().expect("create test storage root");
        std::env::set_var("PUBSUB_HOME", dir.path());
        dir
    });
}
