//! Storage-root resolution and channel-directory enumeration.
//!
//! The storage root is resolved exactly once per process: from the
//! `PUBSUB_HOME` environment variable if set, else `/dev/shm/pubsub` on hosts
//! that have `/dev/shm`, else `<system-temp>/pubsub`. Changes to the
//! environment after the first use have no effect.

use std::env;
use std::fs::{self, DirBuilder};
use std::io;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use tracing::debug;

use crate::Result;

/// Environment variable that overrides the storage root.
pub const ROOT_ENV: &str = "PUBSUB_HOME";

static ROOT: OnceLock<PathBuf> = OnceLock::new();

fn resolve_root() -> PathBuf {
    if let Ok(dir) = env::var(ROOT_ENV) {
        if !dir.is_empty() {
            debug!(root = %dir, "storage root from {}", ROOT_ENV);
            return PathBuf::from(dir);
        }
    }
    let shm = Path::new("/dev/shm");
    if shm.is_dir() {
        return shm.join("pubsub");
    }
    env::temp_dir().join("pubsub")
}

/// Returns the process-wide storage root path.
///
/// Resolved on the first call and cached; never touches the filesystem.
pub fn storage_root() -> &'static Path {
    ROOT.get_or_init(resolve_root).as_path()
}

/// Returns the storage root, creating the directory (mode 0o755) if absent.
pub fn ensure_root() -> Result<&'static Path> {
    let root = storage_root();
    if !root.is_dir() {
        DirBuilder::new()
            .recursive(true)
            .mode(0o755)
            .create(root)?;
        debug!(root = %root.display(), "created storage root");
    }
    Ok(root)
}

/// Lists the live channel directories under the storage root.
///
/// Skips non-directory entries, hidden entries (publisher staging files live
/// at `.tmp.<id>`), and names without the `<pattern>.<suffix>` shape. A
/// missing root means no channels.
pub fn channel_dirs() -> Result<Vec<PathBuf>> {
    let root = storage_root();
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut dirs = Vec::new();
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if name.starts_with('.') || !name.contains('.') {
            continue;
        }
        match entry.file_type() {
            Ok(ft) if ft.is_dir() => dirs.push(entry.path()),
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(dirs)
}

#[cfg(test)]
pub(crate) mod testutil {
    use std::sync::OnceLock;

    use tempfile::TempDir;

    /// Pins the storage root of this test binary to a scratch directory.
    ///
    /// Must run before the first storage-root use; every test calls it first.
    pub(crate) fn init_test_root() {
        static SCRATCH: OnceLock<TempDir> = OnceLock::new();
        SCRATCH.get_or_init(|| {
            let dir = tempfile::tempdir().expect("create test storage root");
            std::env::set_var(super::ROOT_ENV, dir.path());
            dir
        });
    }
}
