//! Administrative utilities: stale-channel reaping and liveness listing.
//!
//! Publishers never reap; a stale directory only costs them one skipped
//! delivery attempt. Reaping is an explicit administrative action.

use std::fs::{self, OpenOptions};
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::time::{Duration, SystemTime};

use tracing::{debug, warn};

use crate::channel::{PATTERN_FILE, QUEUE_FILE};
use crate::config;
use crate::Result;

/// Removes channel directories that look abandoned and returns how many were
/// reaped.
///
/// A directory qualifies only when its mtime is older than `older_than` and
/// its FIFO cannot be opened for writing (no reader attached, or the FIFO is
/// missing entirely). Live channels always have a reader holding the FIFO
/// open, so they are never touched regardless of age.
pub fn reap_stale(older_than: Duration) -> Result<usize> {
    let now = SystemTime::now();
    let mut reaped = 0;
    for dir in config::channel_dirs()? {
        let age = match fs::metadata(&dir).and_then(|m| m.modified()) {
            Ok(modified) => now.duration_since(modified).unwrap_or(Duration::ZERO),
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "cannot stat channel directory");
                continue;
            }
        };
        if age < older_than {
            continue;
        }
        if has_reader(&dir) {
            continue;
        }
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                debug!(dir = %dir.display(), age_secs = age.as_secs(), "reaped stale channel");
                reaped += 1;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "failed to reap channel directory");
            }
        }
    }
    Ok(reaped)
}

/// Lists the subscription patterns of channels whose owning process is still
/// running. Sorted and deduplicated.
pub fn list_active_channels() -> Result<Vec<String>> {
    list_channels(true)
}

/// Lists the subscription patterns of channels whose owning process is gone.
/// Sorted and deduplicated.
pub fn list_inactive_channels() -> Result<Vec<String>> {
    list_channels(false)
}

fn list_channels(want_alive: bool) -> Result<Vec<String>> {
    let mut patterns = Vec::new();
    for dir in config::channel_dirs()? {
        let Some(pid) = owner_pid(&dir) else {
            continue;
        };
        if process_alive(pid) != want_alive {
            continue;
        }
        match fs::read_to_string(dir.join(PATTERN_FILE)) {
            Ok(raw) => patterns.push(raw.trim_end().to_string()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "cannot read pattern sidecar");
            }
        }
    }
    patterns.sort();
    patterns.dedup();
    Ok(patterns)
}

/// Extracts the owner pid from a `<pattern>.<pid>-<seq>-<rand>` directory name.
fn owner_pid(dir: &Path) -> Option<u32> {
    let name = dir.file_name()?.to_str()?;
    let (_, suffix) = name.rsplit_once('.')?;
    suffix.split('-').next()?.parse().ok()
}

/// Signal-0 probe: the process exists if kill succeeds or we merely lack
/// permission to signal it.
fn process_alive(pid: u32) -> bool {
    let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
    rc == 0 || io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Whether some process holds the FIFO read end open.
fn has_reader(dir: &Path) -> bool {
    match OpenOptions::new()
        .write(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(dir.join(QUEUE_FILE))
    {
        Ok(_) => true,
        Err(e) if e.raw_os_error() == Some(libc::ENXIO) => false,
        Err(e) if e.kind() == io::ErrorKind::NotFound => false,
        // Unreadable state: err on the side of keeping the directory.
        Err(_) => true,
    }
}
