//! Channel: a live subscription endpoint backed by one directory and one FIFO.
//!
//! Construction validates the pattern and computes a unique directory path
//! without touching the filesystem. `open()` creates the directory, writes the
//! `pattern` sidecar publishers use to recover the raw pattern, creates the
//! `queue` FIFO, and holds its read end non-blocking. `close()` (also run by
//! `Drop` while open) removes the directory and everything in it.

use std::ffi::CString;
use std::fs::{self, DirBuilder, File, OpenOptions};
use std::io::{self, Read};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, warn};

use crate::config;
use crate::topic::{sanitize_pattern, TopicMatcher};
use crate::{FifomqError, Result};

/// File name of the delivery FIFO inside a channel directory.
pub(crate) const QUEUE_FILE: &str = "queue";
/// File name of the raw-pattern sidecar inside a channel directory.
pub(crate) const PATTERN_FILE: &str = "pattern";

static NEXT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Lifecycle state of a [`Channel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Validated and named; nothing exists on disk yet.
    Constructed,
    /// Directory, sidecar, and FIFO exist; the read end is held.
    Open,
    /// Closed; the directory has been removed.
    Closed,
}

/// A subscription endpoint.
///
/// Two channels constructed with identical patterns get independent
/// directories and therefore independent copies of every matching message. A
/// channel is not safe to share between concurrent readers; different
/// channels are fully independent.
#[derive(Debug)]
pub struct Channel {
    pattern: String,
    matcher: TopicMatcher,
    directory: PathBuf,
    fifo_path: PathBuf,
    state: ChannelState,
    reader: Option<File>,
    token_buf: Vec<u8>,
}

impl Channel {
    /// Validates `pattern` and constructs a channel in the
    /// [`ChannelState::Constructed`] state.
    ///
    /// The directory name is `<sanitized-pattern>.<pid>-<seq>-<rand>`, unique
    /// across concurrent constructions in this or any other process.
    pub fn new(pattern: &str) -> Result<Self> {
        let matcher = TopicMatcher::compile(pattern)?;
        let suffix = format!(
            "{}-{}-{:08x}",
            std::process::id(),
            NEXT_SEQ.fetch_add(1, Ordering::Relaxed),
            rand::random::<u32>(),
        );
        let directory = config::storage_root().join(format!(
            "{}.{}",
            sanitize_pattern(pattern),
            suffix
        ));
        let fifo_path = directory.join(QUEUE_FILE);
        Ok(Self {
            pattern: pattern.to_string(),
            matcher,
            directory,
            fifo_path,
            state: ChannelState::Constructed,
            reader: None,
            token_buf: Vec::new(),
        })
    }

    /// Creates the channel directory, sidecar, and FIFO, and opens the FIFO
    /// read end non-blocking. No-op when already open.
    pub fn open(&mut self) -> Result<()> {
        if self.state == ChannelState::Open {
            return Ok(());
        }
        config::ensure_root()?;
        DirBuilder::new().mode(0o755).create(&self.directory)?;
        fs::write(self.directory.join(PATTERN_FILE), self.pattern.as_bytes())?;
        mkfifo(&self.fifo_path, 0o644)?;
        let reader = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&self.fifo_path)?;
        self.reader = Some(reader);
        self.token_buf.clear();
        self.state = ChannelState::Open;
        debug!(pattern = %self.pattern, dir = %self.directory.display(), "channel opened");
        Ok(())
    }

    /// Closes the FIFO read end and removes the channel directory with all
    /// remaining payload files. Never fails; partial prior removal and
    /// double-close are tolerated.
    pub fn close(&mut self) {
        if self.state == ChannelState::Closed {
            return;
        }
        self.reader = None;
        if self.state == ChannelState::Open {
            match fs::remove_dir_all(&self.directory) {
                Ok(()) => debug!(dir = %self.directory.display(), "channel closed"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(dir = %self.directory.display(), error = %e, "channel cleanup failed");
                }
            }
        }
        self.state = ChannelState::Closed;
    }

    /// The subscription pattern this channel was constructed with.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Whether this channel's pattern accepts the concrete `topic`.
    pub fn matches(&self, topic: &str) -> bool {
        self.matcher.matches(topic)
    }

    /// The channel's on-disk directory (exists only while open).
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub(crate) fn require_open(&self) -> Result<()> {
        if self.state == ChannelState::Open {
            Ok(())
        } else {
            Err(FifomqError::ChannelNotOpen)
        }
    }

    pub(crate) fn queue_fd(&self) -> Option<RawFd> {
        self.reader.as_ref().map(|f| f.as_raw_fd())
    }

    /// Reads the next complete id token off the FIFO without blocking.
    ///
    /// Partial tokens are buffered across calls; `None` means no complete
    /// token is available right now. Malformed tokens are dropped.
    pub(crate) fn read_token(&mut self) -> Result<Option<u64>> {
        let reader = self.reader.as_mut().ok_or(FifomqError::ChannelNotOpen)?;
        loop {
            if let Some(pos) = self.token_buf.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = self.token_buf.drain(..=pos).collect();
                let text = &line[..line.len() - 1];
                match std::str::from_utf8(text)
                    .ok()
                    .and_then(|s| u64::from_str_radix(s, 16).ok())
                {
                    Some(id) => return Ok(Some(id)),
                    None => {
                        warn!(
                            token = %String::from_utf8_lossy(text),
                            "dropping malformed queue token"
                        );
                        continue;
                    }
                }
            }

            let mut chunk = [0u8; 64];
            match reader.read(&mut chunk) {
                // EOF: the queue is drained and no writer is attached.
                Ok(0) => return Ok(None),
                Ok(n) => self.token_buf.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        if self.state == ChannelState::Open {
            debug!(pattern = %self.pattern, "closing channel on drop");
            self.close();
        }
    }
}

fn mkfifo(path: &Path, mode: libc::mode_t) -> Result<()> {
    let cpath = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| FifomqError::Storage(io::Error::from(io::ErrorKind::InvalidInput)))?;
    let rc = unsafe { libc::mkfifo(cpath.as_ptr(), mode) };
    if rc != 0 {
        return Err(io::Error::last_os_error().into());
    }
    Ok(())
}
