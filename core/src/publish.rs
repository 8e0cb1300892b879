//! Publish fan-out: deliver one message to every matching channel.
//!
//! The payload is serialized once into a staging file under the storage root,
//! then hard-linked into each matching channel directory before the message
//! id is written onto that channel's FIFO. `ENOENT`, `EEXIST`, `ENXIO`, and a
//! persistently full pipe are expected race outcomes with concurrent
//! subscribers and are skipped, with best-effort compensation; only
//! unexpected I/O failures surface as errors.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use dashmap::DashMap;
use tracing::{debug, trace, warn};

use crate::channel::{PATTERN_FILE, QUEUE_FILE};
use crate::config;
use crate::message::{id_file_name, validate_headers, Headers, Message};
use crate::topic::{validate_publish_topic, TopicMatcher};
use crate::Result;

/// Attempts to write the id token before giving up on a full FIFO.
const FIFO_WRITE_ATTEMPTS: u32 = 10;
/// Pause between attempts on a full FIFO.
const FIFO_WRITE_BACKOFF: Duration = Duration::from_millis(1);

/// Entries kept in the publisher-side matcher cache before it is reset.
const MATCHER_CACHE_CAP: usize = 1024;

/// Publishes a message and returns the number of channels it was delivered to.
///
/// `topic` must be concrete. The count includes only channels whose FIFO
/// accepted the id token; unreachable channels (no reader attached, closed
/// mid-enumeration, or persistently full queue) are skipped silently.
pub fn publish(
    topic: &str,
    content: impl Into<Bytes>,
    headers: Option<Headers>,
) -> Result<usize> {
    validate_publish_topic(topic)?;
    let headers = headers.unwrap_or_default();
    validate_headers(&headers)?;

    let message = Message::new(topic, content, headers);
    let payload = message.encode()?;
    let root = config::ensure_root()?;

    let staging = root.join(format!(".tmp.{}", id_file_name(message.id)));
    let mut staging_file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&staging)?;
    staging_file.write_all(&payload)?;
    drop(staging_file);

    let delivered = fan_out(topic, message.id, &staging);

    if let Err(e) = fs::remove_file(&staging) {
        warn!(staging = %staging.display(), error = %e, "failed to remove staging file");
    }
    let delivered = delivered?;
    debug!(topic, id = message.id, delivered, "published");
    Ok(delivered)
}

fn fan_out(topic: &str, id: u64, staging: &Path) -> Result<usize> {
    let mut delivered = 0;
    for dir in config::channel_dirs()? {
        let Some(matcher) = matcher_for(&dir) else {
            continue;
        };
        if !matcher.matches(topic) {
            continue;
        }
        if deliver_to(&dir, id, staging)? {
            delivered += 1;
        }
    }
    Ok(delivered)
}

/// Links the staged payload into `dir` and enqueues the id token. Returns
/// whether the channel counts as delivered.
fn deliver_to(dir: &Path, id: u64, staging: &Path) -> Result<bool> {
    let payload = dir.join(id_file_name(id));
    match fs::hard_link(staging, &payload) {
        Ok(()) => {}
        // Same id already delivered here: a rare id collision lost the race.
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            trace!(dir = %dir.display(), id, "payload already linked, skipping");
            return Ok(false);
        }
        // Channel closed between enumeration and linking.
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            trace!(dir = %dir.display(), "channel vanished before link, skipping");
            return Ok(false);
        }
        Err(e) => return Err(e.into()),
    }

    let queue = dir.join(QUEUE_FILE);
    let mut writer = match OpenOptions::new()
        .write(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(&queue)
    {
        Ok(writer) => writer,
        // ENXIO: no reader holds the FIFO; the subscriber crashed or left.
        Err(e) if e.raw_os_error() == Some(libc::ENXIO) => {
            warn!(dir = %dir.display(), "channel has no reader, skipping");
            unlink_payload(&payload);
            return Ok(false);
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            unlink_payload(&payload);
            return Ok(false);
        }
        Err(e) => {
            unlink_payload(&payload);
            return Err(e.into());
        }
    };

    // One write(2) per token: tokens are far below PIPE_BUF, so concurrent
    // publishers are serialized by the kernel and tokens never interleave.
    let token = format!("{}\n", id_file_name(id));
    for attempt in 0..FIFO_WRITE_ATTEMPTS {
        match writer.write(token.as_bytes()) {
            Ok(n) if n == token.len() => return Ok(true),
            // A non-blocking pipe write below PIPE_BUF is all-or-nothing; a
            // short count would mean the invariant broke, so bail out.
            Ok(n) => {
                warn!(dir = %dir.display(), wrote = n, "short FIFO write, skipping channel");
                break;
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                trace!(dir = %dir.display(), attempt, "FIFO full, retrying");
                std::thread::sleep(FIFO_WRITE_BACKOFF);
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            // Reader went away between open and write.
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                warn!(dir = %dir.display(), "reader left during enqueue, skipping");
                break;
            }
            Err(e) => {
                unlink_payload(&payload);
                return Err(e.into());
            }
        }
    }

    warn!(dir = %dir.display(), id, "could not enqueue id token, dropping delivery");
    unlink_payload(&payload);
    Ok(false)
}

fn unlink_payload(payload: &Path) {
    if let Err(e) = fs::remove_file(payload) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!(payload = %payload.display(), error = %e, "failed to unlink payload");
        }
    }
}

struct CachedMatcher {
    modified: SystemTime,
    matcher: Arc<TopicMatcher>,
}

fn matcher_cache() -> &'static DashMap<PathBuf, CachedMatcher> {
    static CACHE: OnceLock<DashMap<PathBuf, CachedMatcher>> = OnceLock::new();
    CACHE.get_or_init(DashMap::new)
}

/// Recovers the pattern of the channel at `dir` and returns its compiled
/// matcher, reusing the process-wide cache keyed by path and sidecar mtime.
///
/// Directories without a readable, valid sidecar are not channels and yield
/// `None`.
fn matcher_for(dir: &Path) -> Option<Arc<TopicMatcher>> {
    let sidecar = dir.join(PATTERN_FILE);
    let modified = fs::metadata(&sidecar).and_then(|m| m.modified()).ok()?;

    let cache = matcher_cache();
    if let Some(hit) = cache.get(dir) {
        if hit.modified == modified {
            return Some(Arc::clone(&hit.matcher));
        }
    }

    let raw = fs::read_to_string(&sidecar).ok()?;
    let matcher = match TopicMatcher::compile(raw.trim_end()) {
        Ok(matcher) => Arc::new(matcher),
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "unusable pattern sidecar, skipping");
            return None;
        }
    };
    debug!(dir = %dir.display(), pattern = matcher.pattern(), "compiled channel matcher");

    if cache.len() >= MATCHER_CACHE_CAP {
        cache.clear();
    }
    cache.insert(
        dir.to_path_buf(),
        CachedMatcher {
            modified,
            matcher: Arc::clone(&matcher),
        },
    );
    Some(matcher)
}
