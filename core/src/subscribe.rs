//! Non-blocking fetch and the timed subscribe loop.
//!
//! `fetch` takes at most one id token off the channel FIFO and loads the
//! matching payload file. `subscribe` waits for FIFO readability with
//! `poll(2)` in bounded slices, dispatching each fetched message to the
//! callback until the deadline elapses or the process receives `SIGINT` or
//! `SIGTERM`. Cancellation is cooperative: the signal only flips a flag that
//! the loop checks at each iteration boundary.

use std::fs;
use std::io;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Once;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::channel::Channel;
use crate::message::{id_file_name, Message};
use crate::{FifomqError, Result};

/// Error type a subscriber callback may return; surfaced as
/// [`FifomqError::Callback`].
pub type CallbackError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Upper bound on one poll(2) slice, so signals and deadlines are observed
/// promptly even on an idle queue.
const POLL_SLICE: Duration = Duration::from_millis(1000);
/// Pause after a wakeup that produced no message (an empty FIFO with no
/// writer reports readable-at-EOF continuously).
const IDLE_BACKOFF: Duration = Duration::from_millis(10);

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

/// Fetches a single message from the channel without blocking.
///
/// Returns `None` when no complete id token is queued, or when the payload
/// file is already gone (consumed by a competing fetch or reaped).
pub fn fetch(channel: &mut Channel) -> Result<Option<Message>> {
    channel.require_open()?;
    let Some(id) = channel.read_token()? else {
        return Ok(None);
    };

    let payload = channel.directory().join(id_file_name(id));
    let data = match fs::read(&payload) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            trace!(id, "payload already consumed");
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    };
    let message = Message::decode(&data)?;
    if let Err(e) = fs::remove_file(&payload) {
        // The directory is purged at close anyway.
        warn!(payload = %payload.display(), error = %e, "failed to unlink consumed payload");
    }
    trace!(id, topic = %message.topic, "fetched message");
    Ok(Some(message))
}

/// Subscribes to the channel, invoking `callback` for each message.
///
/// With `timeout_seconds == 0.0` the loop runs until the process is signalled
/// (`SIGINT`/`SIGTERM`); positive values bound it by wall-clock time, exiting
/// as soon as or shortly after the deadline elapses. Returns the number of
/// messages processed. A callback failure aborts the loop and surfaces as
/// [`FifomqError::Callback`].
pub fn subscribe<F>(channel: &mut Channel, mut callback: F, timeout_seconds: f64) -> Result<usize>
where
    F: FnMut(Message) -> std::result::Result<(), CallbackError>,
{
    if !timeout_seconds.is_finite() || timeout_seconds < 0.0 {
        return Err(FifomqError::InvalidArgument(format!(
            "timeout_seconds must be a non-negative number, got {timeout_seconds}"
        )));
    }
    channel.require_open()?;
    install_signal_handlers();

    let deadline = (timeout_seconds > 0.0)
        .then(|| Instant::now() + Duration::from_secs_f64(timeout_seconds));
    let mut processed = 0usize;

    loop {
        if SHUTDOWN.load(Ordering::SeqCst) {
            debug!(processed, "subscribe interrupted by signal");
            break;
        }
        let slice = match deadline {
            Some(deadline) => {
                let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                    break;
                };
                remaining.min(POLL_SLICE)
            }
            None => POLL_SLICE,
        };

        let fd = channel.queue_fd().ok_or(FifomqError::ChannelNotOpen)?;
        if !wait_readable(fd, slice)? {
            continue;
        }
        match fetch(channel)? {
            Some(message) => {
                callback(message).map_err(FifomqError::Callback)?;
                processed += 1;
            }
            None => std::thread::sleep(IDLE_BACKOFF),
        }
    }
    Ok(processed)
}

/// Waits for the FIFO read end to become readable, at most `timeout`.
/// An interrupting signal counts as "not readable" so the caller re-checks
/// the shutdown flag.
fn wait_readable(fd: RawFd, timeout: Duration) -> Result<bool> {
    let mut pollfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    let timeout_ms = timeout.as_millis().min(i32::MAX as u128) as libc::c_int;
    let rc = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };
    if rc < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(false);
        }
        return Err(err.into());
    }
    Ok(rc > 0 && (pollfd.revents & (libc::POLLIN | libc::POLLHUP)) != 0)
}

extern "C" fn on_shutdown_signal(_signal: libc::c_int) {
    SHUTDOWN.store(true, Ordering::SeqCst);
}

/// Installs `SIGINT`/`SIGTERM` handlers once per process. `SA_RESTART` is
/// deliberately absent so a pending poll(2) returns `EINTR` and the loop can
/// observe the flag.
fn install_signal_handlers() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| unsafe {
        let handler = on_shutdown_signal as extern "C" fn(libc::c_int);
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = handler as usize;
        libc::sigemptyset(&mut action.sa_mask);
        action.sa_flags = 0;
        for signal in [libc::SIGINT, libc::SIGTERM] {
            if libc::sigaction(signal, &action, std::ptr::null_mut()) != 0 {
                warn!(signal, "failed to install shutdown handler");
            }
        }
    });
}
