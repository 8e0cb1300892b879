//! # FifoMQ Core Library
//!
//! FifoMQ is a lightweight, brokerless publish/subscribe messaging library for
//! interprocess communication on POSIX hosts. Publishers and subscribers are
//! independent processes (or threads) that rendezvous through a shared
//! directory on a fast filesystem, typically a RAM-backed tmpfs such as
//! `/dev/shm`. There is no daemon: every operation runs directly in the
//! calling process against the shared directory.
//!
//! ## How it works
//!
//! Each live subscription is a directory under the storage root containing a
//! named pipe (`queue`) and a set of pending payload files. Publishing
//! enumerates matching subscription directories, hard-links one staged payload
//! file into each, and writes the message id onto the corresponding FIFO.
//! Subscribers read ids from their FIFO and consume the payload files.
//!
//! - **At-most-once delivery** per channel, with per-channel FIFO ordering
//! - **Multi-writer / multi-reader safety** from POSIX primitives alone:
//!   atomic `link(2)`, atomic pipe writes below `PIPE_BUF`, independent
//!   file descriptors
//! - **No event loop and no background threads**: all suspension happens on
//!   kernel primitives (FIFO I/O, `poll(2)`)
//! - **Crash tolerant**: stale directories left by crashed subscribers are
//!   skipped by publishers and can be reaped explicitly
//!
//! ## Architecture Overview
//!
//! - [`config`] - Storage-root resolution and channel-directory enumeration
//! - [`topic`] - Topic grammar, wildcard matching, and name sanitization
//! - [`message`] - Message model, header values, and the payload codec
//! - [`channel`] - Subscription endpoint lifecycle (directory + FIFO)
//! - [`publish`] - Publish fan-out across matching channels
//! - [`subscribe`] - Non-blocking fetch and the timed subscribe loop
//! - [`admin`] - Stale-channel reaping and liveness listing
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fifomq::{fetch, publish, Channel};
//!
//! fn main() -> fifomq::Result<()> {
//!     let mut channel = Channel::new("news.=")?;
//!     channel.open()?;
//!
//!     let delivered = publish("news.sports", "goal!", None)?;
//!     assert_eq!(delivered, 1);
//!
//!     if let Some(message) = fetch(&mut channel)? {
//!         println!("{}: {} bytes", message.topic, message.content.len());
//!     }
//!
//!     channel.close();
//!     Ok(())
//! }
//! ```
//!
//! ## Topics
//!
//! Topics are dot-separated terms of `[A-Za-z0-9-]`. Published topics must be
//! concrete; subscription patterns may additionally use `=` (exactly one
//! term) or `+` (one or more terms) as a whole term:
//!
//! | Pattern | Matches | Does not match |
//! |---------|---------|----------------|
//! | `news.sports` | `news.sports` | `news.tech` |
//! | `news.=` | `news.sports`, `news.tech` | `news`, `news.tech.eu` |
//! | `logs.+` | `logs.app`, `logs.app.error` | `logs` |
//!
//! ## Environment
//!
//! `PUBSUB_HOME` overrides the storage root. It is read once on first use and
//! cached for the remainder of the process lifetime.

pub mod admin;
pub mod channel;
pub mod config;
pub mod message;
pub mod publish;
pub mod subscribe;
pub mod topic;

pub use admin::{list_active_channels, list_inactive_channels, reap_stale};
pub use channel::{Channel, ChannelState};
pub use config::storage_root;
pub use message::{HeaderValue, Headers, Message};
pub use publish::publish;
pub use subscribe::{fetch, subscribe, CallbackError};
pub use topic::TopicMatcher;

use thiserror::Error;

/// FifoMQ error types
///
/// Expected filesystem races during fan-out and fetch (`ENOENT`, `EEXIST`,
/// `ENXIO`, `EAGAIN`) are not errors; they are handled internally as
/// documented on [`publish`] and [`fetch`]. Everything else surfaces here.
#[derive(Debug, Error)]
pub enum FifomqError {
    /// Topic failed validation; raised by [`publish`] and [`Channel::new`]
    #[error("Invalid topic: {0}")]
    InvalidTopic(String),

    /// A header entry failed validation at publish time
    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    /// Malformed caller input, e.g. a negative subscribe timeout
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The channel is not in the open state
    #[error("Channel is not open")]
    ChannelNotOpen,

    /// Filesystem or FIFO operation failed unexpectedly
    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    /// A payload file could not be decoded
    #[error("Codec error: {0}")]
    Codec(String),

    /// A subscriber callback failed; the subscribe loop aborts and surfaces it
    #[error("Callback error: {0}")]
    Callback(#[source] CallbackError),
}

/// Result type alias for FifoMQ operations
pub type Result<T> = std::result::Result<T, FifomqError>;
