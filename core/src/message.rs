//! Message model and the payload file codec.
//!
//! Payload file format (big-endian, CRC-guarded like an append-only log
//! record):
//!
//! ```text
//! [magic: 4][version: 1][id: 8][timestamp: 8]
//! [topic_len: 4][topic: topic_len]
//! [header_count: 4][entries...]
//! [content_len: 4][content: content_len]
//! [crc32: 4]   over everything between the version byte and the CRC
//! ```
//!
//! A header entry is `[key_len: 4][key][tag: 1][body]` with tag
//! `{0: null, 1: bool, 2: i64, 3: f64, 4: string}`. The format is
//! self-contained and stable within one build; there is no cross-version
//! compatibility requirement because storage is process-scoped and ephemeral.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{BufMut, Bytes, BytesMut};

use crate::{FifomqError, Result};

const MAGIC: u32 = 0x464D_5131; // "FMQ1"
const FORMAT_VERSION: u8 = 1;

const TAG_NULL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_INT: u8 = 2;
const TAG_FLOAT: u8 = 3;
const TAG_STRING: u8 = 4;

/// Message ids are microseconds-since-epoch shifted left with random low
/// bits, so ids from one publisher are monotonic-ish while concurrent
/// publishers in the same microsecond still diverge. The high clock bits fall
/// off the left of the u64; uniqueness rests on the low clock bits plus the
/// random tail, and the rare collision loses the link race during fan-out.
const ID_RANDOM_BITS: u32 = 20;

/// Scalar header value.
///
/// The permitted variants mirror what the on-disk header entry can carry;
/// anything richer belongs in the message content.
#[derive(Debug, Clone, PartialEq)]
pub enum HeaderValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl From<bool> for HeaderValue {
    fn from(v: bool) -> Self {
        HeaderValue::Bool(v)
    }
}

impl From<i64> for HeaderValue {
    fn from(v: i64) -> Self {
        HeaderValue::Int(v)
    }
}

impl From<i32> for HeaderValue {
    fn from(v: i32) -> Self {
        HeaderValue::Int(v.into())
    }
}

impl From<f64> for HeaderValue {
    fn from(v: f64) -> Self {
        HeaderValue::Float(v)
    }
}

impl From<&str> for HeaderValue {
    fn from(v: &str) -> Self {
        HeaderValue::Str(v.to_string())
    }
}

impl From<String> for HeaderValue {
    fn from(v: String) -> Self {
        HeaderValue::Str(v)
    }
}

/// Message headers: string keys mapped to scalar values.
pub type Headers = HashMap<String, HeaderValue>;

/// An immutable message as published and fetched.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Unique-with-high-probability id; also the payload file name and the
    /// token enqueued on the channel FIFO.
    pub id: u64,
    /// Microseconds since the Unix epoch at publish time.
    pub timestamp: u64,
    /// The concrete topic the publisher used (not the subscriber's pattern).
    pub topic: String,
    /// Opaque payload; may be empty.
    pub content: Bytes,
    /// Scalar metadata headers; may be empty.
    pub headers: Headers,
}

impl Message {
    /// Creates a message with a fresh id and timestamp.
    pub fn new(topic: impl Into<String>, content: impl Into<Bytes>, headers: Headers) -> Self {
        let timestamp = now_micros();
        Self {
            id: next_id(timestamp),
            timestamp,
            topic: topic.into(),
            content: content.into(),
            headers,
        }
    }

    /// Serializes the message into one self-describing payload blob.
    pub fn encode(&self) -> Result<Bytes> {
        let topic_len = checked_len(self.topic.len(), "topic")?;
        let content_len = checked_len(self.content.len(), "content")?;
        let header_count = checked_len(self.headers.len(), "header count")?;

        let mut buf = BytesMut::with_capacity(64 + self.topic.len() + self.content.len());
        buf.put_u32(MAGIC);
        buf.put_u8(FORMAT_VERSION);

        let body_start = buf.len();
        buf.put_u64(self.id);
        buf.put_u64(self.timestamp);
        buf.put_u32(topic_len);
        buf.put_slice(self.topic.as_bytes());
        buf.put_u32(header_count);
        for (key, value) in &self.headers {
            buf.put_u32(checked_len(key.len(), "header key")?);
            buf.put_slice(key.as_bytes());
            match value {
                HeaderValue::Null => buf.put_u8(TAG_NULL),
                HeaderValue::Bool(b) => {
                    buf.put_u8(TAG_BOOL);
                    buf.put_u8(u8::from(*b));
                }
                HeaderValue::Int(i) => {
                    buf.put_u8(TAG_INT);
                    buf.put_i64(*i);
                }
                HeaderValue::Float(f) => {
                    buf.put_u8(TAG_FLOAT);
                    buf.put_u64(f.to_bits());
                }
                HeaderValue::Str(s) => {
                    buf.put_u8(TAG_STRING);
                    buf.put_u32(checked_len(s.len(), "header value")?);
                    buf.put_slice(s.as_bytes());
                }
            }
        }
        buf.put_u32(content_len);
        buf.put_slice(&self.content);

        let crc = crc32fast::hash(&buf[body_start..]);
        buf.put_u32(crc);
        Ok(buf.freeze())
    }

    /// Deserializes a payload blob produced by [`Message::encode`].
    pub fn decode(data: &[u8]) -> Result<Self> {
        // magic + version + trailing crc
        if data.len() < 9 {
            return Err(FifomqError::Codec(
                "insufficient data for payload header".into(),
            ));
        }
        let magic = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
        if magic != MAGIC {
            return Err(FifomqError::Codec(format!(
                "bad magic 0x{magic:08X}, expected 0x{MAGIC:08X}"
            )));
        }
        let version = data[4];
        if version != FORMAT_VERSION {
            return Err(FifomqError::Codec(format!(
                "unsupported payload format version {version}"
            )));
        }

        let body = &data[5..data.len() - 4];
        let stored_crc = u32::from_be_bytes(
            data[data.len() - 4..]
                .try_into()
                .expect("four trailing bytes"),
        );
        let computed_crc = crc32fast::hash(body);
        if stored_crc != computed_crc {
            return Err(FifomqError::Codec(format!(
                "CRC mismatch: stored 0x{stored_crc:08X}, computed 0x{computed_crc:08X}"
            )));
        }

        let mut cursor = Cursor { data: body, pos: 0 };
        let id = cursor.read_u64()?;
        let timestamp = cursor.read_u64()?;
        let topic_len = cursor.read_u32()? as usize;
        let topic = std::str::from_utf8(cursor.take(topic_len)?)
            .map_err(|e| FifomqError::Codec(format!("topic is not UTF-8: {e}")))?
            .to_string();

        let header_count = cursor.read_u32()? as usize;
        let mut headers = Headers::with_capacity(header_count.min(64));
        for _ in 0..header_count {
            let key_len = cursor.read_u32()? as usize;
            let key = std::str::from_utf8(cursor.take(key_len)?)
                .map_err(|e| FifomqError::Codec(format!("header key is not UTF-8: {e}")))?
                .to_string();
            let value = match cursor.read_u8()? {
                TAG_NULL => HeaderValue::Null,
                TAG_BOOL => HeaderValue::Bool(cursor.read_u8()? != 0),
                TAG_INT => HeaderValue::Int(cursor.read_u64()? as i64),
                TAG_FLOAT => HeaderValue::Float(f64::from_bits(cursor.read_u64()?)),
                TAG_STRING => {
                    let len = cursor.read_u32()? as usize;
                    HeaderValue::Str(
                        std::str::from_utf8(cursor.take(len)?)
                            .map_err(|e| {
                                FifomqError::Codec(format!("header value is not UTF-8: {e}"))
                            })?
                            .to_string(),
                    )
                }
                tag => {
                    return Err(FifomqError::Codec(format!("unknown header tag {tag}")));
                }
            };
            headers.insert(key, value);
        }

        let content_len = cursor.read_u32()? as usize;
        let content = Bytes::copy_from_slice(cursor.take(content_len)?);
        if cursor.pos != body.len() {
            return Err(FifomqError::Codec(format!(
                "{} trailing bytes after content",
                body.len() - cursor.pos
            )));
        }

        Ok(Self {
            id,
            timestamp,
            topic,
            content,
            headers,
        })
    }
}

/// Validates headers at publish time.
pub(crate) fn validate_headers(headers: &Headers) -> Result<()> {
    for key in headers.keys() {
        if key.is_empty() {
            return Err(FifomqError::InvalidHeader("empty header key".into()));
        }
    }
    Ok(())
}

/// The on-disk file name and FIFO token text for a message id.
pub(crate) fn id_file_name(id: u64) -> String {
    format!("{id:016x}")
}

pub(crate) fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}

fn next_id(timestamp_micros: u64) -> u64 {
    let random = u64::from(rand::random::<u32>()) & ((1u64 << ID_RANDOM_BITS) - 1);
    (timestamp_micros << ID_RANDOM_BITS) | random
}

fn checked_len(len: usize, what: &str) -> Result<u32> {
    u32::try_from(len).map_err(|_| FifomqError::Codec(format!("{what} exceeds u32::MAX bytes")))
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| FifomqError::Codec("payload truncated".into()))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(
            self.take(4)?.try_into().expect("four bytes"),
        ))
    }

    fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_be_bytes(
            self.take(8)?.try_into().expect("eight bytes"),
        ))
    }
}
