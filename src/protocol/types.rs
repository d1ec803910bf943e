//! RESP (Redis Serialization Protocol) Frames
//!
//! One frame is one value on the wire. Every frame opens with a one-byte
//! type prefix and every header or line closes with CRLF:
//!
//! - `+` Simple String: `+<text>\r\n`
//! - `-` Error: `-<message>\r\n`
//! - `:` Integer: `:<decimal>\r\n`
//! - `$` Bulk String: `$<len>\r\n<len bytes>\r\n`, null as `$-1\r\n`
//! - `*` Array: `*<count>\r\n<count frames>`, null as `*-1\r\n`
//!
//! Structurally every frame is a prefixed CRLF line, optionally followed by
//! a payload (bulk strings) or nested frames (arrays). The encoder and
//! [`RespValue::wire_len`] are built on that observation: both walk the same
//! line/payload decomposition, so the byte count can never drift from the
//! bytes actually written. That matters here more than in an ordinary
//! client/server: replication progress is measured in encoded bytes, and a
//! one-byte disagreement between master and replica breaks the `WAIT`
//! barrier.

use bytes::Bytes;
use std::fmt;

/// The CRLF terminator used in RESP protocol
pub const CRLF: &[u8] = b"\r\n";

/// RESP protocol type prefixes
pub mod prefix {
    pub const SIMPLE_STRING: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK_STRING: u8 = b'$';
    pub const ARRAY: u8 = b'*';
}

/// Marker used by the null bulk string and the null array in place of a
/// length: `$-1\r\n` and `*-1\r\n`.
const NULL_MARKER: &[u8] = b"-1";

/// One RESP frame.
///
/// Requests, replies, and the replication stream are all sequences of these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// Non-binary-safe text line; must not contain CRLF.
    SimpleString(String),

    /// An error report; rendered to clients with the `-` prefix.
    Error(String),

    /// 64-bit signed integer.
    Integer(i64),

    /// Length-prefixed, binary-safe byte sequence.
    BulkString(Bytes),

    /// The null bulk string `$-1\r\n`.
    Null,

    /// The null array `*-1\r\n`.
    NullArray,

    /// A sequence of nested frames. Every request is an array of bulk
    /// strings whose first element names the command.
    Array(Vec<RespValue>),
}

impl RespValue {
    /// Creates a new simple string frame.
    pub fn simple_string(text: impl Into<String>) -> Self {
        RespValue::SimpleString(text.into())
    }

    /// Creates a new error frame.
    pub fn error(message: impl Into<String>) -> Self {
        RespValue::Error(message.into())
    }

    /// Creates a new integer frame.
    pub fn integer(value: i64) -> Self {
        RespValue::Integer(value)
    }

    /// Creates a new bulk string frame.
    pub fn bulk_string(payload: impl Into<Bytes>) -> Self {
        RespValue::BulkString(payload.into())
    }

    /// Creates a null bulk string frame.
    pub fn null() -> Self {
        RespValue::Null
    }

    /// Creates an array frame.
    pub fn array(items: Vec<RespValue>) -> Self {
        RespValue::Array(items)
    }

    /// Builds a command frame: an array of bulk strings.
    ///
    /// This is the shape every request takes, and the shape the master
    /// fans out to replicas.
    pub fn command(parts: &[&str]) -> Self {
        RespValue::Array(
            parts
                .iter()
                .map(|part| RespValue::BulkString(Bytes::copy_from_slice(part.as_bytes())))
                .collect(),
        )
    }

    /// Common response for successful operations
    pub fn ok() -> Self {
        RespValue::simple_string("OK")
    }

    /// Common response for PING
    pub fn pong() -> Self {
        RespValue::simple_string("PONG")
    }

    /// Serializes the frame to bytes for sending over the wire.
    ///
    /// The buffer is sized from [`wire_len`](Self::wire_len) up front, so
    /// encoding never reallocates.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.wire_len());
        self.serialize_into(&mut buf);
        debug_assert_eq!(buf.len(), self.wire_len());
        buf
    }

    /// Serializes the frame into an existing buffer.
    ///
    /// Every variant is one prefixed CRLF line; bulk strings append their
    /// payload line and arrays recurse into their elements.
    pub fn serialize_into(&self, buf: &mut Vec<u8>) {
        match self {
            RespValue::SimpleString(text) => write_line(buf, prefix::SIMPLE_STRING, text.as_bytes()),
            RespValue::Error(message) => write_line(buf, prefix::ERROR, message.as_bytes()),
            RespValue::Integer(value) => {
                write_line(buf, prefix::INTEGER, value.to_string().as_bytes())
            }
            RespValue::BulkString(payload) => {
                write_line(buf, prefix::BULK_STRING, payload.len().to_string().as_bytes());
                buf.extend_from_slice(payload);
                buf.extend_from_slice(CRLF);
            }
            RespValue::Null => write_line(buf, prefix::BULK_STRING, NULL_MARKER),
            RespValue::NullArray => write_line(buf, prefix::ARRAY, NULL_MARKER),
            RespValue::Array(items) => {
                write_line(buf, prefix::ARRAY, items.len().to_string().as_bytes());
                for item in items {
                    item.serialize_into(buf);
                }
            }
        }
    }

    /// Returns the exact encoded length of this frame in bytes, without
    /// allocating.
    ///
    /// Mirrors [`serialize_into`](Self::serialize_into) arm for arm; the
    /// replication offsets on both sides of a PSYNC session are sums of
    /// these values.
    pub fn wire_len(&self) -> usize {
        match self {
            RespValue::SimpleString(text) | RespValue::Error(text) => line_len(text.len()),
            RespValue::Integer(value) => line_len(decimal_width(*value)),
            RespValue::BulkString(payload) => {
                line_len(decimal_width(payload.len() as i64)) + payload.len() + CRLF.len()
            }
            RespValue::Null | RespValue::NullArray => line_len(NULL_MARKER.len()),
            RespValue::Array(items) => {
                let header = line_len(decimal_width(items.len() as i64));
                items.iter().fold(header, |total, item| total + item.wire_len())
            }
        }
    }

    /// Returns true if this frame is an error.
    ///
    /// The propagation path checks this: commands that failed are neither
    /// counted nor forwarded to replicas.
    pub fn is_error(&self) -> bool {
        matches!(self, RespValue::Error(_))
    }

    /// The textual content of a frame, when it has one.
    ///
    /// Command names and arguments arrive as bulk strings while handshake
    /// replies are simple strings; both surface here, everything else is
    /// `None`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            RespValue::SimpleString(text) => Some(text),
            RespValue::BulkString(payload) => std::str::from_utf8(payload).ok(),
            _ => None,
        }
    }

    /// The elements of an array frame, or `None` for any other variant.
    pub fn as_array(&self) -> Option<&[RespValue]> {
        match self {
            RespValue::Array(items) => Some(items),
            _ => None,
        }
    }
}

/// Appends one prefixed, CRLF-terminated line.
///
/// Every frame header is one of these; simple strings, errors, integers,
/// and the two nulls are nothing but one.
fn write_line(buf: &mut Vec<u8>, prefix: u8, payload: &[u8]) {
    buf.push(prefix);
    buf.extend_from_slice(payload);
    buf.extend_from_slice(CRLF);
}

/// Encoded size of one line: prefix byte, payload, CRLF.
const fn line_len(payload: usize) -> usize {
    1 + payload + CRLF.len()
}

/// Printed width of a decimal i64, sign included.
fn decimal_width(value: i64) -> usize {
    let digits = match value.unsigned_abs() {
        0 => 1,
        n => (n.ilog10() + 1) as usize,
    };
    (value < 0) as usize + digits
}

impl fmt::Display for RespValue {
    /// Human-oriented rendering for logs and handshake diagnostics; arrays
    /// come out flat, binary payloads as a byte count.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RespValue::SimpleString(text) => write!(f, "+{}", text),
            RespValue::Error(message) => write!(f, "-{}", message),
            RespValue::Integer(value) => write!(f, ":{}", value),
            RespValue::BulkString(payload) => match std::str::from_utf8(payload) {
                Ok(text) => write!(f, "\"{}\"", text),
                Err(_) => write!(f, "<{} binary bytes>", payload.len()),
            },
            RespValue::Null => write!(f, "(nil)"),
            RespValue::NullArray => write!(f, "(nil array)"),
            RespValue::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}
