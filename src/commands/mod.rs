//! Command Processing Module
//!
//! This module implements the command layer for EmberKV. Parsed RESP frames
//! come in, get matched against the registry (name lookup plus arity
//! validation), and the per-command handlers execute against the shared
//! context.
//!
//! ## Architecture
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌─────────────────┐
//! │  RESP Parser    │  (protocol module)
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │    Registry     │  (this module)
//! │                 │
//! │  - Lookup       │
//! │  - Validate     │
//! │  - Execute      │
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐         ┌─────────────────┐
//! │ StorageEngine   │         │  ServerHandle   │
//! └─────────────────┘         │  (replication)  │
//!                             └─────────────────┘
//! ```
//!
//! ## Supported Commands
//!
//! - Strings: `SET`, `GET`
//! - Streams: `XADD`
//! - Keys: `KEYS`, `TYPE`
//! - Server: `PING`, `ECHO`, `CONFIG`, `INFO`
//! - Replication: `REPLCONF`, `PSYNC`, `WAIT`

pub mod registry;
mod replication;
mod server;
mod stream;
mod string;

pub use registry::{Context, Registry};

use crate::protocol::RespValue;
use bytes::Bytes;

/// Extracts the command name from a request frame, uppercased.
///
/// Requests are arrays whose first element names the command.
pub fn command_name(frame: &RespValue) -> Option<String> {
    let items = frame.as_array()?;
    let name = items.first()?.as_str()?;
    Some(name.to_uppercase())
}

/// Extracts a binary argument from a frame element.
pub(crate) fn arg_bytes(value: &RespValue) -> Option<Bytes> {
    match value {
        RespValue::BulkString(b) => Some(b.clone()),
        RespValue::SimpleString(s) => Some(Bytes::from(s.clone())),
        _ => None,
    }
}

/// Extracts an integer argument from a frame element.
///
/// Clients send integers as bulk strings, so numeric text is accepted too.
pub(crate) fn arg_int(value: &RespValue) -> Option<i64> {
    match value {
        RespValue::Integer(n) => Some(*n),
        RespValue::BulkString(b) => std::str::from_utf8(b).ok().and_then(|s| s.parse().ok()),
        RespValue::SimpleString(s) => s.parse().ok(),
        _ => None,
    }
}
