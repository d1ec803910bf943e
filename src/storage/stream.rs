//! Append-Only Stream Container
//!
//! Streams are ordered logs of entries, each tagged with a [`StreamId`] of
//! the form `<milliseconds>-<sequence>`. IDs must be strictly increasing
//! within a stream; `0-0` is the reserved floor and never appears in one.
//!
//! The container itself is deliberately dumb: it appends, reports the last
//! ID, and hands out defensive copies. ID validation and auto-generation
//! belong to the XADD command, which owns the rules about `*` and `<ms>-*`.

use bytes::Bytes;
use std::fmt;
use std::str::FromStr;
use std::sync::RwLock;
use thiserror::Error;

/// A stream entry identifier: a millisecond timestamp plus a sequence number
/// that disambiguates entries created in the same millisecond.
///
/// Ordering is lexicographic on `(ms, seq)`, which the derived `Ord` provides
/// given the field order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamId {
    /// Millisecond component
    pub ms: u64,
    /// Sequence component
    pub seq: u64,
}

impl StreamId {
    /// The reserved floor ID `0-0`. Every real entry ID is greater than this.
    pub const FLOOR: StreamId = StreamId { ms: 0, seq: 0 };

    /// Creates a stream ID from its components.
    pub fn new(ms: u64, seq: u64) -> Self {
        Self { ms, seq }
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

/// Error returned when a string is not a valid `<ms>-<seq>` stream ID.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid stream ID")]
pub struct ParseStreamIdError;

impl FromStr for StreamId {
    type Err = ParseStreamIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ms, seq) = s.split_once('-').ok_or(ParseStreamIdError)?;
        let ms = ms.parse().map_err(|_| ParseStreamIdError)?;
        let seq = seq.parse().map_err(|_| ParseStreamIdError)?;
        Ok(StreamId { ms, seq })
    }
}

/// A single entry in a stream: an ID plus ordered field/value pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: StreamId,
    pub fields: Vec<(Bytes, Bytes)>,
}

/// An append-only stream of entries.
///
/// Wrapped in an `Arc` inside the storage engine so that appends made
/// through one handle are visible through every other.
#[derive(Debug, Default)]
pub struct Stream {
    entries: RwLock<Vec<StreamEntry>>,
}

impl Stream {
    /// Creates a new, empty stream.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry to the stream.
    ///
    /// The caller is responsible for having validated `id` against
    /// [`last_id`](Self::last_id) first.
    pub fn append(&self, id: StreamId, fields: Vec<(Bytes, Bytes)>) {
        let mut entries = self.entries.write().unwrap();
        entries.push(StreamEntry { id, fields });
    }

    /// Returns the ID of the most recently appended entry.
    pub fn last_id(&self) -> Option<StreamId> {
        let entries = self.entries.read().unwrap();
        entries.last().map(|e| e.id)
    }

    /// Returns a defensive copy of every entry, in append order.
    pub fn entries(&self) -> Vec<StreamEntry> {
        self.entries.read().unwrap().clone()
    }

    /// Returns the number of entries in the stream.
    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    /// Returns true if the stream has no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
