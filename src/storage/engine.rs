//! Thread-Safe Storage Engine with Expiry Support
//!
//! This module implements the core storage engine for EmberKV: a thread-safe,
//! concurrent map from binary keys to typed entries with per-key expiry.
//!
//! ## Design Decisions
//!
//! 1. **Sharded Locks**: Instead of one big lock, we use multiple shards to reduce contention.
//! 2. **Lazy Expiry**: Keys are checked for expiry on access (lazy) plus background cleanup.
//! 3. **Wall-Clock Expiry**: Expiry is an absolute `SystemTime`, because the snapshot
//!    format stores absolute Unix-millisecond deadlines and the two must agree.
//! 4. **Tagged Values**: Strings and streams share the key space; an enum tag keeps the
//!    `TYPE` command honest.
//!
//! ## Concurrency Model
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     StorageEngine                           │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐           │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │ Shard N │           │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ RwLock  │           │
//! │  │ HashMap │ │ HashMap │ │ HashMap │ │ HashMap │           │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Keys are distributed across shards using a hash function, so different
//! connections can read and write disjoint keys without blocking each other.

use crate::storage::stream::Stream;
use bytes::Bytes;
use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::SystemTime;
use thiserror::Error;

/// Number of shards for the storage engine.
/// More shards = less lock contention, but more memory overhead.
/// 64 is a good balance for most workloads.
const NUM_SHARDS: usize = 64;

/// A stored value. Strings and streams live in the same key space.
#[derive(Debug, Clone)]
pub enum Value {
    /// A plain binary-safe string
    String(Bytes),
    /// An append-only stream of ID-tagged field lists
    Stream(Arc<Stream>),
}

impl Value {
    /// Returns the type name reported by the `TYPE` command.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::Stream(_) => "stream",
        }
    }
}

/// The error returned when an operation expects one value type and the key
/// holds another.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
pub struct TypeMismatch;

/// Represents a stored value with optional expiry time.
#[derive(Debug, Clone)]
pub struct Entry {
    /// The actual value stored
    pub value: Value,
    /// Absolute wall-clock instant this entry expires (None = never expires)
    pub expires_at: Option<SystemTime>,
}

impl Entry {
    /// Creates a new entry without expiry.
    pub fn new(value: Value) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    /// Creates a new entry with an absolute expiry instant.
    pub fn with_expiry(value: Value, expires_at: Option<SystemTime>) -> Self {
        Self { value, expires_at }
    }

    /// Checks if this entry has expired.
    #[inline]
    pub fn is_expired(&self) -> bool {
        self.expires_at
            .map(|exp| SystemTime::now() >= exp)
            .unwrap_or(false)
    }
}

/// A single shard containing a portion of the key space.
#[derive(Debug, Default)]
struct Shard {
    data: RwLock<HashMap<Bytes, Entry>>,
}

/// The main storage engine for EmberKV.
///
/// # Thread Safety
///
/// This struct is designed to be wrapped in an `Arc` and shared across
/// all client handler tasks. All operations are thread-safe.
///
/// # Example
///
/// ```
/// use emberkv::storage::StorageEngine;
/// use bytes::Bytes;
///
/// let engine = StorageEngine::new();
///
/// engine.set(Bytes::from("name"), Bytes::from("ember"), None);
/// let value = engine.get_string(&Bytes::from("name"));
/// assert_eq!(value, Ok(Some(Bytes::from("ember"))));
/// ```
pub struct StorageEngine {
    /// Sharded storage for reduced lock contention
    shards: Vec<Shard>,

    /// Approximate number of live keys
    key_count: AtomicU64,

    /// Number of expired keys removed so far (lazy + background)
    expired_count: AtomicU64,
}

impl std::fmt::Debug for StorageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageEngine")
            .field("shards", &self.shards.len())
            .field("key_count", &self.key_count.load(Ordering::Relaxed))
            .field("expired_count", &self.expired_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for StorageEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageEngine {
    /// Creates a new storage engine with default settings.
    pub fn new() -> Self {
        let shards = (0..NUM_SHARDS).map(|_| Shard::default()).collect();

        Self {
            shards,
            key_count: AtomicU64::new(0),
            expired_count: AtomicU64::new(0),
        }
    }

    /// Determines which shard a key belongs to.
    #[inline]
    fn shard_index(&self, key: &[u8]) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % NUM_SHARDS
    }

    /// Gets the shard for a given key.
    #[inline]
    fn get_shard(&self, key: &[u8]) -> &Shard {
        &self.shards[self.shard_index(key)]
    }

    /// Stores a string under `key`, overwriting any previous value of any
    /// type. `expires_at` is an absolute wall-clock deadline.
    pub fn set(&self, key: Bytes, value: Bytes, expires_at: Option<SystemTime>) {
        let shard = self.get_shard(&key);
        let mut data = shard.data.write().unwrap();

        let is_new = !data.contains_key(&key);
        data.insert(key, Entry::with_expiry(Value::String(value), expires_at));

        if is_new {
            self.key_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Gets the value for a key.
    ///
    /// Returns `None` if the key doesn't exist or has expired.
    /// This implements "lazy expiry": expired keys are detected and removed
    /// on access, upgrading from the read lock to the write lock only when a
    /// removal is actually due.
    pub fn get(&self, key: &Bytes) -> Option<Value> {
        let shard = self.get_shard(key);

        // Fast path: read lock for existing, non-expired keys
        {
            let data = shard.data.read().unwrap();
            match data.get(key) {
                Some(entry) if !entry.is_expired() => return Some(entry.value.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        // Key exists but is expired: take the write lock to remove it
        let mut data = shard.data.write().unwrap();
        if let Some(entry) = data.get(key) {
            if entry.is_expired() {
                data.remove(key);
                self.key_count.fetch_sub(1, Ordering::Relaxed);
                self.expired_count.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            // Race: another task replaced the key between the two locks
            return Some(entry.value.clone());
        }

        None
    }

    /// Gets a key's value as a string.
    ///
    /// Returns `Err(TypeMismatch)` if the key holds a stream.
    pub fn get_string(&self, key: &Bytes) -> Result<Option<Bytes>, TypeMismatch> {
        match self.get(key) {
            Some(Value::String(data)) => Ok(Some(data)),
            Some(Value::Stream(_)) => Err(TypeMismatch),
            None => Ok(None),
        }
    }

    /// Returns the stream stored under `key`, creating an empty one if the
    /// key is absent (or held an expired entry).
    ///
    /// Returns `Err(TypeMismatch)` if the key holds a string.
    pub fn get_or_create_stream(&self, key: Bytes) -> Result<Arc<Stream>, TypeMismatch> {
        let shard = self.get_shard(&key);
        let mut data = shard.data.write().unwrap();

        if let Some(entry) = data.get(&key) {
            if !entry.is_expired() {
                return match &entry.value {
                    Value::Stream(stream) => Ok(Arc::clone(stream)),
                    Value::String(_) => Err(TypeMismatch),
                };
            }
            data.remove(&key);
            self.key_count.fetch_sub(1, Ordering::Relaxed);
            self.expired_count.fetch_add(1, Ordering::Relaxed);
        }

        let stream = Arc::new(Stream::new());
        data.insert(key, Entry::new(Value::Stream(Arc::clone(&stream))));
        self.key_count.fetch_add(1, Ordering::Relaxed);
        Ok(stream)
    }

    /// Deletes a key from the database.
    ///
    /// # Returns
    ///
    /// Returns `true` if the key was deleted, `false` if it didn't exist.
    pub fn delete(&self, key: &Bytes) -> bool {
        let shard = self.get_shard(key);
        let mut data = shard.data.write().unwrap();

        if data.remove(key).is_some() {
            self.key_count.fetch_sub(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Checks if a key exists (and is not expired).
    ///
    /// Shares the lazy-expiry behavior of [`get`](Self::get).
    pub fn exists(&self, key: &Bytes) -> bool {
        self.get(key).is_some()
    }

    /// Returns the type of a key ("string", "stream", or "none").
    pub fn key_type(&self, key: &Bytes) -> &'static str {
        match self.get(key) {
            Some(value) => value.type_name(),
            None => "none",
        }
    }

    /// Returns all live keys matching a glob pattern.
    ///
    /// Supported patterns:
    /// - `*` matches everything
    /// - `h*llo` matches hello, hallo, hxllo
    /// - `h?llo` matches hello, hallo, but not hllo
    /// - `h[ae]llo` matches hello and hallo, but not hillo
    ///
    /// A pattern without metacharacters matches exactly one key.
    ///
    /// **Warning**: This operation scans all keys and can be slow on large databases.
    pub fn keys(&self, pattern: &str) -> Vec<Bytes> {
        let mut result = Vec::new();
        let pattern = GlobPattern::new(pattern);

        for shard in &self.shards {
            let data = shard.data.read().unwrap();
            for (key, entry) in data.iter() {
                if !entry.is_expired() {
                    if let Ok(key_str) = std::str::from_utf8(key) {
                        if pattern.matches(key_str) {
                            result.push(key.clone());
                        }
                    }
                }
            }
        }

        result
    }

    /// Returns the approximate number of keys in the database.
    ///
    /// Entries that expired but have not been purged yet may still be
    /// counted; callers must not rely on precision.
    pub fn len(&self) -> u64 {
        self.key_count.load(Ordering::Relaxed)
    }

    /// Returns true if the database is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes expired keys from all shards.
    ///
    /// This is called by the background expiry purger. Correctness never
    /// depends on it running: reads purge lazily too.
    ///
    /// # Returns
    ///
    /// Returns the number of keys that were removed.
    pub fn cleanup_expired(&self) -> u64 {
        let mut cleaned = 0u64;

        for shard in &self.shards {
            let mut data = shard.data.write().unwrap();
            let before = data.len();

            data.retain(|_, entry| !entry.is_expired());

            cleaned += (before - data.len()) as u64;
        }

        if cleaned > 0 {
            self.key_count.fetch_sub(cleaned, Ordering::Relaxed);
            self.expired_count.fetch_add(cleaned, Ordering::Relaxed);
        }

        cleaned
    }
}

/// Simple glob pattern matcher for the KEYS command.
struct GlobPattern {
    pattern: String,
}

impl GlobPattern {
    fn new(pattern: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
        }
    }

    fn matches(&self, text: &str) -> bool {
        self.matches_recursive(self.pattern.as_bytes(), text.as_bytes())
    }

    fn matches_recursive(&self, pattern: &[u8], text: &[u8]) -> bool {
        if pattern.is_empty() {
            return text.is_empty();
        }

        match pattern[0] {
            b'*' => {
                // Try matching zero or more characters
                for i in 0..=text.len() {
                    if self.matches_recursive(&pattern[1..], &text[i..]) {
                        return true;
                    }
                }
                false
            }
            b'?' => {
                // Match exactly one character
                !text.is_empty() && self.matches_recursive(&pattern[1..], &text[1..])
            }
            b'[' => {
                // Character class
                if text.is_empty() {
                    return false;
                }

                let mut i = 1;
                let mut matched = false;
                let negate = pattern.get(1) == Some(&b'^');
                if negate {
                    i += 1;
                }

                while i < pattern.len() && pattern[i] != b']' {
                    if pattern[i] == text[0] {
                        matched = true;
                    }
                    // Handle ranges like [a-z]
                    if i + 2 < pattern.len() && pattern[i + 1] == b'-' && pattern[i + 2] != b']' {
                        if text[0] >= pattern[i] && text[0] <= pattern[i + 2] {
                            matched = true;
                        }
                        i += 2;
                    }
                    i += 1;
                }

                if negate {
                    matched = !matched;
                }

                if i < pattern.len() {
                    matched && self.matches_recursive(&pattern[i + 1..], &text[1..])
                } else {
                    false
                }
            }
            b'\\' => {
                // Escape character
                if pattern.len() > 1 && !text.is_empty() && pattern[1] == text[0] {
                    self.matches_recursive(&pattern[2..], &text[1..])
                } else {
                    false
                }
            }
            c => {
                // Literal character
                !text.is_empty()
                    && c == text[0]
                    && self.matches_recursive(&pattern[1..], &text[1..])
            }
        }
    }
}
