//! Storage Engine Module
//!
//! This module provides the core storage functionality for EmberKV: a
//! thread-safe, sharded key-value store holding strings and append-only
//! streams, with per-key expiry and a background purger.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     StorageEngine                           │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐           │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │...64    │           │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ shards  │           │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘           │
//! └─────────────────────────────────────────────────────────────┘
//!                            ▲
//!                            │
//!              ┌─────────────┴─────────────┐
//!              │      ExpiryPurger         │
//!              │  (Background Tokio Task)  │
//!              └───────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Sharded Storage**: 64 independent shards reduce lock contention
//! - **Typed Values**: strings and streams share one key space via a tagged enum
//! - **Wall-Clock Expiry**: absolute deadlines, so snapshot-loaded expiries line up
//! - **Lazy + Active Expiry**: expired keys are cleaned on access and by the purger

pub mod engine;
pub mod expiry;
pub mod stream;

// Re-export commonly used types
pub use engine::{Entry, StorageEngine, TypeMismatch, Value};
pub use expiry::{start_expiry_purger, ExpiryPurger, DEFAULT_PURGE_INTERVAL};
pub use stream::{ParseStreamIdError, Stream, StreamEntry, StreamId};
