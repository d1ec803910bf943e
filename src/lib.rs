//! # EmberKV - A Replicating In-Memory Key-Value Store
//!
//! EmberKV is a Redis-compatible, in-memory key-value server written in Rust.
//! It speaks the RESP wire protocol over TCP and supports asynchronous
//! master→replica command propagation, including the PSYNC handshake, the
//! snapshot transfer, and the `WAIT` acknowledgement barrier.
//!
//! ## Features
//!
//! - **RESP Protocol**: incremental parser and encoder for the five frame types
//! - **Typed Storage**: strings and append-only streams in one sharded key space
//! - **TTL Support**: per-key wall-clock expiry, lazy plus background cleanup
//! - **Snapshot Loading**: decodes the binary dump format at startup
//! - **Replication**: full-resync handshake, ordered propagation, offset
//!   tracking on both sides, GETACK-based `WAIT`
//! - **Async I/O**: built on Tokio, one task per connection
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                               EmberKV                                │
//! │                                                                      │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐               │
//! │  │ TCP Server  │───>│ Connection  │───>│  Registry   │               │
//! │  │ (Listener)  │    │  Handler    │    │  Dispatch   │               │
//! │  └─────────────┘    └──────┬──────┘    └──────┬──────┘               │
//! │                            │                  │                      │
//! │                     PSYNC promotion           ▼                      │
//! │                            │           ┌─────────────┐               │
//! │                            ▼           │  Storage    │               │
//! │  ┌─────────────┐    ┌─────────────┐    │  Engine     │               │
//! │  │   RESP      │    │ ReplicaSet  │    │ (64 shards) │               │
//! │  │   Codec     │    │ propagation │    └──────▲──────┘               │
//! │  └─────────────┘    │ WAIT barrier│           │                      │
//! │                     └─────────────┘    ┌──────┴──────┐               │
//! │                                        │ExpiryPurger │               │
//! │  ┌──────────────────────────────┐      │ (background)│               │
//! │  │ ReplicaClient (when started  │      └─────────────┘               │
//! │  │ with --replicaof): handshake │                                    │
//! │  │ + command stream from master │                                    │
//! │  └──────────────────────────────┘                                    │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use emberkv::commands::{Context, Registry};
//! use emberkv::config::ServerConfig;
//! use emberkv::connection::handle_client;
//! use emberkv::replication::ServerHandle;
//! use emberkv::storage::{start_expiry_purger, StorageEngine};
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//! use tokio::sync::watch;
//!
//! #[tokio::main]
//! async fn main() {
//!     let storage = Arc::new(StorageEngine::new());
//!     let _purger = start_expiry_purger(Arc::clone(&storage));
//!
//!     let registry = Arc::new(Registry::new(Context {
//!         storage,
//!         config: Arc::new(ServerConfig::default()),
//!         server: ServerHandle::new_master(),
//!     }));
//!
//!     let (_shutdown_tx, shutdown_rx) = watch::channel(false);
//!     let listener = TcpListener::bind("0.0.0.0:6379").await.unwrap();
//!
//!     loop {
//!         let (stream, addr) = listener.accept().await.unwrap();
//!         tokio::spawn(handle_client(
//!             stream,
//!             addr,
//!             Arc::clone(&registry),
//!             shutdown_rx.clone(),
//!         ));
//!     }
//! }
//! ```

pub mod commands;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod replication;
pub mod snapshot;
pub mod storage;

// Re-export commonly used types for convenience
pub use commands::{Context, Registry};
pub use config::ServerConfig;
pub use connection::{handle_client, Connection, ConnectionError};
pub use protocol::{ParseError, RespParser, RespValue};
pub use replication::{ReplicaClient, Role, ServerHandle};
pub use storage::{start_expiry_purger, ExpiryPurger, StorageEngine};

/// Version of EmberKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
