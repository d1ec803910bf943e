//! Background Expiry Purger
//!
//! This module implements a background task that periodically scans the
//! database for expired keys and removes them. This is "active expiry", as
//! opposed to the "lazy expiry" that happens on access.
//!
//! ## Why Do We Need This?
//!
//! Lazy expiry (checking on access) is efficient but has a gap: a key that
//! expires and is never touched again would stay in memory forever. The
//! purger closes that gap. It is purely a latency-hiding optimisation;
//! nothing observable depends on when (or whether) a sweep runs, because
//! reads purge on their own.
//!
//! ## Design
//!
//! The purger runs as a Tokio task and:
//! 1. Sleeps for a configurable interval (default: 60 seconds)
//! 2. Wakes up and scans the database
//! 3. Removes any expired keys found

use crate::storage::StorageEngine;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

/// Default interval between purge sweeps.
pub const DEFAULT_PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// A handle to the running expiry purger.
///
/// When this handle is dropped, the purger task will be stopped.
#[derive(Debug)]
pub struct ExpiryPurger {
    /// Sender to signal shutdown
    shutdown_tx: watch::Sender<bool>,
}

impl ExpiryPurger {
    /// Starts the expiry purger as a background task.
    ///
    /// # Arguments
    ///
    /// * `engine` - The storage engine to sweep
    /// * `interval` - How long to sleep between sweeps
    ///
    /// # Returns
    ///
    /// Returns a handle that can be used to stop the purger.
    /// The purger will automatically stop when the handle is dropped.
    pub fn start(engine: Arc<StorageEngine>, interval: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(purge_loop(engine, interval, shutdown_rx));

        info!(interval_secs = interval.as_secs(), "Background expiry purger started");

        Self { shutdown_tx }
    }

    /// Stops the expiry purger.
    ///
    /// This is called automatically when the handle is dropped.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Drop for ExpiryPurger {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The main purge loop.
async fn purge_loop(
    engine: Arc<StorageEngine>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        // Wait for the interval or shutdown signal
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Expiry purger received shutdown signal");
                    return;
                }
                continue;
            }
        }

        let expired = engine.cleanup_expired();

        if expired > 0 {
            debug!(
                expired = expired,
                keys_remaining = engine.len(),
                "Expired keys cleaned up"
            );
        }
    }
}

/// Starts the expiry purger with the default interval.
///
/// This is a convenience function for simple use cases.
pub fn start_expiry_purger(engine: Arc<StorageEngine>) -> ExpiryPurger {
    ExpiryPurger::start(engine, DEFAULT_PURGE_INTERVAL)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::time::{Duration, SystemTime};

    #[tokio::test]
    async fn test_purger_cleans_expired_keys() {
        let engine = Arc::new(StorageEngine::new());

        // Add some keys with short TTL
        for i in 0..10 {
            engine.set(
                Bytes::from(format!("key{}", i)),
                Bytes::from("value"),
                Some(SystemTime::now() + Duration::from_millis(50)),
            );
        }

        // Add a persistent key
        engine.set(Bytes::from("persistent"), Bytes::from("value"), None);

        assert_eq!(engine.len(), 11);

        // Start purger with fast interval
        let _purger = ExpiryPurger::start(Arc::clone(&engine), Duration::from_millis(10));

        // Wait for keys to expire and be cleaned up
        tokio::time::sleep(Duration::from_millis(200)).await;

        // Only the persistent key should remain
        assert_eq!(engine.len(), 1);
        assert!(engine.exists(&Bytes::from("persistent")));
    }

    #[tokio::test]
    async fn test_purger_stops_on_drop() {
        let engine = Arc::new(StorageEngine::new());

        {
            let _purger = ExpiryPurger::start(Arc::clone(&engine), Duration::from_millis(10));
            tokio::time::sleep(Duration::from_millis(50)).await;
            // Purger is dropped here
        }

        // Add an already-expired key after the purger is stopped
        engine.set(
            Bytes::from("key"),
            Bytes::from("value"),
            Some(SystemTime::UNIX_EPOCH),
        );

        tokio::time::sleep(Duration::from_millis(100)).await;

        // The background sweep is gone, but lazy expiry still applies on read
        assert!(engine.get(&Bytes::from("key")).is_none());
    }
}
