//! Replication Subsystem
//!
//! EmberKV replicates asynchronously from one master to any number of
//! replicas. The master fans out write commands as they execute; replicas
//! apply them in order and report progress with `REPLCONF ACK`.
//!
//! ## Roles
//!
//! - **Master side** (`master`): the replica set, the propagation offset,
//!   the ACK sink for promoted connections, and the WAIT barrier.
//! - **Replica side** (`client`): the outbound handshake (PING, REPLCONF,
//!   PSYNC), the snapshot transfer, and the command stream loop.
//!
//! The [`ServerHandle`] defined here is the small capability surface command
//! handlers get through their context; it deliberately carries only the
//! replication state, never the whole server.

pub mod client;
pub mod master;

pub use client::{ReplicaClient, ReplicationError};
pub use master::{MasterState, ReplicaHandle, ReplicaSet, REPLICATION_ID};

use crate::protocol::RespValue;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Which side of replication this instance is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Master,
    Replica,
}

impl Role {
    /// The role name as reported by `INFO replication`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Master => "master",
            Role::Replica => "slave",
        }
    }
}

/// Write commands that are forwarded to replicas after a successful
/// execution on the master.
const PROPAGATED_COMMANDS: &[&str] = &[
    "SET", "DEL", "EXPIRE", "INCR", "DECR", "RPUSH", "LPUSH", "SADD", "SREM", "HSET", "HDEL",
];

/// Returns true if a command with this (uppercase) name is replicated.
pub fn is_propagated(name: &str) -> bool {
    PROPAGATED_COMMANDS.contains(&name)
}

/// The replication capabilities handed to command handlers and connection
/// tasks.
///
/// Cheap to clone; all state is behind `Arc`s.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    role: Role,
    master: Arc<MasterState>,
    replicas: Arc<ReplicaSet>,
}

impl ServerHandle {
    /// Creates the handle for a master instance.
    pub fn new_master() -> Self {
        Self {
            role: Role::Master,
            master: Arc::new(MasterState::new()),
            replicas: Arc::new(ReplicaSet::new()),
        }
    }

    /// Creates the handle for a replica instance.
    ///
    /// Replicas keep an empty replica set; chained replication is not
    /// supported, so nothing ever lands in it.
    pub fn new_replica() -> Self {
        Self {
            role: Role::Replica,
            master: Arc::new(MasterState::new()),
            replicas: Arc::new(ReplicaSet::new()),
        }
    }

    /// This instance's replication role.
    pub fn role(&self) -> Role {
        self.role
    }

    /// The 40-hex replication ID presented in FULLRESYNC and INFO.
    pub fn replication_id(&self) -> &'static str {
        REPLICATION_ID
    }

    /// Current propagation offset in wire bytes.
    pub fn master_offset(&self) -> u64 {
        self.master.offset()
    }

    /// Number of currently attached replicas.
    pub fn replica_count(&self) -> usize {
        self.replicas.len()
    }

    /// The replica set, for connection promotion and the ACK sink.
    pub fn replicas(&self) -> &Arc<ReplicaSet> {
        &self.replicas
    }

    /// Fans a command frame out to every attached replica.
    ///
    /// The propagation offset grows by the frame's encoded length whether or
    /// not any replica is attached; the offset counts what the master has
    /// propagated, and a replica attaching later starts from the snapshot
    /// anyway. Write failures drop the failing replica from the set.
    pub async fn propagate(&self, frame: &RespValue) {
        let bytes = frame.serialize();
        self.master.add_offset(bytes.len() as u64);

        let replicas = self.replicas.snapshot();
        for replica in replicas {
            if let Err(e) = replica.write(&bytes).await {
                warn!(addr = %replica.addr(), error = %e, "Propagation failed, dropping replica");
                self.replicas.remove(&replica);
            }
        }
    }

    /// The WAIT barrier.
    ///
    /// Counts replicas whose acknowledged offset has reached the propagation
    /// offset observed at call start. If nothing was ever propagated, every
    /// attached replica is trivially in sync. Otherwise replicas that are
    /// behind are prodded with `REPLCONF GETACK *` and the call waits for
    /// acknowledgements until `need` replicas caught up or the deadline
    /// passed, returning the count at return time.
    pub async fn wait_for_acks(&self, need: usize, timeout: Duration) -> usize {
        let target = self.master.offset();
        let replicas = self.replicas.snapshot();

        if target == 0 {
            return replicas.len();
        }

        let in_sync =
            |reps: &[Arc<ReplicaHandle>]| reps.iter().filter(|r| r.acked() >= target).count();

        let count = in_sync(&replicas);
        if count >= need {
            return count;
        }

        // GETACK is control traffic, not a propagated write; the offset
        // stays put.
        let getack = RespValue::command(&["REPLCONF", "GETACK", "*"]).serialize();
        for replica in &replicas {
            if let Err(e) = replica.write(&getack).await {
                warn!(addr = %replica.addr(), error = %e, "GETACK failed, dropping replica");
                self.replicas.remove(replica);
            }
        }

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let count = in_sync(&replicas);
            if count >= need {
                return count;
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return count;
            }

            // Wake on the next ACK, but re-check periodically so an ACK that
            // slips between the count and the wait cannot stall us.
            let nap = (deadline - now).min(Duration::from_millis(20));
            let _ = tokio::time::timeout(nap, self.replicas.ack_changed()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_names() {
        assert_eq!(Role::Master.as_str(), "master");
        assert_eq!(Role::Replica.as_str(), "slave");
    }

    #[test]
    fn test_propagation_set() {
        assert!(is_propagated("SET"));
        assert!(is_propagated("DEL"));
        assert!(is_propagated("HDEL"));
        assert!(!is_propagated("GET"));
        assert!(!is_propagated("PING"));
        assert!(!is_propagated("XADD"));
        assert!(!is_propagated("set")); // callers pass uppercase names
    }

    #[tokio::test]
    async fn test_propagate_bumps_offset_without_replicas() {
        let handle = ServerHandle::new_master();
        assert_eq!(handle.master_offset(), 0);

        let frame = RespValue::command(&["SET", "a", "1"]);
        let len = frame.wire_len() as u64;

        handle.propagate(&frame).await;
        assert_eq!(handle.master_offset(), len);

        handle.propagate(&frame).await;
        assert_eq!(handle.master_offset(), 2 * len);
    }

    #[tokio::test]
    async fn test_wait_with_zero_offset_counts_replicas() {
        let handle = ServerHandle::new_master();
        // No replicas, nothing propagated
        assert_eq!(handle.wait_for_acks(0, Duration::from_millis(10)).await, 0);
        assert_eq!(handle.wait_for_acks(5, Duration::from_millis(10)).await, 0);
    }

    #[tokio::test]
    async fn test_wait_times_out_when_behind() {
        let handle = ServerHandle::new_master();
        handle.propagate(&RespValue::command(&["SET", "a", "1"])).await;

        let start = tokio::time::Instant::now();
        let count = handle.wait_for_acks(1, Duration::from_millis(50)).await;
        assert_eq!(count, 0);
        assert!(start.elapsed() >= Duration::from_millis(50));
    }
}
