//! Master-Side Replication State
//!
//! The master keeps a descriptor per attached replica and a running
//! propagation offset counting the wire bytes of every command fanned out
//! since startup. `WAIT` compares that offset against the acknowledgements
//! replicas report through `REPLCONF ACK`.
//!
//! ## Locking
//!
//! The replica list sits behind a `std::sync::RwLock`; propagation and WAIT
//! snapshot it under the read lock and release before touching any socket,
//! so a slow replica never stalls the set. Each descriptor's write half is
//! guarded by a `tokio::sync::Mutex`, serializing the propagation stream to
//! that replica. Offsets are plain atomics.

use crate::protocol::{RespParser, RespValue};
use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{watch, Mutex, Notify};
use tracing::{debug, info, warn};

/// The replication ID this master presents in FULLRESYNC and INFO.
pub const REPLICATION_ID: &str = "8371b4fb1155b71f4a04d3e1bc3e18c4a990aeeb";

/// Replication counters for one master instance.
///
/// `offset` is the cumulative encoded byte length of every frame propagated
/// to replicas since startup.
#[derive(Debug, Default)]
pub struct MasterState {
    offset: AtomicU64,
}

impl MasterState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current propagation offset in wire bytes.
    pub fn offset(&self) -> u64 {
        self.offset.load(Ordering::Acquire)
    }

    /// Bumps the propagation offset by one frame's encoded length.
    pub fn add_offset(&self, bytes: u64) {
        self.offset.fetch_add(bytes, Ordering::AcqRel);
    }
}

/// One attached replica, from PSYNC completion until disconnect.
#[derive(Debug)]
pub struct ReplicaHandle {
    addr: SocketAddr,
    /// Write half of the replica's connection; propagation and GETACK
    /// broadcasts go through here.
    writer: Mutex<OwnedWriteHalf>,
    /// Highest offset this replica has acknowledged.
    acked: AtomicU64,
}

impl ReplicaHandle {
    pub fn new(addr: SocketAddr, writer: OwnedWriteHalf) -> Self {
        Self {
            addr,
            writer: Mutex::new(writer),
            acked: AtomicU64::new(0),
        }
    }

    /// The replica's socket address, for logging and removal.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Highest offset this replica has acknowledged so far.
    pub fn acked(&self) -> u64 {
        self.acked.load(Ordering::Acquire)
    }

    /// Records an acknowledgement from this replica.
    ///
    /// Only ever called from the replica's own reader task; WAIT reads it.
    pub fn set_acked(&self, offset: u64) {
        self.acked.store(offset, Ordering::Release);
    }

    /// Writes raw bytes to the replica, flushing immediately.
    pub async fn write(&self, bytes: &[u8]) -> std::io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(bytes).await?;
        writer.flush().await
    }
}

/// The set of currently attached replicas.
///
/// A replica appears here only after its PSYNC completed and the snapshot
/// was flushed, and leaves on the first I/O failure.
#[derive(Debug, Default)]
pub struct ReplicaSet {
    replicas: RwLock<Vec<Arc<ReplicaHandle>>>,
    /// Woken whenever any replica reports a new acknowledgement.
    ack_notify: Notify,
}

impl ReplicaSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a freshly promoted replica.
    pub fn add(&self, replica: Arc<ReplicaHandle>) {
        let mut replicas = self.replicas.write().unwrap();
        replicas.push(replica);
        info!(count = replicas.len(), "Replica attached");
    }

    /// Removes a replica; a no-op if it is already gone.
    pub fn remove(&self, replica: &Arc<ReplicaHandle>) {
        let mut replicas = self.replicas.write().unwrap();
        let before = replicas.len();
        replicas.retain(|r| !Arc::ptr_eq(r, replica));
        if replicas.len() != before {
            info!(addr = %replica.addr(), count = replicas.len(), "Replica detached");
        }
    }

    /// Number of attached replicas.
    pub fn len(&self) -> usize {
        self.replicas.read().unwrap().len()
    }

    /// Returns true if no replicas are attached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies out the current replica list.
    ///
    /// Callers write to replicas only through a snapshot so the set lock is
    /// never held across socket I/O.
    pub fn snapshot(&self) -> Vec<Arc<ReplicaHandle>> {
        self.replicas.read().unwrap().clone()
    }

    /// Signals WAIT callers that an acknowledgement arrived.
    pub fn notify_ack(&self) {
        self.ack_notify.notify_waiters();
    }

    /// Resolves when the next acknowledgement is reported.
    pub async fn ack_changed(&self) {
        self.ack_notify.notified().await;
    }
}

/// Reads `REPLCONF ACK <offset>` frames from a promoted replica connection.
///
/// This is the tail of a connection task after PSYNC promotion: the replica
/// never sends anything else on this socket, and everything the master sends
/// goes through the [`ReplicaHandle`] write half. `leftover` carries any
/// bytes the framed reader had already buffered before the split; they must
/// be consumed here or ACKs sent immediately after the snapshot are lost.
pub async fn run_ack_sink(
    mut reader: OwnedReadHalf,
    leftover: BytesMut,
    replica: Arc<ReplicaHandle>,
    set: Arc<ReplicaSet>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut buffer = leftover;
    let mut parser = RespParser::new();

    'outer: loop {
        // Drain complete frames already in the buffer
        loop {
            match parser.parse(&buffer) {
                Ok(Some((frame, consumed))) => {
                    let _ = buffer.split_to(consumed);
                    if let Some(offset) = parse_ack(&frame) {
                        debug!(addr = %replica.addr(), offset, "Replica acknowledged");
                        replica.set_acked(offset);
                        set.notify_ack();
                    } else {
                        debug!(addr = %replica.addr(), ?frame, "Ignoring non-ACK frame from replica");
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(addr = %replica.addr(), error = %e, "Protocol error on replica connection");
                    break 'outer;
                }
            }
        }

        tokio::select! {
            result = shutdown.changed() => {
                if result.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            read = reader.read_buf(&mut buffer) => {
                match read {
                    Ok(0) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!(addr = %replica.addr(), error = %e, "Replica read failed");
                        break;
                    }
                }
            }
        }
    }

    set.remove(&replica);
}

/// Extracts the offset from a `REPLCONF ACK <n>` frame, if that is what
/// `frame` is.
fn parse_ack(frame: &RespValue) -> Option<u64> {
    let items = frame.as_array()?;
    if items.len() != 3 {
        return None;
    }
    if !items[0].as_str()?.eq_ignore_ascii_case("REPLCONF") {
        return None;
    }
    if !items[1].as_str()?.eq_ignore_ascii_case("ACK") {
        return None;
    }
    items[2].as_str()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ack() {
        let frame = RespValue::command(&["REPLCONF", "ACK", "172"]);
        assert_eq!(parse_ack(&frame), Some(172));

        let frame = RespValue::command(&["replconf", "ack", "0"]);
        assert_eq!(parse_ack(&frame), Some(0));

        assert_eq!(parse_ack(&RespValue::command(&["REPLCONF", "ACK"])), None);
        assert_eq!(parse_ack(&RespValue::command(&["PING"])), None);
        assert_eq!(parse_ack(&RespValue::command(&["REPLCONF", "ACK", "x"])), None);
        assert_eq!(parse_ack(&RespValue::simple_string("OK")), None);
    }

    #[test]
    fn test_master_state_offset() {
        let state = MasterState::new();
        assert_eq!(state.offset(), 0);

        state.add_offset(31);
        state.add_offset(11);
        assert_eq!(state.offset(), 42);
    }

    #[tokio::test]
    async fn test_replica_set_add_remove() {
        // Build a connected socket pair so the write half is real
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = tokio::net::TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        let peer = server.peer_addr().unwrap();
        let (_read, write) = server.into_split();
        drop(client);

        let set = ReplicaSet::new();
        let replica = Arc::new(ReplicaHandle::new(peer, write));

        assert!(set.is_empty());
        set.add(Arc::clone(&replica));
        assert_eq!(set.len(), 1);
        assert_eq!(set.snapshot().len(), 1);

        set.remove(&replica);
        assert!(set.is_empty());

        // Removing twice is harmless
        set.remove(&replica);
        assert!(set.is_empty());
    }
}
