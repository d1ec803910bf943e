//! Replica-Side Replication Client
//!
//! When started with `--replicaof`, the server opens its own connection to
//! the master and walks through the handshake in strict order:
//!
//! 1. `PING` → expect `+PONG`
//! 2. `REPLCONF listening-port <port>` → expect `+OK`
//! 3. `REPLCONF capa psync2` → expect `+OK`
//! 4. `PSYNC ? -1` → expect `+FULLRESYNC <replid> <offset>`
//! 5. Snapshot transfer: `$<len>\r\n` plus `len` raw bytes, no trailing CRLF
//! 6. The command stream: frames executed locally, forever
//!
//! From the end of the snapshot onward the client counts every received
//! frame's wire bytes into `processed_offset`. `REPLCONF GETACK *` is the
//! one frame answered on this connection: the reply carries the offset as it
//! stood *before* that GETACK frame is counted.
//!
//! A replication failure is logged and ends replication; it never takes the
//! serving side of the process down with it.

use crate::commands::Registry;
use crate::connection::{Connection, ConnectionError};
use crate::protocol::RespValue;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// How long to wait for the TCP connection to the master.
const DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors that end replication.
#[derive(Debug, Error)]
pub enum ReplicationError {
    /// The master did not accept the connection within the dial timeout
    #[error("timed out connecting to master")]
    DialTimeout,

    /// I/O failure on the master connection
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Framing failure on the master connection
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// The master answered a handshake step with something unexpected
    #[error("handshake failed: {0}")]
    Handshake(String),
}

/// The outbound replication session of a replica.
pub struct ReplicaClient {
    master_host: String,
    master_port: u16,
    /// Our own serving port, reported via `REPLCONF listening-port`
    listening_port: u16,
    /// Wire bytes consumed from the master stream since the snapshot
    processed_offset: u64,
}

impl ReplicaClient {
    /// Creates a client for the given master address.
    pub fn new(master_host: impl Into<String>, master_port: u16, listening_port: u16) -> Self {
        Self {
            master_host: master_host.into(),
            master_port,
            listening_port,
            processed_offset: 0,
        }
    }

    /// Bytes of replication stream consumed so far.
    pub fn processed_offset(&self) -> u64 {
        self.processed_offset
    }

    /// Runs the whole replication session: connect, handshake, stream.
    ///
    /// Errors are logged, not returned; the serving side of this process
    /// keeps answering clients either way.
    pub async fn run(mut self, registry: Arc<Registry>, shutdown: watch::Receiver<bool>) {
        match self.replicate(registry, shutdown).await {
            Ok(()) => info!("Replication stream ended"),
            Err(e) => error!(error = %e, "Replication failed"),
        }
    }

    async fn replicate(
        &mut self,
        registry: Arc<Registry>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), ReplicationError> {
        let mut conn = self.connect().await?;
        self.handshake(&mut conn).await?;
        self.stream_loop(&mut conn, &registry, &mut shutdown).await
    }

    /// Dials the master with a bounded timeout.
    async fn connect(&self) -> Result<Connection, ReplicationError> {
        let addr = format!("{}:{}", self.master_host, self.master_port);
        info!(master = %addr, "Connecting to master");

        let stream = tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect(&addr))
            .await
            .map_err(|_| ReplicationError::DialTimeout)??;

        Ok(Connection::new(stream))
    }

    /// Walks the handshake steps in order, then consumes the snapshot.
    async fn handshake(&mut self, conn: &mut Connection) -> Result<(), ReplicationError> {
        self.exchange(conn, &["PING"], "PONG").await?;

        let port = self.listening_port.to_string();
        self.exchange(conn, &["REPLCONF", "listening-port", &port], "OK")
            .await?;
        self.exchange(conn, &["REPLCONF", "capa", "psync2"], "OK")
            .await?;

        conn.write_frame(&RespValue::command(&["PSYNC", "?", "-1"]))
            .await?;
        let reply = self.read_reply(conn).await?;
        let RespValue::SimpleString(line) = &reply else {
            return Err(ReplicationError::Handshake(format!(
                "expected FULLRESYNC, got {}",
                reply
            )));
        };

        let mut parts = line.split_whitespace();
        if parts.next() != Some("FULLRESYNC") {
            return Err(ReplicationError::Handshake(format!(
                "expected FULLRESYNC, got {}",
                line
            )));
        }
        let replid = parts.next().unwrap_or("?");
        let offset = parts.next().unwrap_or("0");
        info!(replid, offset, "Full resync granted");

        // The snapshot is discarded: it describes the master's key space at
        // sync start, and everything this replica serves flows from the
        // command stream that follows. A master may also skip it entirely.
        match conn.read_snapshot().await? {
            Some(snapshot) => debug!(bytes = snapshot.len(), "Snapshot received"),
            None => debug!("Master sent no snapshot"),
        }

        // Offset accounting starts at the end of the snapshot
        self.processed_offset = 0;
        Ok(())
    }

    /// Sends one command and insists on a specific simple-string reply.
    async fn exchange(
        &self,
        conn: &mut Connection,
        parts: &[&str],
        expect: &str,
    ) -> Result<(), ReplicationError> {
        conn.write_frame(&RespValue::command(parts)).await?;

        let reply = self.read_reply(conn).await?;
        match &reply {
            RespValue::SimpleString(s) if s == expect => Ok(()),
            other => Err(ReplicationError::Handshake(format!(
                "{} answered with {}, expected +{}",
                parts.join(" "),
                other,
                expect
            ))),
        }
    }

    async fn read_reply(&self, conn: &mut Connection) -> Result<RespValue, ReplicationError> {
        match conn.read_frame().await? {
            Some((frame, _)) => Ok(frame),
            None => Err(ReplicationError::Handshake(
                "master closed the connection".to_string(),
            )),
        }
    }

    /// Applies the replication stream until EOF or shutdown.
    async fn stream_loop(
        &mut self,
        conn: &mut Connection,
        registry: &Registry,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), ReplicationError> {
        info!("Replication stream started");

        loop {
            let (frame, wire_len) = tokio::select! {
                result = shutdown.changed() => {
                    if result.is_err() || *shutdown.borrow() {
                        return Ok(());
                    }
                    continue;
                }
                result = conn.read_frame() => match result? {
                    Some(read) => read,
                    None => {
                        warn!("Master closed the replication stream");
                        return Ok(());
                    }
                }
            };

            // GETACK is answered with the offset as it stood before this
            // frame, then the frame itself is counted
            if is_getack(&frame) {
                let ack = RespValue::command(&[
                    "REPLCONF",
                    "ACK",
                    &self.processed_offset.to_string(),
                ]);
                debug!(offset = self.processed_offset, "Answering GETACK");
                conn.write_frame(&ack).await?;
                self.processed_offset += wire_len as u64;
                continue;
            }

            // Replicated commands are executed locally; replies are
            // discarded, the master is not waiting for them
            let response = registry.execute(&frame).await;
            if response.is_error() {
                warn!(?frame, error = %response, "Replicated command failed");
            }
            self.processed_offset += wire_len as u64;
        }
    }
}

/// Matches `REPLCONF GETACK ...` in any case.
fn is_getack(frame: &RespValue) -> bool {
    let Some(items) = frame.as_array() else {
        return false;
    };
    if items.len() < 2 {
        return false;
    }
    let (Some(name), Some(sub)) = (items[0].as_str(), items[1].as_str()) else {
        return false;
    };
    name.eq_ignore_ascii_case("REPLCONF") && sub.eq_ignore_ascii_case("GETACK")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{Context, Registry};
    use crate::config::ServerConfig;
    use crate::replication::ServerHandle;
    use crate::snapshot::EMPTY_SNAPSHOT;
    use crate::storage::StorageEngine;
    use bytes::Bytes;
    use tokio::net::TcpListener;

    #[test]
    fn test_is_getack() {
        assert!(is_getack(&RespValue::command(&["REPLCONF", "GETACK", "*"])));
        assert!(is_getack(&RespValue::command(&["replconf", "getack", "*"])));
        assert!(!is_getack(&RespValue::command(&["REPLCONF", "ACK", "0"])));
        assert!(!is_getack(&RespValue::command(&["PING"])));
        assert!(!is_getack(&RespValue::simple_string("GETACK")));
    }

    /// Plays a scripted master: handshake, snapshot, one SET, one GETACK.
    /// The replica must apply the SET and answer the GETACK with the SET
    /// frame's wire length.
    #[tokio::test]
    async fn test_full_handshake_and_stream() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let master = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut conn = Connection::new(socket);

            // Handshake, in the order the replica must send it
            let (frame, _) = conn.read_frame().await.unwrap().unwrap();
            assert_eq!(frame, RespValue::command(&["PING"]));
            conn.write_frame(&RespValue::pong()).await.unwrap();

            let (frame, _) = conn.read_frame().await.unwrap().unwrap();
            assert_eq!(
                frame,
                RespValue::command(&["REPLCONF", "listening-port", "6380"])
            );
            conn.write_frame(&RespValue::ok()).await.unwrap();

            let (frame, _) = conn.read_frame().await.unwrap().unwrap();
            assert_eq!(frame, RespValue::command(&["REPLCONF", "capa", "psync2"]));
            conn.write_frame(&RespValue::ok()).await.unwrap();

            let (frame, _) = conn.read_frame().await.unwrap().unwrap();
            assert_eq!(frame, RespValue::command(&["PSYNC", "?", "-1"]));
            conn.write_frame(&RespValue::simple_string(
                "FULLRESYNC 8371b4fb1155b71f4a04d3e1bc3e18c4a990aeeb 0",
            ))
            .await
            .unwrap();
            conn.write_snapshot(EMPTY_SNAPSHOT).await.unwrap();

            // Stream: one write command, then a GETACK probe
            let set = RespValue::command(&["SET", "foo", "bar"]);
            let set_len = set.wire_len() as i64;
            conn.write_frame(&set).await.unwrap();
            conn.write_frame(&RespValue::command(&["REPLCONF", "GETACK", "*"]))
                .await
                .unwrap();

            let (ack, _) = conn.read_frame().await.unwrap().unwrap();
            assert_eq!(
                ack,
                RespValue::command(&["REPLCONF", "ACK", &set_len.to_string()])
            );
        });

        let storage = Arc::new(StorageEngine::new());
        let registry = Arc::new(Registry::new(Context {
            storage: Arc::clone(&storage),
            config: Arc::new(ServerConfig::default()),
            server: ServerHandle::new_replica(),
        }));

        let (_tx, rx) = watch::channel(false);
        let client = ReplicaClient::new("127.0.0.1", addr.port(), 6380);
        let replica = tokio::spawn(client.run(registry, rx));

        // The scripted master finishing means every assertion held
        master.await.unwrap();

        // The replicated SET must have been applied locally
        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
        loop {
            if storage.get_string(&Bytes::from("foo")) == Ok(Some(Bytes::from("bar"))) {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "SET never applied");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        drop(replica);
    }

    /// A master that sends no snapshot at all: the first post-FULLRESYNC
    /// byte belongs to the command stream.
    #[tokio::test]
    async fn test_stream_without_snapshot() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let master = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut conn = Connection::new(socket);

            conn.read_frame().await.unwrap().unwrap();
            conn.write_frame(&RespValue::pong()).await.unwrap();
            conn.read_frame().await.unwrap().unwrap();
            conn.write_frame(&RespValue::ok()).await.unwrap();
            conn.read_frame().await.unwrap().unwrap();
            conn.write_frame(&RespValue::ok()).await.unwrap();
            conn.read_frame().await.unwrap().unwrap();
            conn.write_frame(&RespValue::simple_string("FULLRESYNC abc 0"))
                .await
                .unwrap();

            // No snapshot; the SET goes straight onto the wire
            conn.write_frame(&RespValue::command(&["SET", "k", "v"]))
                .await
                .unwrap();
            conn.write_frame(&RespValue::command(&["REPLCONF", "GETACK", "*"]))
                .await
                .unwrap();

            let (ack, _) = conn.read_frame().await.unwrap().unwrap();
            let set_len = RespValue::command(&["SET", "k", "v"]).wire_len();
            assert_eq!(
                ack,
                RespValue::command(&["REPLCONF", "ACK", &set_len.to_string()])
            );
        });

        let storage = Arc::new(StorageEngine::new());
        let registry = Arc::new(Registry::new(Context {
            storage: Arc::clone(&storage),
            config: Arc::new(ServerConfig::default()),
            server: ServerHandle::new_replica(),
        }));

        let (_tx, rx) = watch::channel(false);
        let client = ReplicaClient::new("127.0.0.1", addr.port(), 6380);
        tokio::spawn(client.run(registry, rx));

        master.await.unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
        loop {
            if storage.get_string(&Bytes::from("k")) == Ok(Some(Bytes::from("v"))) {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "SET never applied");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_dial_failure_is_contained() {
        // Nothing listens here; run() must log and return, not panic
        let registry = Arc::new(Registry::new(Context {
            storage: Arc::new(StorageEngine::new()),
            config: Arc::new(ServerConfig::default()),
            server: ServerHandle::new_replica(),
        }));

        let (_tx, rx) = watch::channel(false);
        let client = ReplicaClient::new("127.0.0.1", 1, 6380);
        client.run(registry, rx).await;
    }
}
