//! Per-Client Connection Handler
//!
//! Each accepted TCP connection runs one handler task in a loop:
//! parse frame, dispatch through the registry, write the reply. The loop
//! ends on client disconnect, protocol violation, or server shutdown.
//!
//! ## Connection Lifecycle
//!
//! ```text
//! 1. Client connects (TCP handshake)
//!        │
//!        ▼
//! 2. handle_client task spawned
//!        │
//!        ▼
//! 3. ┌──────────────────────────────┐
//!    │ read frame → execute → reply │◄─┐
//!    └──────────────┬───────────────┘  │
//!                   │                  │
//!         PSYNC?────┼──── no ──────────┘
//!                   │
//!                  yes
//!                   │
//!                   ▼
//! 4. FULLRESYNC + snapshot sent, connection joins the
//!    replica set, task becomes the ACK sink
//! ```
//!
//! ## Promotion
//!
//! A successful PSYNC flips the connection's purpose. The handler writes the
//! FULLRESYNC line and the snapshot (as an unterminated bulk), splits the
//! socket, parks the write half in a [`ReplicaHandle`] for the propagation
//! path, and keeps the read half to consume `REPLCONF ACK` frames. From then
//! on the master initiates all traffic on this connection.
//!
//! ## Propagation
//!
//! After a write command from an ordinary client returns without error, the
//! original request frame is fanned out to every attached replica and the
//! propagation offset grows by its encoded length.

use crate::commands::{command_name, Registry};
use crate::connection::{Connection, ConnectionError};
use crate::protocol::RespValue;
use crate::replication::{is_propagated, master::run_ack_sink, ReplicaHandle, Role};
use crate::snapshot::EMPTY_SNAPSHOT;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Handles one client connection to completion.
///
/// This is the entry point the accept loop spawns per connection.
pub async fn handle_client(
    stream: TcpStream,
    addr: SocketAddr,
    registry: Arc<Registry>,
    shutdown: watch::Receiver<bool>,
) {
    info!(client = %addr, "Client connected");

    let conn = Connection::new(stream);
    match client_loop(conn, addr, registry, shutdown).await {
        Ok(()) => debug!(client = %addr, "Client disconnected"),
        Err(ConnectionError::Io(ref e)) if e.kind() == std::io::ErrorKind::ConnectionReset => {
            debug!(client = %addr, "Connection reset by client")
        }
        Err(e) => warn!(client = %addr, error = %e, "Connection error"),
    }
}

/// The parse/execute/reply loop.
async fn client_loop(
    mut conn: Connection,
    addr: SocketAddr,
    registry: Arc<Registry>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), ConnectionError> {
    let server = registry.context().server.clone();

    loop {
        let frame = tokio::select! {
            result = shutdown.changed() => {
                if result.is_err() || *shutdown.borrow() {
                    return Ok(());
                }
                continue;
            }
            result = conn.read_frame() => match result? {
                Some((frame, _)) => frame,
                None => return Ok(()),
            }
        };

        let name = command_name(&frame).unwrap_or_default();
        let response = registry.execute(&frame).await;

        // A granted PSYNC turns this client into a replica
        if name == "PSYNC" && is_fullresync(&response) {
            conn.write_frame(&response).await?;
            conn.write_snapshot(EMPTY_SNAPSHOT).await?;

            let (stream, leftover) = conn.into_parts();
            let (read_half, write_half) = stream.into_split();

            let replica = Arc::new(ReplicaHandle::new(addr, write_half));
            let set = Arc::clone(server.replicas());
            set.add(Arc::clone(&replica));
            info!(client = %addr, "Client promoted to replica");

            // This task now only consumes ACKs; writes go through the handle
            run_ack_sink(read_half, leftover, replica, set, shutdown).await;
            return Ok(());
        }

        conn.write_frame(&response).await?;

        // Fan successful writes out to the replicas
        if server.role() == Role::Master && !response.is_error() && is_propagated(&name) {
            server.propagate(&frame).await;
        }
    }
}

/// Checks whether a PSYNC reply grants a full resync.
fn is_fullresync(response: &RespValue) -> bool {
    matches!(response, RespValue::SimpleString(s) if s.starts_with("FULLRESYNC"))
}
