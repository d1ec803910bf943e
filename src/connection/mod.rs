//! Connection Module
//!
//! This module owns the byte-level view of a TCP connection: a `BytesMut`
//! read buffer fed by the socket and drained by the RESP parser, plus write
//! helpers for frames and the snapshot transfer.
//!
//! ## Buffer Management
//!
//! TCP is a stream protocol; a single read may carry half a command or
//! several pipelined ones. [`Connection`] accumulates incoming data and
//! surfaces exactly one frame at a time, together with the number of wire
//! bytes that frame occupied (the replication offsets are maintained in
//! those units).
//!
//! ## The Snapshot Handoff
//!
//! During the replica handshake the same byte stream switches from framed
//! reads to a raw transfer: `$<len>\r\n` followed by exactly `len` bytes with
//! no trailing CRLF. Because frames and the snapshot share one buffer, no
//! byte is ever read twice and none is dropped when switching modes. After
//! [`read_snapshot`](Connection::read_snapshot) returns, framed reads resume
//! on whatever followed the snapshot.
//!
//! A connection can also be dismantled with
//! [`into_parts`](Connection::into_parts) when a client is promoted to a
//! replica: the socket halves are split, and any buffered-but-unparsed bytes
//! travel along so the ACK sink can pick up where the framed reader stopped.

pub mod handler;

pub use handler::handle_client;

use crate::protocol::{parser::MAX_BULK_SIZE, ParseError, RespParser, RespValue};
use bytes::{Buf, Bytes, BytesMut};
use std::net::SocketAddr;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Maximum size for the framed read buffer (16 MB)
const MAX_BUFFER_SIZE: usize = 16 * 1024 * 1024;

/// Initial buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Errors that can occur while reading from or writing to a connection.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// RESP parse error
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// The peer closed the connection in the middle of a frame or transfer
    #[error("unexpected end of stream")]
    UnexpectedEof,

    /// Frame buffer size limit exceeded
    #[error("buffer size limit exceeded")]
    BufferFull,

    /// The snapshot header announced an unreasonable length
    #[error("snapshot too large: {0} bytes")]
    SnapshotTooLarge(usize),
}

/// A buffered, framed TCP connection.
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    buffer: BytesMut,
    parser: RespParser,
}

impl Connection {
    /// Wraps a TCP stream.
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            parser: RespParser::new(),
        }
    }

    /// The peer's socket address, for logging.
    pub fn peer_addr(&self) -> std::io::Result<SocketAddr> {
        self.stream.peer_addr()
    }

    /// Reads one frame, returning it together with its encoded byte length.
    ///
    /// # Returns
    ///
    /// - `Ok(Some((frame, wire_len)))` - one complete frame
    /// - `Ok(None)` - the peer closed the connection cleanly between frames
    /// - `Err(_)` - I/O failure, protocol violation, or EOF mid-frame
    pub async fn read_frame(&mut self) -> Result<Option<(RespValue, usize)>, ConnectionError> {
        loop {
            if let Some((frame, consumed)) = self.parser.parse(&self.buffer)? {
                self.buffer.advance(consumed);
                return Ok(Some((frame, consumed)));
            }

            if self.buffer.len() >= MAX_BUFFER_SIZE {
                return Err(ConnectionError::BufferFull);
            }

            if self.stream.read_buf(&mut self.buffer).await? == 0 {
                return if self.buffer.is_empty() {
                    Ok(None)
                } else {
                    // Partial frame in the buffer
                    Err(ConnectionError::UnexpectedEof)
                };
            }
        }
    }

    /// Writes one frame and flushes.
    pub async fn write_frame(&mut self, frame: &RespValue) -> Result<(), ConnectionError> {
        let bytes = frame.serialize();
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Writes a snapshot as an unterminated bulk: `$<len>\r\n` followed by
    /// the raw bytes, with no trailing CRLF.
    pub async fn write_snapshot(&mut self, snapshot: &[u8]) -> Result<(), ConnectionError> {
        let header = format!("${}\r\n", snapshot.len());
        self.stream.write_all(header.as_bytes()).await?;
        self.stream.write_all(snapshot).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Reads a snapshot transfer: `$<len>\r\n` then exactly `len` raw bytes.
    ///
    /// If the next byte on the stream is not `$`, no snapshot is being sent;
    /// the buffer is left untouched so the byte is parsed as the start of
    /// the next frame. A clean EOF before any byte arrives also reports no
    /// snapshot.
    pub async fn read_snapshot(&mut self) -> Result<Option<Bytes>, ConnectionError> {
        // Peek at the first byte
        while self.buffer.is_empty() {
            if self.stream.read_buf(&mut self.buffer).await? == 0 {
                return Ok(None);
            }
        }

        if self.buffer[0] != b'$' {
            return Ok(None);
        }

        // Read until the header line is complete
        let header_end = loop {
            if let Some(pos) = find_crlf(&self.buffer[1..]) {
                break pos;
            }
            if self.stream.read_buf(&mut self.buffer).await? == 0 {
                return Err(ConnectionError::UnexpectedEof);
            }
        };

        let len: usize = std::str::from_utf8(&self.buffer[1..1 + header_end])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| {
                ConnectionError::Parse(ParseError::ProtocolError(
                    "malformed snapshot length".to_string(),
                ))
            })?;

        if len > MAX_BULK_SIZE {
            return Err(ConnectionError::SnapshotTooLarge(len));
        }

        // Drop the `$<len>\r\n` header
        self.buffer.advance(1 + header_end + 2);

        // Accumulate exactly `len` raw bytes; no trailing CRLF follows
        while self.buffer.len() < len {
            if self.stream.read_buf(&mut self.buffer).await? == 0 {
                return Err(ConnectionError::UnexpectedEof);
            }
        }

        Ok(Some(self.buffer.split_to(len).freeze()))
    }

    /// Dismantles the connection into its socket and any buffered bytes.
    ///
    /// Used when promoting a client connection to a replica: the socket
    /// halves are split between the ACK sink and the propagation writer, and
    /// the leftover bytes must be handed to whichever reader continues, or
    /// data arriving right behind the PSYNC would be lost.
    pub fn into_parts(self) -> (TcpStream, BytesMut) {
        (self.stream, self.buffer)
    }
}

/// Finds the position of CRLF in the buffer.
#[inline]
fn find_crlf(buf: &[u8]) -> Option<usize> {
    for i in 0..buf.len().saturating_sub(1) {
        if buf[i] == b'\r' && buf[i + 1] == b'\n' {
            return Some(i);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Returns a connected (client stream, server connection) pair.
    async fn socket_pair() -> (TcpStream, Connection) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (client, Connection::new(server))
    }

    #[tokio::test]
    async fn test_read_frame_with_length() {
        let (mut client, mut conn) = socket_pair().await;

        client.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();

        let (frame, len) = conn.read_frame().await.unwrap().unwrap();
        assert_eq!(frame, RespValue::command(&["PING"]));
        assert_eq!(len, 14);
    }

    #[tokio::test]
    async fn test_read_frame_split_across_writes() {
        let (mut client, mut conn) = socket_pair().await;

        let reader = tokio::spawn(async move {
            let frame = conn.read_frame().await.unwrap().unwrap();
            frame
        });

        client.write_all(b"$5\r\nhe").await.unwrap();
        client.flush().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        client.write_all(b"llo\r\n").await.unwrap();

        let (frame, len) = reader.await.unwrap();
        assert_eq!(frame, RespValue::bulk_string(Bytes::from("hello")));
        assert_eq!(len, 11);
    }

    #[tokio::test]
    async fn test_clean_eof_returns_none() {
        let (client, mut conn) = socket_pair().await;
        drop(client);

        assert!(conn.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_eof_mid_frame_is_an_error() {
        let (mut client, mut conn) = socket_pair().await;

        client.write_all(b"$5\r\nhe").await.unwrap();
        drop(client);

        assert!(matches!(
            conn.read_frame().await,
            Err(ConnectionError::UnexpectedEof)
        ));
    }

    #[tokio::test]
    async fn test_write_snapshot_format() {
        let (mut client, mut conn) = socket_pair().await;

        conn.write_snapshot(b"REDIS0003\xff").await.unwrap();
        drop(conn);

        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"$10\r\nREDIS0003\xff");
    }

    #[tokio::test]
    async fn test_read_snapshot_then_frames() {
        let (mut client, mut conn) = socket_pair().await;

        // Snapshot immediately followed by a pipelined command, all in one
        // write; the framed reader must resume exactly after the raw bytes
        client
            .write_all(b"$10\r\nREDIS0003\xff*1\r\n$4\r\nPING\r\n")
            .await
            .unwrap();

        let snapshot = conn.read_snapshot().await.unwrap().unwrap();
        assert_eq!(&snapshot[..], b"REDIS0003\xff");

        let (frame, _) = conn.read_frame().await.unwrap().unwrap();
        assert_eq!(frame, RespValue::command(&["PING"]));
    }

    #[tokio::test]
    async fn test_read_snapshot_absent() {
        let (mut client, mut conn) = socket_pair().await;

        // No snapshot; the first byte belongs to the next frame
        client.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();

        assert!(conn.read_snapshot().await.unwrap().is_none());

        let (frame, _) = conn.read_frame().await.unwrap().unwrap();
        assert_eq!(frame, RespValue::command(&["PING"]));
    }

    #[tokio::test]
    async fn test_into_parts_preserves_buffered_bytes() {
        let (mut client, mut conn) = socket_pair().await;

        // Two pipelined frames; read only the first
        client
            .write_all(b"*1\r\n$4\r\nPING\r\n*3\r\n$8\r\nREPLCONF\r\n$3\r\nACK\r\n$1\r\n0\r\n")
            .await
            .unwrap();

        let (frame, _) = conn.read_frame().await.unwrap().unwrap();
        assert_eq!(frame, RespValue::command(&["PING"]));

        // The second frame continues from the leftover bytes plus whatever
        // is still in flight on the socket
        let (mut stream, mut leftover) = conn.into_parts();
        let frame = loop {
            if let Some((frame, consumed)) = crate::protocol::parse_frame(&leftover).unwrap() {
                assert_eq!(consumed, leftover.len());
                break frame;
            }
            assert!(stream.read_buf(&mut leftover).await.unwrap() > 0);
        };
        assert_eq!(frame, RespValue::command(&["REPLCONF", "ACK", "0"]));
    }
}
