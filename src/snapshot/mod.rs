//! Snapshot File Reader
//!
//! Decodes the binary database dump used at startup and during the initial
//! replica sync. The layout is:
//!
//! 1. Fixed magic `REDIS` (5 bytes)
//! 2. Version (4 ASCII digits)
//! 3. A sequence of records until the EOF opcode
//!
//! Opcodes: `0xFF` end-of-file, `0xFE` select-db (followed by a length),
//! `0xFD` expire-time in seconds (u32 LE), `0xFC` expire-time in ms (u64 LE),
//! `0xFB` resizedb (two lengths), `0xFA` aux (two strings). Any other byte is
//! a value-type prefix; only value type `0x00` (string) is supported.
//!
//! Length encoding: the top two bits of the first byte select the form.
//! `00` means the low 6 bits are the length; `01` means the low 6 bits plus
//! the next byte form a 14-bit big-endian length; `10` means the next 4 bytes
//! are a big-endian u32; `11` marks a special string encoding (`0xC0` i8,
//! `0xC1` i16 LE, `0xC2` i32 LE, `0xC3` LZF compressed, which we reject).
//!
//! A missing file is not an error; the server simply starts empty. A
//! malformed file is reported to the caller, who logs it and continues with
//! whatever was decoded before the damage.

use crate::storage::StorageEngine;
use bytes::Bytes;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::debug;

/// The smallest valid snapshot: magic, version 0003, EOF marker.
///
/// This is what a master transmits to a freshly attached replica when it has
/// nothing better to send.
pub const EMPTY_SNAPSHOT: &[u8] = b"REDIS0003\xff";

/// Snapshot file magic string
const MAGIC: &[u8] = b"REDIS";

// Opcodes
const OP_EOF: u8 = 0xFF;
const OP_SELECT_DB: u8 = 0xFE;
const OP_EXPIRE_TIME: u8 = 0xFD;
const OP_EXPIRE_TIME_MS: u8 = 0xFC;
const OP_RESIZE_DB: u8 = 0xFB;
const OP_AUX: u8 = 0xFA;

// Special string encodings (length byte with top bits 11)
const ENC_INT8: u8 = 0xC0;
const ENC_INT16: u8 = 0xC1;
const ENC_INT32: u8 = 0xC2;
const ENC_LZF: u8 = 0xC3;

// Value types
const VALUE_TYPE_STRING: u8 = 0x00;

/// Errors that can occur while decoding a snapshot.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// Failed to read the file from disk
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The file does not start with the `REDIS` magic
    #[error("not a snapshot file: bad magic")]
    BadMagic,

    /// The file ended in the middle of a record
    #[error("truncated snapshot")]
    UnexpectedEof,

    /// A value type other than string was encountered
    #[error("unsupported value type: {0:#04x}")]
    UnsupportedValueType(u8),

    /// A string encoding we do not decode (LZF, or an unknown tag)
    #[error("unsupported string encoding: {0:#04x}")]
    UnsupportedEncoding(u8),
}

/// Result of a length read: either a plain length or a special encoding tag.
enum Length {
    Plain(u64),
    Encoded(u8),
}

/// A cursor over the raw snapshot bytes.
struct SnapshotReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> SnapshotReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn read_u8(&mut self) -> Result<u8, SnapshotError> {
        let byte = *self.buf.get(self.pos).ok_or(SnapshotError::UnexpectedEof)?;
        self.pos += 1;
        Ok(byte)
    }

    fn read_exact(&mut self, n: usize) -> Result<&'a [u8], SnapshotError> {
        if self.pos + n > self.buf.len() {
            return Err(SnapshotError::UnexpectedEof);
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u32_le(&mut self) -> Result<u32, SnapshotError> {
        let bytes = self.read_exact(4)?;
        Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
    }

    fn read_u64_le(&mut self) -> Result<u64, SnapshotError> {
        let bytes = self.read_exact(8)?;
        Ok(u64::from_le_bytes(bytes.try_into().unwrap()))
    }

    /// Reads a length-encoded value.
    ///
    /// The top two bits of the first byte select the representation.
    fn read_length(&mut self) -> Result<Length, SnapshotError> {
        let first = self.read_u8()?;

        match first >> 6 {
            // Next 6 bits are the length
            0b00 => Ok(Length::Plain(u64::from(first & 0x3F))),

            // 14-bit big-endian length: low 6 bits plus the next byte
            0b01 => {
                let next = self.read_u8()?;
                Ok(Length::Plain(u64::from(first & 0x3F) << 8 | u64::from(next)))
            }

            // 32-bit big-endian length in the next 4 bytes
            0b10 => {
                let bytes = self.read_exact(4)?;
                Ok(Length::Plain(u64::from(u32::from_be_bytes(
                    bytes.try_into().unwrap(),
                ))))
            }

            // Special string encoding; the byte itself is the tag
            _ => Ok(Length::Encoded(first)),
        }
    }

    /// Reads a length-prefixed string, including the integer-encoded forms.
    ///
    /// Integer encodings come back as their decimal ASCII representation,
    /// which is how the rest of the server treats numbers anyway.
    fn read_string(&mut self) -> Result<Bytes, SnapshotError> {
        match self.read_length()? {
            Length::Plain(len) => {
                let data = self.read_exact(len as usize)?;
                Ok(Bytes::copy_from_slice(data))
            }
            Length::Encoded(ENC_INT8) => {
                let n = self.read_u8()? as i8;
                Ok(Bytes::from(n.to_string()))
            }
            Length::Encoded(ENC_INT16) => {
                let bytes = self.read_exact(2)?;
                let n = i16::from_le_bytes(bytes.try_into().unwrap());
                Ok(Bytes::from(n.to_string()))
            }
            Length::Encoded(ENC_INT32) => {
                let n = self.read_u32_le()? as i32;
                Ok(Bytes::from(n.to_string()))
            }
            // ENC_LZF and any unknown tag land here
            Length::Encoded(tag) => Err(SnapshotError::UnsupportedEncoding(tag)),
        }
    }
}

/// Loads a snapshot file into storage.
///
/// An absent file is not an error; the server simply starts with an empty
/// key space.
///
/// # Returns
///
/// The number of keys registered into storage.
pub fn load_file(dir: &str, filename: &str, storage: &StorageEngine) -> Result<usize, SnapshotError> {
    let path = Path::new(dir).join(filename);

    if !path.exists() {
        debug!(path = %path.display(), "No snapshot file, starting empty");
        return Ok(0);
    }

    let data = std::fs::read(&path)?;
    let loaded = load_bytes(&data, storage)?;
    debug!(path = %path.display(), keys = loaded, "Snapshot loaded");
    Ok(loaded)
}

/// Decodes a snapshot held in memory and registers its keys into storage.
pub fn load_bytes(data: &[u8], storage: &StorageEngine) -> Result<usize, SnapshotError> {
    let mut reader = SnapshotReader::new(data);

    if reader.read_exact(MAGIC.len())? != MAGIC {
        return Err(SnapshotError::BadMagic);
    }

    // Version: 4 ASCII digits. Nothing downstream depends on the value.
    reader.read_exact(4)?;

    let mut loaded = 0usize;

    loop {
        let opcode = reader.read_u8()?;

        match opcode {
            OP_EOF => return Ok(loaded),

            OP_SELECT_DB => {
                // Database index; a single key space ignores it
                reader.read_length()?;
            }

            OP_RESIZE_DB => {
                // Hash table size hints
                reader.read_length()?;
                reader.read_length()?;
            }

            OP_AUX => {
                // Auxiliary metadata key/value
                reader.read_string()?;
                reader.read_string()?;
            }

            OP_EXPIRE_TIME => {
                let expiry_secs = reader.read_u32_le()?;
                let expiry_ms = u64::from(expiry_secs) * 1000;
                read_key_value(&mut reader, storage, expiry_ms)?;
                loaded += 1;
            }

            OP_EXPIRE_TIME_MS => {
                let expiry_ms = reader.read_u64_le()?;
                read_key_value(&mut reader, storage, expiry_ms)?;
                loaded += 1;
            }

            value_type => {
                read_value(&mut reader, storage, value_type, 0)?;
                loaded += 1;
            }
        }
    }
}

/// Reads the value-type byte and the key/value pair following an expiry opcode.
fn read_key_value(
    reader: &mut SnapshotReader<'_>,
    storage: &StorageEngine,
    expiry_ms: u64,
) -> Result<(), SnapshotError> {
    let value_type = reader.read_u8()?;
    read_value(reader, storage, value_type, expiry_ms)
}

/// Reads one key/value record and registers it into storage.
///
/// `expiry_ms` of 0 means no expiry. Keys whose deadline already passed are
/// inserted anyway; the next read or purge cycle removes them.
fn read_value(
    reader: &mut SnapshotReader<'_>,
    storage: &StorageEngine,
    value_type: u8,
    expiry_ms: u64,
) -> Result<(), SnapshotError> {
    if value_type != VALUE_TYPE_STRING {
        return Err(SnapshotError::UnsupportedValueType(value_type));
    }

    let key = reader.read_string()?;
    let value = reader.read_string()?;

    let expires_at = if expiry_ms > 0 {
        Some(UNIX_EPOCH + Duration::from_millis(expiry_ms))
    } else {
        None
    };

    storage.set(key, value, expires_at);
    Ok(())
}

/// Convenience for tests and callers that want a deadline as Unix milliseconds.
pub fn unix_millis(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
