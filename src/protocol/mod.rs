//! RESP Protocol Implementation
//!
//! This module provides the wire codec for EmberKV: the RESP frame type with
//! its encoder, and an incremental parser for incoming data.
//!
//! ## Modules
//!
//! - `types`: Defines the `RespValue` enum, serialization, and `wire_len`
//! - `parser`: Incremental parser for incoming RESP data
//!
//! ## Example
//!
//! ```ignore
//! use emberkv::protocol::{RespValue, parse_frame};
//! use bytes::Bytes;
//!
//! // Parsing incoming data
//! let data = b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n";
//! let (value, consumed) = parse_frame(data).unwrap().unwrap();
//!
//! // Creating responses
//! let response = RespValue::bulk_string(Bytes::from("hello"));
//! let bytes = response.serialize();
//! ```

pub mod parser;
pub mod types;

// Re-export commonly used types for convenience
pub use parser::{parse_frame, ParseError, ParseResult, RespParser};
pub use types::RespValue;
