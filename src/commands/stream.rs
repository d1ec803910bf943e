//! Stream Commands
//!
//! `XADD` appends an entry to a stream, creating the stream if the key is
//! absent. The ID argument comes in three shapes:
//!
//! - `*` - generate both parts from the wall clock
//! - `<ms>-*` - explicit milliseconds, generated sequence
//! - `<ms>-<seq>` - fully explicit
//!
//! Whatever the shape, the resolved ID must be strictly greater than the
//! last entry's ID, and `0-0` is never allowed.

use crate::commands::{arg_bytes, Context};
use crate::protocol::RespValue;
use crate::storage::StreamId;
use bytes::Bytes;
use std::time::{SystemTime, UNIX_EPOCH};

const ERR_INVALID_ID: &str = "ERR Invalid stream ID specified as stream command argument";
const ERR_ID_TOO_SMALL: &str =
    "ERR The ID specified in XADD is equal or smaller than the target stream top item";
const ERR_ID_IS_FLOOR: &str = "ERR The ID specified in XADD must be greater than 0-0";

/// XADD key id field value [field value ...]
pub(crate) fn xadd(ctx: &Context, args: &[RespValue]) -> RespValue {
    let Some(key) = arg_bytes(&args[0]) else {
        return RespValue::error("ERR invalid key");
    };
    let Some(id_spec) = args[1].as_str() else {
        return RespValue::error(ERR_INVALID_ID);
    };

    let tail = &args[2..];
    if tail.is_empty() || tail.len() % 2 != 0 {
        return RespValue::error("ERR wrong number of arguments for 'xadd' command");
    }

    let mut fields: Vec<(Bytes, Bytes)> = Vec::with_capacity(tail.len() / 2);
    for pair in tail.chunks(2) {
        let (Some(field), Some(value)) = (arg_bytes(&pair[0]), arg_bytes(&pair[1])) else {
            return RespValue::error("ERR invalid field or value");
        };
        fields.push((field, value));
    }

    let stream = match ctx.storage.get_or_create_stream(key) {
        Ok(stream) => stream,
        Err(e) => return RespValue::error(e.to_string()),
    };

    let id = match resolve_stream_id(id_spec, stream.last_id()) {
        Ok(id) => id,
        Err(message) => return RespValue::error(message),
    };

    stream.append(id, fields);
    RespValue::bulk_string(Bytes::from(id.to_string()))
}

/// Resolves an XADD ID argument against the stream's current top entry.
fn resolve_stream_id(input: &str, last: Option<StreamId>) -> Result<StreamId, &'static str> {
    // Fully automatic: current wall clock, sequence bumped on collision.
    // The result is greater than any previous entry by construction.
    if input == "*" {
        let ms = now_unix_millis();
        let seq = match last {
            Some(top) if top.ms == ms => top.seq + 1,
            _ => 0,
        };
        return Ok(StreamId::new(ms, seq));
    }

    let (ms_part, seq_part) = input.split_once('-').ok_or(ERR_INVALID_ID)?;
    let ms: u64 = ms_part.parse().map_err(|_| ERR_INVALID_ID)?;

    // Explicit milliseconds with a generated sequence
    let candidate = if seq_part == "*" {
        let seq = match last {
            Some(top) if top.ms == ms => top.seq + 1,
            // The smallest valid ID in the 0- millisecond is 0-1
            None if ms == 0 => 1,
            _ => 0,
        };
        StreamId::new(ms, seq)
    } else {
        let seq: u64 = seq_part.parse().map_err(|_| ERR_INVALID_ID)?;
        StreamId::new(ms, seq)
    };

    if candidate == StreamId::FLOOR {
        return Err(ERR_ID_IS_FLOOR);
    }
    if let Some(top) = last {
        if candidate <= top {
            return Err(ERR_ID_TOO_SMALL);
        }
    }

    Ok(candidate)
}

fn now_unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::Registry;
    use crate::config::ServerConfig;
    use crate::replication::ServerHandle;
    use crate::storage::StorageEngine;
    use std::sync::Arc;

    fn test_registry() -> Registry {
        Registry::new(crate::commands::Context {
            storage: Arc::new(StorageEngine::new()),
            config: Arc::new(ServerConfig::default()),
            server: ServerHandle::new_master(),
        })
    }

    fn cmd(parts: &[&str]) -> RespValue {
        RespValue::command(parts)
    }

    #[tokio::test]
    async fn test_xadd_validation_sequence() {
        let registry = test_registry();

        // 0-0 is rejected even on an empty stream
        let response = registry.execute(&cmd(&["XADD", "s", "0-0", "k", "v"])).await;
        assert_eq!(response, RespValue::error(ERR_ID_IS_FLOOR));

        // A valid explicit ID is echoed back
        let response = registry.execute(&cmd(&["XADD", "s", "1-1", "k", "v"])).await;
        assert_eq!(response, RespValue::bulk_string(Bytes::from("1-1")));

        // Repeating it is a monotonicity violation
        let response = registry.execute(&cmd(&["XADD", "s", "1-1", "k", "v"])).await;
        assert_eq!(response, RespValue::error(ERR_ID_TOO_SMALL));

        // Same millisecond with a generated sequence continues from the top
        let response = registry.execute(&cmd(&["XADD", "s", "1-*", "k", "v"])).await;
        assert_eq!(response, RespValue::bulk_string(Bytes::from("1-2")));
    }

    #[tokio::test]
    async fn test_xadd_rejects_going_backwards() {
        let registry = test_registry();

        registry.execute(&cmd(&["XADD", "s", "5-5", "k", "v"])).await;

        let response = registry.execute(&cmd(&["XADD", "s", "5-4", "k", "v"])).await;
        assert_eq!(response, RespValue::error(ERR_ID_TOO_SMALL));

        let response = registry.execute(&cmd(&["XADD", "s", "4-9", "k", "v"])).await;
        assert_eq!(response, RespValue::error(ERR_ID_TOO_SMALL));

        let response = registry.execute(&cmd(&["XADD", "s", "5-6", "k", "v"])).await;
        assert_eq!(response, RespValue::bulk_string(Bytes::from("5-6")));
    }

    #[tokio::test]
    async fn test_xadd_odd_field_count() {
        let registry = test_registry();

        let response = registry
            .execute(&cmd(&["XADD", "s", "1-1", "k", "v", "dangling"]))
            .await;
        assert_eq!(
            response,
            RespValue::error("ERR wrong number of arguments for 'xadd' command")
        );
    }

    #[tokio::test]
    async fn test_xadd_against_string_key() {
        let registry = test_registry();

        registry.execute(&cmd(&["SET", "k", "v"])).await;
        let response = registry.execute(&cmd(&["XADD", "k", "1-1", "f", "v"])).await;
        assert_eq!(
            response,
            RespValue::error("WRONGTYPE Operation against a key holding the wrong kind of value")
        );
    }

    #[tokio::test]
    async fn test_xadd_auto_id() {
        let registry = test_registry();

        let response = registry.execute(&cmd(&["XADD", "s", "*", "k", "v"])).await;
        let id: StreamId = response.as_str().unwrap().parse().unwrap();
        assert!(id > StreamId::FLOOR);

        // A second auto ID must land strictly after the first
        let response = registry.execute(&cmd(&["XADD", "s", "*", "k", "v"])).await;
        let second: StreamId = response.as_str().unwrap().parse().unwrap();
        assert!(second > id);
    }

    #[test]
    fn test_resolve_explicit() {
        assert_eq!(resolve_stream_id("1-1", None), Ok(StreamId::new(1, 1)));
        assert_eq!(
            resolve_stream_id("2-0", Some(StreamId::new(1, 9))),
            Ok(StreamId::new(2, 0))
        );
        assert_eq!(resolve_stream_id("0-0", None), Err(ERR_ID_IS_FLOOR));
        assert_eq!(
            resolve_stream_id("1-1", Some(StreamId::new(1, 1))),
            Err(ERR_ID_TOO_SMALL)
        );
    }

    #[test]
    fn test_resolve_malformed() {
        for input in ["oops", "1", "1-", "-1", "a-1", "1-b", "1-2-3"] {
            assert_eq!(resolve_stream_id(input, None), Err(ERR_INVALID_ID), "{}", input);
        }
    }

    #[test]
    fn test_resolve_generated_sequence() {
        // Empty stream, nonzero ms: sequence starts at 0
        assert_eq!(resolve_stream_id("5-*", None), Ok(StreamId::new(5, 0)));

        // Same ms as the top entry: sequence continues
        assert_eq!(
            resolve_stream_id("5-*", Some(StreamId::new(5, 2))),
            Ok(StreamId::new(5, 3))
        );

        // Different ms: sequence resets
        assert_eq!(
            resolve_stream_id("6-*", Some(StreamId::new(5, 2))),
            Ok(StreamId::new(6, 0))
        );

        // ms 0 on an empty stream skips the reserved 0-0
        assert_eq!(resolve_stream_id("0-*", None), Ok(StreamId::new(0, 1)));

        // ms 0 behind an existing entry cannot produce a valid ID
        assert_eq!(
            resolve_stream_id("0-*", Some(StreamId::new(5, 0))),
            Err(ERR_ID_IS_FLOOR)
        );
    }
}
