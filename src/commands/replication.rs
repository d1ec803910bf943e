//! Replication Commands
//!
//! `REPLCONF`, `PSYNC`, and `WAIT`. The commands themselves are thin; the
//! heavy lifting (snapshot transfer, promotion, the ACK barrier) lives in
//! the connection handler and the replication module. PSYNC in particular
//! only produces the FULLRESYNC line; the connection layer notices it and
//! takes over the socket.

use crate::commands::{arg_int, Context};
use crate::protocol::RespValue;
use std::time::Duration;

/// REPLCONF subcommand args...
///
/// Every recognized subcommand is acknowledged with `+OK`. A replica never
/// routes `GETACK` through here; it answers with an ACK frame before the
/// registry is involved.
pub(crate) fn replconf(args: &[RespValue]) -> RespValue {
    let Some(subcommand) = args[0].as_str() else {
        return RespValue::error("ERR invalid REPLCONF subcommand");
    };

    match subcommand.to_lowercase().as_str() {
        "listening-port" | "capa" | "ack" | "getack" => RespValue::ok(),
        other => RespValue::error(format!("ERR unsupported REPLCONF subcommand '{}'", other)),
    }
}

/// PSYNC replication-id offset
///
/// Partial resynchronization is not supported; whatever the replica asks
/// for, the answer is a full resync from offset 0.
pub(crate) fn psync(ctx: &Context, _args: &[RespValue]) -> RespValue {
    RespValue::simple_string(format!("FULLRESYNC {} 0", ctx.server.replication_id()))
}

/// WAIT numreplicas timeout-ms
pub(crate) async fn wait(ctx: &Context, args: &[RespValue]) -> RespValue {
    let need = match arg_int(&args[0]) {
        Some(n) if n >= 0 => n as usize,
        _ => return RespValue::error("ERR invalid numreplicas"),
    };

    let timeout_ms = match arg_int(&args[1]) {
        Some(t) if t >= 0 => t as u64,
        _ => return RespValue::error("ERR invalid timeout"),
    };

    let count = ctx
        .server
        .wait_for_acks(need, Duration::from_millis(timeout_ms))
        .await;

    RespValue::integer(count as i64)
}
