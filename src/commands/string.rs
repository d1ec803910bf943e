//! String Commands
//!
//! `SET` and `GET`. SET accepts the `EX <seconds>` and `PX <milliseconds>`
//! options, both of which turn into an absolute wall-clock deadline at
//! execution time; any other option is a syntax error.

use crate::commands::{arg_bytes, arg_int, Context};
use crate::protocol::RespValue;
use std::time::{Duration, SystemTime};

/// SET key value [EX seconds | PX milliseconds]
pub(crate) fn set(ctx: &Context, args: &[RespValue]) -> RespValue {
    let Some(key) = arg_bytes(&args[0]) else {
        return RespValue::error("ERR invalid key");
    };
    let Some(value) = arg_bytes(&args[1]) else {
        return RespValue::error("ERR invalid value");
    };

    let mut expires_at: Option<SystemTime> = None;

    let mut i = 2;
    while i < args.len() {
        let Some(option) = args[i].as_str() else {
            return RespValue::error("ERR syntax error");
        };

        match option.to_uppercase().as_str() {
            "EX" => {
                if i + 1 >= args.len() {
                    return RespValue::error("ERR syntax error");
                }
                let seconds = match arg_int(&args[i + 1]) {
                    Some(s) if s > 0 => s as u64,
                    _ => return RespValue::error("ERR invalid expire time in set"),
                };
                expires_at = Some(SystemTime::now() + Duration::from_secs(seconds));
                i += 2;
            }
            "PX" => {
                if i + 1 >= args.len() {
                    return RespValue::error("ERR syntax error");
                }
                let millis = match arg_int(&args[i + 1]) {
                    Some(ms) if ms > 0 => ms as u64,
                    _ => return RespValue::error("ERR invalid expire time in set"),
                };
                expires_at = Some(SystemTime::now() + Duration::from_millis(millis));
                i += 2;
            }
            _ => return RespValue::error("ERR syntax error"),
        }
    }

    ctx.storage.set(key, value, expires_at);
    RespValue::ok()
}

/// GET key
pub(crate) fn get(ctx: &Context, args: &[RespValue]) -> RespValue {
    let Some(key) = arg_bytes(&args[0]) else {
        return RespValue::error("ERR invalid key");
    };

    match ctx.storage.get_string(&key) {
        Ok(Some(value)) => RespValue::bulk_string(value),
        Ok(None) => RespValue::null(),
        Err(e) => RespValue::error(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::Registry;
    use crate::config::ServerConfig;
    use crate::replication::ServerHandle;
    use crate::storage::StorageEngine;
    use bytes::Bytes;
    use std::sync::Arc;

    fn test_registry() -> Registry {
        Registry::new(Context {
            storage: Arc::new(StorageEngine::new()),
            config: Arc::new(ServerConfig::default()),
            server: ServerHandle::new_master(),
        })
    }

    fn cmd(parts: &[&str]) -> RespValue {
        RespValue::command(parts)
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let registry = test_registry();

        assert_eq!(registry.execute(&cmd(&["SET", "k", "v"])).await, RespValue::ok());
        assert_eq!(
            registry.execute(&cmd(&["GET", "k"])).await,
            RespValue::bulk_string(Bytes::from("v"))
        );
    }

    #[tokio::test]
    async fn test_get_missing_is_null() {
        let registry = test_registry();
        assert_eq!(registry.execute(&cmd(&["GET", "nope"])).await, RespValue::null());
    }

    #[tokio::test]
    async fn test_set_overwrites() {
        let registry = test_registry();

        registry.execute(&cmd(&["SET", "k", "old"])).await;
        registry.execute(&cmd(&["SET", "k", "new"])).await;
        assert_eq!(
            registry.execute(&cmd(&["GET", "k"])).await,
            RespValue::bulk_string(Bytes::from("new"))
        );
    }

    #[tokio::test]
    async fn test_set_with_px_expires() {
        let registry = test_registry();

        assert_eq!(
            registry.execute(&cmd(&["SET", "a", "1", "PX", "100"])).await,
            RespValue::ok()
        );
        assert_eq!(
            registry.execute(&cmd(&["GET", "a"])).await,
            RespValue::bulk_string(Bytes::from("1"))
        );

        tokio::time::sleep(std::time::Duration::from_millis(150)).await;
        assert_eq!(registry.execute(&cmd(&["GET", "a"])).await, RespValue::null());
    }

    #[tokio::test]
    async fn test_set_with_ex() {
        let registry = test_registry();

        assert_eq!(
            registry.execute(&cmd(&["SET", "a", "1", "EX", "100"])).await,
            RespValue::ok()
        );
        assert_eq!(
            registry.execute(&cmd(&["GET", "a"])).await,
            RespValue::bulk_string(Bytes::from("1"))
        );
    }

    #[tokio::test]
    async fn test_set_option_case_insensitive() {
        let registry = test_registry();
        assert_eq!(
            registry.execute(&cmd(&["SET", "a", "1", "px", "50000"])).await,
            RespValue::ok()
        );
    }

    #[tokio::test]
    async fn test_set_rejects_bad_expire_times() {
        let registry = test_registry();

        for expiry in ["0", "-5", "abc"] {
            let response = registry.execute(&cmd(&["SET", "a", "1", "PX", expiry])).await;
            assert_eq!(
                response,
                RespValue::error("ERR invalid expire time in set"),
                "PX {} should be rejected",
                expiry
            );
        }
    }

    #[tokio::test]
    async fn test_set_rejects_unknown_options() {
        let registry = test_registry();

        let response = registry.execute(&cmd(&["SET", "a", "1", "NX"])).await;
        assert_eq!(response, RespValue::error("ERR syntax error"));

        // Dangling EX with no value
        let response = registry.execute(&cmd(&["SET", "a", "1", "EX"])).await;
        assert_eq!(response, RespValue::error("ERR syntax error"));
    }

    #[tokio::test]
    async fn test_get_on_stream_is_wrongtype() {
        let registry = test_registry();

        registry.execute(&cmd(&["XADD", "s", "1-1", "f", "v"])).await;
        let response = registry.execute(&cmd(&["GET", "s"])).await;
        assert_eq!(
            response,
            RespValue::error("WRONGTYPE Operation against a key holding the wrong kind of value")
        );
    }
}
