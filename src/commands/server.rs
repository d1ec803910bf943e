//! Server and Key Commands
//!
//! The connection-health and introspection commands: `PING`, `ECHO`,
//! `CONFIG`, `KEYS`, `TYPE`, and `INFO`.

use crate::commands::{arg_bytes, Context};
use crate::protocol::RespValue;
use bytes::Bytes;

/// PING [message]
pub(crate) fn ping(args: &[RespValue]) -> RespValue {
    match args.first().and_then(RespValue::as_str) {
        Some(message) => RespValue::simple_string(message),
        None => RespValue::pong(),
    }
}

/// ECHO message
pub(crate) fn echo(args: &[RespValue]) -> RespValue {
    match arg_bytes(&args[0]) {
        Some(message) => RespValue::bulk_string(message),
        None => RespValue::error("ERR invalid message"),
    }
}

/// CONFIG GET parameter | CONFIG SET parameter value
pub(crate) fn config(ctx: &Context, args: &[RespValue]) -> RespValue {
    let Some(subcommand) = args[0].as_str() else {
        return RespValue::error("ERR invalid subcommand");
    };

    match subcommand.to_uppercase().as_str() {
        "GET" => {
            if args.len() != 2 {
                return RespValue::error("ERR wrong number of arguments for 'config get' command");
            }
            let Some(parameter) = args[1].as_str() else {
                return RespValue::error("ERR invalid parameter");
            };
            let parameter = parameter.to_lowercase();

            match ctx.config.get(&parameter) {
                Some(value) => RespValue::array(vec![
                    RespValue::bulk_string(Bytes::from(parameter)),
                    RespValue::bulk_string(Bytes::from(value)),
                ]),
                // Unknown parameters produce an empty array, not an error
                None => RespValue::array(vec![]),
            }
        }

        "SET" => {
            if args.len() != 3 {
                return RespValue::error("ERR wrong number of arguments for 'config set' command");
            }
            let Some(parameter) = args[1].as_str() else {
                return RespValue::error("ERR invalid parameter");
            };
            let Some(value) = args[2].as_str() else {
                return RespValue::error("ERR invalid value");
            };
            let parameter = parameter.to_lowercase();

            if ctx.config.set(&parameter, value.to_string()) {
                RespValue::ok()
            } else {
                RespValue::error(format!("ERR Unsupported CONFIG parameter: {}", parameter))
            }
        }

        _ => RespValue::error("ERR Unknown subcommand or wrong number of arguments"),
    }
}

/// KEYS pattern
pub(crate) fn keys(ctx: &Context, args: &[RespValue]) -> RespValue {
    let Some(pattern) = args[0].as_str() else {
        return RespValue::error("ERR invalid pattern");
    };

    let matched = ctx.storage.keys(pattern);
    RespValue::array(matched.into_iter().map(RespValue::bulk_string).collect())
}

/// TYPE key
pub(crate) fn key_type(ctx: &Context, args: &[RespValue]) -> RespValue {
    let Some(key) = arg_bytes(&args[0]) else {
        return RespValue::error("ERR invalid key");
    };

    RespValue::simple_string(ctx.storage.key_type(&key))
}

/// INFO [section]
///
/// Only the replication section carries real data; unknown sections come
/// back empty.
pub(crate) fn info(ctx: &Context, args: &[RespValue]) -> RespValue {
    let section = args
        .first()
        .and_then(RespValue::as_str)
        .map(str::to_lowercase)
        .unwrap_or_else(|| "all".to_string());

    match section.as_str() {
        "replication" | "all" => {
            RespValue::bulk_string(Bytes::from(replication_section(ctx)))
        }
        _ => RespValue::bulk_string(Bytes::new()),
    }
}

fn replication_section(ctx: &Context) -> String {
    let lines = [
        "# Replication".to_string(),
        format!("role:{}", ctx.server.role().as_str()),
        format!("connected_slaves:{}", ctx.server.replica_count()),
        format!("master_replid:{}", ctx.server.replication_id()),
        "master_replid2:0000000000000000000000000000000000000000".to_string(),
        "master_repl_offset:0".to_string(),
        "second_repl_offset:-1".to_string(),
        "repl_backlog_active:0".to_string(),
        "repl_backlog_size:1048576".to_string(),
        "repl_backlog_first_byte_offset:0".to_string(),
        "repl_backlog_histlen:0".to_string(),
    ];

    lines.join("\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::Registry;
    use crate::config::ServerConfig;
    use crate::replication::ServerHandle;
    use crate::storage::StorageEngine;
    use std::sync::Arc;

    fn registry_with(server: ServerHandle) -> Registry {
        Registry::new(Context {
            storage: Arc::new(StorageEngine::new()),
            config: Arc::new(ServerConfig::new(
                "/data".to_string(),
                "dump.rdb".to_string(),
                6379,
                None,
            )),
            server,
        })
    }

    fn test_registry() -> Registry {
        registry_with(ServerHandle::new_master())
    }

    fn cmd(parts: &[&str]) -> RespValue {
        RespValue::command(parts)
    }

    #[tokio::test]
    async fn test_ping() {
        let registry = test_registry();

        assert_eq!(registry.execute(&cmd(&["PING"])).await, RespValue::pong());
        assert_eq!(
            registry.execute(&cmd(&["PING", "hello"])).await,
            RespValue::simple_string("hello")
        );
    }

    #[tokio::test]
    async fn test_echo() {
        let registry = test_registry();

        assert_eq!(
            registry.execute(&cmd(&["ECHO", "hey"])).await,
            RespValue::bulk_string(Bytes::from("hey"))
        );
    }

    #[tokio::test]
    async fn test_config_get() {
        let registry = test_registry();

        assert_eq!(
            registry.execute(&cmd(&["CONFIG", "GET", "dir"])).await,
            RespValue::array(vec![
                RespValue::bulk_string(Bytes::from("dir")),
                RespValue::bulk_string(Bytes::from("/data")),
            ])
        );

        // Unknown parameter: empty array
        assert_eq!(
            registry.execute(&cmd(&["CONFIG", "GET", "maxmemory"])).await,
            RespValue::array(vec![])
        );
    }

    #[tokio::test]
    async fn test_config_set() {
        let registry = test_registry();

        assert_eq!(
            registry
                .execute(&cmd(&["CONFIG", "SET", "dbfilename", "other.rdb"]))
                .await,
            RespValue::ok()
        );
        assert_eq!(
            registry.execute(&cmd(&["CONFIG", "GET", "dbfilename"])).await,
            RespValue::array(vec![
                RespValue::bulk_string(Bytes::from("dbfilename")),
                RespValue::bulk_string(Bytes::from("other.rdb")),
            ])
        );

        let response = registry
            .execute(&cmd(&["CONFIG", "SET", "maxmemory", "100mb"]))
            .await;
        assert_eq!(
            response,
            RespValue::error("ERR Unsupported CONFIG parameter: maxmemory")
        );
    }

    #[tokio::test]
    async fn test_keys_glob() {
        let registry = test_registry();

        for key in ["foo", "foobar", "baz"] {
            registry.execute(&cmd(&["SET", key, "1"])).await;
        }

        let response = registry.execute(&cmd(&["KEYS", "foo*"])).await;
        let mut names: Vec<String> = response
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap().to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec!["foo", "foobar"]);

        let response = registry.execute(&cmd(&["KEYS", "*"])).await;
        assert_eq!(response.as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_type() {
        let registry = test_registry();

        registry.execute(&cmd(&["SET", "s", "1"])).await;
        registry.execute(&cmd(&["XADD", "x", "1-1", "f", "v"])).await;

        assert_eq!(
            registry.execute(&cmd(&["TYPE", "s"])).await,
            RespValue::simple_string("string")
        );
        assert_eq!(
            registry.execute(&cmd(&["TYPE", "x"])).await,
            RespValue::simple_string("stream")
        );
        assert_eq!(
            registry.execute(&cmd(&["TYPE", "missing"])).await,
            RespValue::simple_string("none")
        );
    }

    #[tokio::test]
    async fn test_info_master() {
        let registry = test_registry();

        let response = registry.execute(&cmd(&["INFO", "replication"])).await;
        let body = response.as_str().unwrap();

        assert!(body.contains("# Replication"));
        assert!(body.contains("role:master"));
        assert!(body.contains("master_replid:8371b4fb1155b71f4a04d3e1bc3e18c4a990aeeb"));
        assert!(body.contains("master_repl_offset:0"));
    }

    #[tokio::test]
    async fn test_info_replica() {
        let registry = registry_with(ServerHandle::new_replica());

        let response = registry.execute(&cmd(&["INFO"])).await;
        let body = response.as_str().unwrap();
        assert!(body.contains("role:slave"));
    }

    #[tokio::test]
    async fn test_info_unknown_section_is_empty() {
        let registry = test_registry();

        let response = registry.execute(&cmd(&["INFO", "cpu"])).await;
        assert_eq!(response, RespValue::bulk_string(Bytes::new()));
    }
}
