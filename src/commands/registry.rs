//! Command Registry and Dispatch
//!
//! The registry maps case-insensitive command names to their arity bounds
//! and handlers. Dispatch validates the request shape, checks the argument
//! count against `[min_args, max_args]` (an unset maximum means unbounded),
//! and invokes the handler with the shared [`Context`].
//!
//! Only `WAIT` ever suspends, but dispatch is async so it can; every other
//! handler completes without yielding.

use crate::commands::{replication, server, stream, string};
use crate::config::ServerConfig;
use crate::protocol::RespValue;
use crate::replication::ServerHandle;
use crate::storage::StorageEngine;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;

/// Shared resources available to every command handler.
///
/// The `server` field is the replication capability surface, not a pointer
/// back to the connection server; handlers that need the replica set or the
/// WAIT barrier reach it through here.
#[derive(Clone)]
pub struct Context {
    pub storage: Arc<StorageEngine>,
    pub config: Arc<ServerConfig>,
    pub server: ServerHandle,
}

/// Identifies which handler a registry entry dispatches to.
#[derive(Debug, Clone, Copy)]
enum CommandKind {
    Ping,
    Echo,
    Set,
    Get,
    Config,
    Keys,
    Type,
    Info,
    Xadd,
    Replconf,
    Psync,
    Wait,
}

/// Arity bounds plus the handler for one command.
#[derive(Debug, Clone, Copy)]
struct CommandSpec {
    kind: CommandKind,
    min_args: usize,
    /// `None` means unbounded
    max_args: Option<usize>,
}

/// The command registry.
pub struct Registry {
    commands: HashMap<String, CommandSpec>,
    context: Context,
}

impl Registry {
    /// Builds a registry with the full command set registered.
    pub fn new(context: Context) -> Self {
        let mut registry = Self {
            commands: HashMap::new(),
            context,
        };

        registry.register("PING", CommandKind::Ping, 0, Some(1));
        registry.register("ECHO", CommandKind::Echo, 1, Some(1));
        registry.register("SET", CommandKind::Set, 2, None);
        registry.register("GET", CommandKind::Get, 1, Some(1));
        registry.register("CONFIG", CommandKind::Config, 1, Some(3));
        registry.register("KEYS", CommandKind::Keys, 1, Some(1));
        registry.register("TYPE", CommandKind::Type, 1, Some(1));
        registry.register("INFO", CommandKind::Info, 0, Some(1));
        registry.register("XADD", CommandKind::Xadd, 4, None);
        registry.register("REPLCONF", CommandKind::Replconf, 2, None);
        registry.register("PSYNC", CommandKind::Psync, 2, Some(2));
        registry.register("WAIT", CommandKind::Wait, 2, Some(2));

        registry
    }

    /// Registers one command under its uppercase name.
    fn register(&mut self, name: &str, kind: CommandKind, min_args: usize, max_args: Option<usize>) {
        self.commands.insert(
            name.to_uppercase(),
            CommandSpec {
                kind,
                min_args,
                max_args,
            },
        );
    }

    /// The shared handler context.
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Dispatches a request frame and returns the reply frame.
    ///
    /// Never fails: every problem is reported as an error frame so the
    /// connection can carry on.
    pub async fn execute(&self, frame: &RespValue) -> RespValue {
        let Some(items) = frame.as_array() else {
            return RespValue::error("ERR invalid command format");
        };

        let Some(name) = items.first().and_then(RespValue::as_str) else {
            return RespValue::error("ERR invalid command format");
        };

        let upper = name.to_uppercase();
        let Some(spec) = self.commands.get(&upper) else {
            return RespValue::error(format!("ERR unknown command '{}'", name));
        };

        let args = &items[1..];
        if args.len() < spec.min_args || spec.max_args.is_some_and(|max| args.len() > max) {
            return RespValue::error(format!(
                "ERR wrong number of arguments for '{}' command",
                upper.to_lowercase()
            ));
        }

        trace!(command = %upper, args = args.len(), "Dispatching command");

        let ctx = &self.context;
        match spec.kind {
            CommandKind::Ping => server::ping(args),
            CommandKind::Echo => server::echo(args),
            CommandKind::Set => string::set(ctx, args),
            CommandKind::Get => string::get(ctx, args),
            CommandKind::Config => server::config(ctx, args),
            CommandKind::Keys => server::keys(ctx, args),
            CommandKind::Type => server::key_type(ctx, args),
            CommandKind::Info => server::info(ctx, args),
            CommandKind::Xadd => stream::xadd(ctx, args),
            CommandKind::Replconf => replication::replconf(args),
            CommandKind::Psync => replication::psync(ctx, args),
            CommandKind::Wait => replication::wait(ctx, args).await,
        }
    }
}
