//! EmberKV - A Replicating In-Memory Key-Value Store
//!
//! This is the main entry point for the EmberKV server. It parses the
//! command-line flags, loads the snapshot file if one exists, binds the TCP
//! listener, and wires the shutdown signal through every long-running task.

use emberkv::commands::{Context, Registry};
use emberkv::config::{parse_replicaof, ServerConfig, DEFAULT_DBFILENAME, DEFAULT_DIR, DEFAULT_PORT};
use emberkv::connection::handle_client;
use emberkv::replication::{ReplicaClient, ServerHandle};
use emberkv::storage::{start_expiry_purger, StorageEngine};
use emberkv::{snapshot, VERSION};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Parses configuration from command-line arguments.
///
/// Flags: `--dir <path>`, `--dbfilename <name>`, `--port <int>`,
/// `--replicaof "<host> <port>"`.
fn config_from_args() -> ServerConfig {
    let args: Vec<String> = std::env::args().collect();

    let mut dir = DEFAULT_DIR.to_string();
    let mut dbfilename = DEFAULT_DBFILENAME.to_string();
    let mut port = DEFAULT_PORT;
    let mut replicaof = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--dir" => {
                if i + 1 >= args.len() {
                    eprintln!("Error: --dir requires a value");
                    std::process::exit(1);
                }
                dir = args[i + 1].clone();
                i += 2;
            }
            "--dbfilename" => {
                if i + 1 >= args.len() {
                    eprintln!("Error: --dbfilename requires a value");
                    std::process::exit(1);
                }
                dbfilename = args[i + 1].clone();
                i += 2;
            }
            "--port" => {
                if i + 1 >= args.len() {
                    eprintln!("Error: --port requires a value");
                    std::process::exit(1);
                }
                port = args[i + 1].parse().unwrap_or_else(|_| {
                    eprintln!("Error: invalid port number");
                    std::process::exit(1);
                });
                i += 2;
            }
            "--replicaof" => {
                if i + 1 >= args.len() {
                    eprintln!("Error: --replicaof requires a value");
                    std::process::exit(1);
                }
                replicaof = Some(parse_replicaof(&args[i + 1]).unwrap_or_else(|| {
                    eprintln!("Error: --replicaof expects \"<host> <port>\"");
                    std::process::exit(1);
                }));
                i += 2;
            }
            "--help" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-v" => {
                println!("EmberKV version {}", VERSION);
                std::process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {}", other);
                print_help();
                std::process::exit(1);
            }
        }
    }

    ServerConfig::new(dir, dbfilename, port, replicaof)
}

fn print_help() {
    println!(
        r#"
EmberKV - A Replicating In-Memory Key-Value Store

USAGE:
    emberkv [OPTIONS]

OPTIONS:
        --dir <PATH>             Directory holding the snapshot file (default: .)
        --dbfilename <NAME>      Snapshot filename (default: dump.rdb)
        --port <PORT>            Port to listen on (default: 6379)
        --replicaof "<H> <P>"    Replicate from the master at host H, port P
    -v, --version                Print version information
        --help                   Print this help message

EXAMPLES:
    emberkv                                  # Start a master on port 6379
    emberkv --port 6380                      # Start on port 6380
    emberkv --port 6380 --replicaof "127.0.0.1 6379"
                                             # Start as a replica

CONNECTING:
    Use redis-cli or any Redis client:
    $ redis-cli -p 6379
    127.0.0.1:6379> PING
    PONG
"#
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Arc::new(config_from_args());

    let _subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    info!(version = VERSION, port = config.port, "EmberKV starting");

    // Storage first; the snapshot loader populates it before the listener
    // accepts anything
    let storage = Arc::new(StorageEngine::new());
    match snapshot::load_file(&config.dir(), &config.dbfilename(), &storage) {
        Ok(0) => {}
        Ok(keys) => info!(keys, "Snapshot loaded"),
        // A damaged snapshot must not take the server down
        Err(e) => warn!(error = %e, "Failed to load snapshot, continuing with empty storage"),
    }

    let _purger = start_expiry_purger(Arc::clone(&storage));

    let server = if config.is_replica() {
        ServerHandle::new_replica()
    } else {
        ServerHandle::new_master()
    };

    let registry = Arc::new(Registry::new(Context {
        storage,
        config: Arc::clone(&config),
        server,
    }));

    // Exit code 1 on bind failure, per the CLI contract
    let bind_addr = format!("0.0.0.0:{}", config.port);
    let listener = match TcpListener::bind(&bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(addr = %bind_addr, error = %e, "Failed to bind");
            std::process::exit(1);
        }
    };
    info!(addr = %bind_addr, "Listening");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // A replica starts its outbound replication session alongside serving
    if let Some((host, port)) = config.master_addr() {
        let client = ReplicaClient::new(host, port, config.port);
        tokio::spawn(client.run(Arc::clone(&registry), shutdown_rx.clone()));
    }

    tokio::select! {
        _ = accept_loop(listener, registry, shutdown_rx) => {}
        result = signal::ctrl_c() => {
            if let Err(e) = result {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutdown signal received, stopping server");
        }
    }

    // Every loop observes this and winds down after its current frame
    let _ = shutdown_tx.send(true);

    info!("Server shutdown complete");
    Ok(())
}

/// Accepts connections and spawns one handler task per client.
async fn accept_loop(
    listener: TcpListener,
    registry: Arc<Registry>,
    shutdown: watch::Receiver<bool>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                tokio::spawn(handle_client(
                    stream,
                    addr,
                    Arc::clone(&registry),
                    shutdown.clone(),
                ));
            }
            Err(e) => {
                error!(error = %e, "Failed to accept connection");
            }
        }
    }
}
