//! Server Configuration
//!
//! Holds the options the rest of the server reads: the snapshot location
//! (`dir` + `dbfilename`), the listen port, and the optional master address
//! that turns this instance into a replica.
//!
//! Only `dir` and `dbfilename` are reachable through `CONFIG GET`/`CONFIG SET`
//! at runtime; they sit behind an `RwLock` for that reason. `port` and
//! `replicaof` are fixed once the server has started.

use std::sync::RwLock;

/// Default directory for the snapshot file
pub const DEFAULT_DIR: &str = ".";

/// Default snapshot filename
pub const DEFAULT_DBFILENAME: &str = "dump.rdb";

/// Default TCP port (same as Redis)
pub const DEFAULT_PORT: u16 = 6379;

/// Runtime configuration for one server instance.
#[derive(Debug)]
pub struct ServerConfig {
    /// Directory where the snapshot file lives (mutable via CONFIG SET)
    dir: RwLock<String>,
    /// Snapshot filename (mutable via CONFIG SET)
    dbfilename: RwLock<String>,
    /// TCP port to listen on
    pub port: u16,
    /// Master to replicate from, if this instance is a replica
    replicaof: Option<(String, u16)>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(
            DEFAULT_DIR.to_string(),
            DEFAULT_DBFILENAME.to_string(),
            DEFAULT_PORT,
            None,
        )
    }
}

impl ServerConfig {
    /// Creates a configuration from already-parsed values.
    pub fn new(dir: String, dbfilename: String, port: u16, replicaof: Option<(String, u16)>) -> Self {
        Self {
            dir: RwLock::new(dir),
            dbfilename: RwLock::new(dbfilename),
            port,
            replicaof,
        }
    }

    /// Returns the current snapshot directory.
    pub fn dir(&self) -> String {
        self.dir.read().unwrap().clone()
    }

    /// Returns the current snapshot filename.
    pub fn dbfilename(&self) -> String {
        self.dbfilename.read().unwrap().clone()
    }

    /// Looks up a configuration parameter by name.
    ///
    /// Only `dir` and `dbfilename` are exposed; anything else returns `None`.
    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "dir" => Some(self.dir()),
            "dbfilename" => Some(self.dbfilename()),
            _ => None,
        }
    }

    /// Updates a configuration parameter by name.
    ///
    /// Returns `false` for parameters that are not runtime-mutable.
    pub fn set(&self, key: &str, value: String) -> bool {
        match key {
            "dir" => {
                *self.dir.write().unwrap() = value;
                true
            }
            "dbfilename" => {
                *self.dbfilename.write().unwrap() = value;
                true
            }
            _ => false,
        }
    }

    /// Returns true if this instance is configured as a replica.
    pub fn is_replica(&self) -> bool {
        self.replicaof.is_some()
    }

    /// Returns the master's address if this instance is a replica.
    pub fn master_addr(&self) -> Option<(&str, u16)> {
        self.replicaof.as_ref().map(|(h, p)| (h.as_str(), *p))
    }
}

/// Parses a `--replicaof` flag value of the form `"<host> <port>"`.
pub fn parse_replicaof(value: &str) -> Option<(String, u16)> {
    let mut parts = value.split_whitespace();
    let host = parts.next()?;
    let port: u16 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((host.to_string(), port))
}
