use std::net::SocketAddr;

use envconfig::Envconfig;
use tracing::Level;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(default = "127.0.0.1:3000")]
    pub address: SocketAddr,

    // Required unless the in-memory store is selected.
    pub database_url: Option<String>,

    #[envconfig(default = "10")]
    pub max_pg_connections: u32,

    #[envconfig(default = "true")]
    pub run_migrations: bool,

    /// Volatile store for local development; data dies with the process.
    #[envconfig(default = "false")]
    pub use_memory_store: bool,

    /// Upper bound on re-reads when a reconcile write loses a race.
    #[envconfig(default = "3")]
    pub reconcile_max_attempts: u32,

    // Used for integration tests
    #[envconfig(default = "true")]
    pub export_prometheus: bool,

    #[envconfig(default = "info")]
    pub log_level: Level,
}
