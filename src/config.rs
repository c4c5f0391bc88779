use clap::Parser;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::registry::DEFAULT_SHARDS;
use crate::ServerError;

pub const DEFAULT_PATH: &str = "/ws";
pub const DEFAULT_PORT: u16 = 8080;

/// Startup configuration. Every option can also be set through a
/// `WS_ENDPOINT_*` environment variable.
#[derive(Parser, Debug, Clone)]
#[command(name = "server", version, about = "WebSocket echo endpoint")]
pub struct ServerConfig {
    /// Address to listen on
    #[arg(long, env = "WS_ENDPOINT_HOST", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub host: IpAddr,

    /// Port to listen on
    #[arg(short, long, env = "WS_ENDPOINT_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// The only request path that may be upgraded
    #[arg(long, env = "WS_ENDPOINT_PATH", default_value = DEFAULT_PATH)]
    pub path: String,

    /// Number of accept loops
    #[arg(long, env = "WS_ENDPOINT_ACCEPTOR_THREADS", default_value_t = 1)]
    pub acceptor_threads: usize,

    /// Runtime worker threads (defaults to the number of cores)
    #[arg(long, env = "WS_ENDPOINT_WORKER_THREADS")]
    pub worker_threads: Option<usize>,

    /// Seconds a client has to complete the upgrade request
    #[arg(long, env = "WS_ENDPOINT_HANDSHAKE_TIMEOUT", default_value_t = 10)]
    pub handshake_timeout_secs: u64,

    /// Number of shards in the connection registry
    #[arg(long, env = "WS_ENDPOINT_REGISTRY_SHARDS", default_value_t = DEFAULT_SHARDS)]
    pub registry_shards: usize,

    /// tracing filter directive
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_filter: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig::new(DEFAULT_PATH)
    }
}

impl ServerConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            path: path.into(),
            acceptor_threads: 1,
            worker_threads: None,
            handshake_timeout_secs: 10,
            registry_shards: DEFAULT_SHARDS,
            log_filter: "info".to_string(),
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), ServerError> {
        if !self.path.starts_with('/') {
            return Err(ServerError::Config(format!(
                "path must start with '/', got {:?}",
                self.path
            )));
        }
        if self.acceptor_threads == 0 {
            return Err(ServerError::Config(
                "acceptor_threads must be at least 1".to_string(),
            ));
        }
        if self.worker_threads == Some(0) {
            return Err(ServerError::Config(
                "worker_threads must be at least 1".to_string(),
            ));
        }
        if self.registry_shards == 0 {
            return Err(ServerError::Config(
                "registry_shards must be at least 1".to_string(),
            ));
        }
        if self.handshake_timeout_secs == 0 {
            return Err(ServerError::Config(
                "handshake_timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
