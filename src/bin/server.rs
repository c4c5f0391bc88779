use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;
use websocket_endpoint::{ServerConfig, WebSocketServer};

fn main() -> Result<()> {
    let config = ServerConfig::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&config.log_filter)?)
        .init();

    WebSocketServer::run_blocking(config)
}
