//! Shared helpers for the endpoint integration tests.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use websocket_endpoint::{ServerConfig, ServerHandle, WebSocketServer};

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Starts a server on an ephemeral loopback port.
pub async fn start_server(path: &str) -> ServerHandle {
    let mut config = ServerConfig::new(path);
    config.host = IpAddr::V4(Ipv4Addr::LOCALHOST);
    config.port = 0;
    config.handshake_timeout_secs = 2;
    WebSocketServer::start(config).await.expect("server starts")
}

pub fn ws_url(server: &ServerHandle, target: &str) -> String {
    format!("ws://{}{}", server.local_addr(), target)
}

pub async fn connect(server: &ServerHandle, target: &str) -> Client {
    let (ws, response) = connect_async(ws_url(server, target))
        .await
        .expect("handshake succeeds");
    assert_eq!(response.status().as_u16(), 101);
    ws
}

/// Polls until the server tracks exactly `expected` sessions.
pub async fn wait_for_live(server: &ServerHandle, expected: usize) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if server.live_connections() == expected {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    server.live_connections() == expected
}
