use socket2::{Domain, Socket, Type};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::runtime;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub mod config;
pub mod connection;
pub mod handshake;
pub mod http_request;
pub mod lifecycle;
pub mod registry;
pub mod tokens;
mod transport;
pub mod websocket;

pub use config::ServerConfig;
pub use connection::{Connection, ConnectionId, ConnectionState};
pub use handshake::{Decision, HandshakeRequest};
pub use lifecycle::SessionManager;
pub use registry::Registry;
pub use transport::ConnectionError;

// pending connections the kernel queues before accept
const LISTEN_BACKLOG: i32 = 1024;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("couldn't bind {address}: {source}")]
    Bind {
        address: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub struct WebSocketServer;

/// A running server. Dropping it without calling [`ServerHandle::stop`]
/// also stops accepting and closes live sessions, but does not wait for them.
pub struct ServerHandle {
    local_addr: SocketAddr,
    sessions: Arc<SessionManager>,
    shutdown: watch::Sender<bool>,
    acceptors: Vec<JoinHandle<()>>,
    drain_tx: mpsc::Sender<()>,
    drain_rx: mpsc::Receiver<()>,
}

impl WebSocketServer {
    /// Binds the listener and starts accepting connections on the current runtime.
    pub async fn start(config: ServerConfig) -> Result<ServerHandle, ServerError> {
        config.validate()?;

        let address = config.socket_addr();
        let listener = bind(address).map_err(|source| ServerError::Bind { address, source })?;
        let listener = Arc::new(listener);
        let local_addr = listener.local_addr()?;

        let registry = Arc::new(Registry::with_shards(config.registry_shards));
        let sessions = Arc::new(SessionManager::new(config.path.clone(), registry));
        let settings = transport::ConnectionSettings {
            handshake_timeout: config.handshake_timeout(),
        };

        let (shutdown, shutdown_rx) = watch::channel(false);
        // every connection task holds a sender; stop() waits for all of them to drop
        let (drain_tx, drain_rx) = mpsc::channel(1);

        let acceptors = (0..config.acceptor_threads)
            .map(|_| {
                tokio::spawn(accept_loop(
                    listener.clone(),
                    sessions.clone(),
                    settings,
                    shutdown_rx.clone(),
                    drain_tx.clone(),
                ))
            })
            .collect();

        info!(
            address = %local_addr,
            path = %config.path,
            acceptors = config.acceptor_threads,
            "websocket endpoint listening"
        );

        Ok(ServerHandle {
            local_addr,
            sessions,
            shutdown,
            acceptors,
            drain_tx,
            drain_rx,
        })
    }

    /// Runs the server on its own runtime until Ctrl-C.
    pub fn run_blocking(config: ServerConfig) -> anyhow::Result<()> {
        let mut builder = runtime::Builder::new_multi_thread();
        builder.enable_all();
        if let Some(workers) = config.worker_threads {
            builder.worker_threads(workers);
        }
        let rt = builder.build()?;

        rt.block_on(async move {
            let server = WebSocketServer::start(config).await?;
            tokio::signal::ctrl_c().await?;
            info!("shutting down");
            server.stop().await;
            Ok::<(), anyhow::Error>(())
        })
    }
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn registry(&self) -> &Arc<Registry> {
        self.sessions.registry()
    }

    /// Number of sessions accepted and not yet disconnected.
    pub fn live_connections(&self) -> usize {
        self.registry().len()
    }

    /// Stops accepting, closes every session and waits until all of them
    /// have disconnected.
    pub async fn stop(self) {
        let ServerHandle {
            shutdown,
            acceptors,
            drain_tx,
            mut drain_rx,
            ..
        } = self;

        let _ = shutdown.send(true);
        for acceptor in acceptors {
            let _ = acceptor.await;
        }

        drop(drain_tx);
        // resolves with None once every connection task is gone
        let _ = drain_rx.recv().await;
        info!("websocket endpoint stopped");
    }
}

fn bind(address: SocketAddr) -> std::io::Result<TcpListener> {
    // Protocol is None/0 since tcp is implied by Type::STREAM
    let socket = Socket::new(Domain::for_address(address), Type::STREAM, None)?;

    // Enable processing of both ipv6 and ipv4 packets
    if address.is_ipv6() {
        socket.set_only_v6(false)?;
    }
    socket.set_reuse_address(true)?;

    // tokio requires the socket to be non-blocking
    socket.set_nonblocking(true)?;

    socket.bind(&address.into())?;
    socket.listen(LISTEN_BACKLOG)?;

    TcpListener::from_std(socket.into())
}

async fn accept_loop(
    listener: Arc<TcpListener>,
    sessions: Arc<SessionManager>,
    settings: transport::ConnectionSettings,
    mut shutdown: watch::Receiver<bool>,
    drain: mpsc::Sender<()>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((socket, peer)) => {
                    // Spawn a new non-blocking, multithreaded task for each connection.
                    // The task is the connection's only execution lane.
                    let sessions = sessions.clone();
                    let shutdown = shutdown.clone();
                    let drain = drain.clone();
                    tokio::spawn(async move {
                        transport::serve_connection(sessions, socket, peer, settings, shutdown).await;
                        drop(drain);
                    });
                }
                Err(e) => {
                    warn!(error = %e, "couldn't get client");
                    // usually fd exhaustion; give sessions a moment to release some
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            },
            _ = shutdown.changed() => break,
        }
    }
}
