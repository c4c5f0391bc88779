//! tokio / tokio-tungstenite side of a connection.
//!
//! The request head is read here rather than by tungstenite so that a
//! rejected upgrade can be answered by simply dropping the socket, and so
//! the approved target can be written back into the head before tungstenite
//! sees it.

use bytes::{Buf, Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::{tungstenite, WebSocketStream};
use tracing::debug;

use crate::connection::{Connection, Outbound, SendError};
use crate::handshake::Decision;
use crate::http_request::{self, RequestError, RequestLine, MAX_HEAD_SIZE};
use crate::lifecycle::SessionManager;
use crate::websocket::{Dispatch, Frame};

/// Largest frame and message payload accepted from a client.
pub const MAX_PAYLOAD_SIZE: usize = 65536;

#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("request head exceeds {} bytes", MAX_HEAD_SIZE)]
    HeadTooLarge,
    #[error("connection closed during handshake")]
    UnexpectedEof,
    #[error("handshake timed out")]
    HandshakeTimeout,
    #[error("malformed request line: {0}")]
    Request(#[from] RequestError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    WebSocket(#[from] tungstenite::Error),
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct ConnectionSettings {
    pub handshake_timeout: Duration,
}

#[derive(Debug)]
enum Command {
    Write(Frame),
    Close,
}

/// [`Outbound`] backed by the connection task's command queue.
struct ChannelOutbound {
    tx: mpsc::UnboundedSender<Command>,
}

impl Outbound for ChannelOutbound {
    fn write_frame(&self, frame: Frame) -> Result<(), SendError> {
        self.tx
            .send(Command::Write(frame))
            .map_err(|_| SendError::Closed)
    }

    fn close(&self) {
        // the task may already be gone, which is the goal anyway
        let _ = self.tx.send(Command::Close);
    }
}

/// Serves one accepted socket from accept to disconnect. Always reports
/// exactly one disconnect.
pub(crate) async fn serve_connection(
    sessions: Arc<SessionManager>,
    stream: TcpStream,
    peer: SocketAddr,
    settings: ConnectionSettings,
    mut shutdown: watch::Receiver<bool>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let connection = sessions.on_connect(Arc::new(ChannelOutbound { tx }));
    debug!(connection = %connection.id(), %peer, "accepted socket");

    if let Err(e) = run(&sessions, &connection, stream, settings, &mut rx, &mut shutdown).await {
        debug!(connection = %connection.id(), error = %e, "connection ended with error");
    }

    sessions.on_disconnect(&connection);
}

async fn run(
    sessions: &SessionManager,
    connection: &Connection,
    stream: TcpStream,
    settings: ConnectionSettings,
    rx: &mut mpsc::UnboundedReceiver<Command>,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<(), ConnectionError> {
    let upgraded = tokio::select! {
        result = tokio::time::timeout(settings.handshake_timeout, upgrade(sessions, connection, stream)) => {
            result.map_err(|_| ConnectionError::HandshakeTimeout)??
        },
        _ = shutdown.changed() => return Ok(()),
    };
    let ws = match upgraded {
        Some(ws) => ws,
        // rejected: dropping the socket is the whole answer
        None => return Ok(()),
    };

    let (mut sink, mut stream) = ws.split();
    loop {
        tokio::select! {
            biased;

            command = rx.recv() => match command {
                Some(Command::Write(frame)) => sink.send(frame.into()).await?,
                Some(Command::Close) | None => {
                    if let Err(e) = sink.close().await {
                        debug!(connection = %connection.id(), error = %e, "close handshake incomplete");
                    }
                    return Ok(());
                }
            },
            message = stream.next() => match message {
                Some(Ok(message)) => {
                    if let Dispatch::Forwarded(frame) = sessions.on_frame(connection, Frame::from(message)) {
                        debug!(
                            connection = %connection.id(),
                            kind = frame.kind(),
                            "frame left to protocol layer"
                        );
                    }
                }
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(()),
            },
            _ = shutdown.changed() => {
                connection.request_close();
            }
        }
    }
}

/// Reads the request head, asks for a decision and completes the upgrade
/// when approved. `None` means the upgrade was rejected.
async fn upgrade(
    sessions: &SessionManager,
    connection: &Connection,
    mut stream: TcpStream,
) -> Result<Option<WebSocketStream<Rewind<TcpStream>>>, ConnectionError> {
    let head = read_head(&mut stream).await?;
    let line = RequestLine::parse(&head)?;

    match sessions.on_upgrade_request(connection, &line.target) {
        Decision::Rejected => Ok(None),
        Decision::Approved(target) => {
            let head = http_request::rewrite_target(&head, &line, &target);
            let stream = Rewind::new(head.freeze(), stream);
            let ws =
                tokio_tungstenite::accept_async_with_config(stream, Some(protocol_config())).await?;
            Ok(Some(ws))
        }
    }
}

fn protocol_config() -> WebSocketConfig {
    let mut config = WebSocketConfig::default();
    config.max_frame_size = Some(MAX_PAYLOAD_SIZE);
    config.max_message_size = Some(MAX_PAYLOAD_SIZE);
    config
}

/// Reads until the buffer holds a complete request head of at most
/// [`MAX_HEAD_SIZE`] bytes. Bytes past the head stay in the buffer.
async fn read_head<S: AsyncRead + Unpin>(stream: &mut S) -> Result<BytesMut, ConnectionError> {
    let mut buf = BytesMut::with_capacity(1024);
    loop {
        match http_request::find_head_end(&buf) {
            Some(end) if end > MAX_HEAD_SIZE => return Err(ConnectionError::HeadTooLarge),
            Some(_) => return Ok(buf),
            // no terminator in MAX_HEAD_SIZE bytes, so the head can only end past the limit
            None if buf.len() >= MAX_HEAD_SIZE => return Err(ConnectionError::HeadTooLarge),
            None => {}
        }
        if stream.read_buf(&mut buf).await? == 0 {
            return Err(ConnectionError::UnexpectedEof);
        }
    }
}

/// A stream that yields `prefix` before reading from `inner`.
pub(crate) struct Rewind<S> {
    prefix: Bytes,
    inner: S,
}

impl<S> Rewind<S> {
    pub(crate) fn new(prefix: Bytes, inner: S) -> Self {
        Self { prefix, inner }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for Rewind<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if !this.prefix.is_empty() {
            let n = this.prefix.len().min(buf.remaining());
            buf.put_slice(&this.prefix[..n]);
            this.prefix.advance(n);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for Rewind<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
