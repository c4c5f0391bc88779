use bytes::Bytes;
use tracing::debug;

use super::frame::{CloseReason, Frame};
use crate::connection::Connection;

/// Answers keepalive pings.
pub struct HeartbeatResponder;

impl HeartbeatResponder {
    /// The pong carries the ping payload unchanged.
    pub fn respond(payload: Bytes) -> Frame {
        Frame::Pong(payload)
    }
}

/// Application behaviour of the endpoint: every text message comes back doubled.
pub struct EchoProcessor;

impl EchoProcessor {
    pub fn process(content: &str) -> Frame {
        Frame::Text(content.repeat(2))
    }
}

/// Reacts to a close frame from the peer.
pub struct CloseHandler;

impl CloseHandler {
    /// Requests termination of the connection. Nothing is written here; the
    /// protocol layer answers the close handshake itself, and registry removal
    /// follows from the disconnect that the termination produces.
    pub fn handle(connection: &Connection, reason: Option<CloseReason>) {
        match &reason {
            Some(reason) => debug!(
                connection = %connection.id(),
                code = reason.code,
                reason = %reason.reason,
                "peer requested close"
            ),
            None => debug!(connection = %connection.id(), "peer requested close"),
        }
        connection.request_close();
    }
}
