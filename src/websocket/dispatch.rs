use tracing::{debug, info, trace};

use super::frame::Frame;
use super::handlers::{CloseHandler, EchoProcessor, HeartbeatResponder};
use crate::connection::Connection;

/// What happened to an inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// A handler queued a response.
    Replied,
    /// The close handler ran; the session is now closing.
    Closing,
    /// The session was not open, so the frame was dropped.
    Discarded,
    /// Not handled here; the protocol layer's default handling applies.
    Forwarded(Frame),
}

/// Routes one inbound frame to its handler. Only an OPEN session dispatches.
pub fn dispatch(connection: &Connection, frame: Frame) -> Dispatch {
    if !connection.state_cell().is_open() {
        trace!(
            connection = %connection.id(),
            state = ?connection.state(),
            kind = frame.kind(),
            "discarding frame"
        );
        return Dispatch::Discarded;
    }

    match frame {
        Frame::Ping(payload) => reply(connection, HeartbeatResponder::respond(payload)),
        Frame::Text(content) => {
            info!(connection = %connection.id(), text = %content, "text message");
            reply(connection, EchoProcessor::process(&content))
        }
        Frame::Close(reason) => {
            CloseHandler::handle(connection, reason);
            Dispatch::Closing
        }
        frame @ (Frame::Binary(_) | Frame::Pong(_) | Frame::Continuation(_)) => {
            Dispatch::Forwarded(frame)
        }
    }
}

fn reply(connection: &Connection, frame: Frame) -> Dispatch {
    if let Err(e) = connection.send(frame) {
        debug!(connection = %connection.id(), error = %e, "response dropped");
    }
    Dispatch::Replied
}
