//! Per-connection event handling: registry bookkeeping, handshake decisions
//! and frame dispatch.
//!
//! The transport reports `connect`, `upgrade request`, `frame` and
//! `disconnect` events for each connection, in that order and from one task
//! per connection. Removal from the registry happens only on disconnect, so
//! every close path (peer close frame, rejected handshake, errors, shutdown)
//! ends in exactly one removal.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::connection::{Connection, ConnectionState, Outbound};
use crate::handshake::{self, Decision, HandshakeRequest};
use crate::registry::Registry;
use crate::websocket::{self, Dispatch, Frame};

pub struct SessionManager {
    path: String,
    registry: Arc<Registry>,
}

impl SessionManager {
    pub fn new(path: impl Into<String>, registry: Arc<Registry>) -> Self {
        Self {
            path: path.into(),
            registry,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// A new connection was accepted. It is tracked from this point on, so a
    /// disconnect during the handshake is still cleaned up.
    pub fn on_connect(&self, outbound: Arc<dyn Outbound>) -> Arc<Connection> {
        let connection = Arc::new(Connection::new(outbound));
        self.registry.insert(connection.id());
        debug!(connection = %connection.id(), "client connected");
        connection
    }

    /// The client asked to upgrade to `raw_target`. On approval the session
    /// is OPEN; on rejection termination has been requested and the caller
    /// must not send any upgrade response.
    pub fn on_upgrade_request(&self, connection: &Connection, raw_target: &str) -> Decision {
        let request = HandshakeRequest::new(raw_target);
        debug!(
            connection = %connection.id(),
            params = ?request.params(),
            "handshake parameters"
        );

        match handshake::validate(&request, &self.path) {
            Decision::Approved(target) => {
                if !connection
                    .state_cell()
                    .transition(ConnectionState::Connecting, ConnectionState::Open)
                {
                    debug!(
                        connection = %connection.id(),
                        state = ?connection.state(),
                        "handshake arrived after close was requested"
                    );
                    return Decision::Rejected;
                }
                info!(
                    connection = %connection.id(),
                    target = %request.target(),
                    rewritten = %target,
                    "handshake accepted"
                );
                connection.set_target(target.clone());
                Decision::Approved(target)
            }
            Decision::Rejected => {
                warn!(
                    connection = %connection.id(),
                    target = %request.target(),
                    path = %self.path,
                    "handshake rejected"
                );
                connection.request_close();
                Decision::Rejected
            }
        }
    }

    pub fn on_frame(&self, connection: &Connection, frame: Frame) -> Dispatch {
        websocket::dispatch(connection, frame)
    }

    /// The transport connection is gone, for whatever reason.
    pub fn on_disconnect(&self, connection: &Connection) {
        let previous = connection.state_cell().close();
        let removed = self.registry.remove(connection.id());
        debug!(
            connection = %connection.id(),
            previous = ?previous,
            removed,
            "client disconnected"
        );
    }
}
