use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use thiserror::Error;

use crate::websocket::Frame;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-wide unique identity of an accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Mints the next identity. Never returns the same value twice.
    pub fn next() -> Self {
        ConnectionId(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Session state. Transitions only move forward.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Open,
            2 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }
}

/// Lock-free holder for a [`ConnectionState`].
#[derive(Debug)]
pub struct AtomicConnectionState(AtomicU8);

impl AtomicConnectionState {
    pub fn new(state: ConnectionState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    #[inline]
    pub fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Moves from `from` to `to`; fails if the current state is not `from`.
    pub fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Moves CONNECTING or OPEN to CLOSING. Returns true for the caller that
    /// made the move.
    pub fn begin_closing(&self) -> bool {
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < ConnectionState::Closing as u8).then_some(ConnectionState::Closing as u8)
            })
            .is_ok()
    }

    /// Moves to CLOSED from any state and returns the previous one.
    pub fn close(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.swap(ConnectionState::Closed as u8, Ordering::AcqRel))
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        self.get() == ConnectionState::Open
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SendError {
    #[error("connection is closed")]
    Closed,
}

/// Write side of a connection, provided by the transport.
///
/// Both calls must return immediately; the transport flushes queued frames
/// in the order they were written.
pub trait Outbound: Send + Sync + 'static {
    fn write_frame(&self, frame: Frame) -> Result<(), SendError>;

    /// Requests termination of the underlying connection. Frames written
    /// before this call are still delivered on a best-effort basis.
    fn close(&self);
}

/// One client session.
pub struct Connection {
    id: ConnectionId,
    state: AtomicConnectionState,
    target: Mutex<Option<String>>,
    outbound: Arc<dyn Outbound>,
}

impl Connection {
    pub fn new(outbound: Arc<dyn Outbound>) -> Self {
        Self {
            id: ConnectionId::next(),
            state: AtomicConnectionState::new(ConnectionState::Connecting),
            target: Mutex::new(None),
            outbound,
        }
    }

    #[inline]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    #[inline]
    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    pub(crate) fn state_cell(&self) -> &AtomicConnectionState {
        &self.state
    }

    /// Request target the upgrade proceeded with, once approved.
    pub fn target(&self) -> Option<String> {
        self.target.lock().clone()
    }

    pub(crate) fn set_target(&self, target: String) {
        *self.target.lock() = Some(target);
    }

    /// Queues a frame for this connection. Writing once the session is
    /// closing is a no-op reported as [`SendError::Closed`].
    pub fn send(&self, frame: Frame) -> Result<(), SendError> {
        if self.state.get() >= ConnectionState::Closing {
            return Err(SendError::Closed);
        }
        self.outbound.write_frame(frame)
    }

    /// Moves the session to CLOSING and asks the transport to terminate it.
    /// Only the first call reaches the transport.
    pub fn request_close(&self) -> bool {
        if self.state.begin_closing() {
            self.outbound.close();
            true
        } else {
            false
        }
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Connection {}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("state", &self.state.get())
            .finish()
    }
}

/// Records everything written to it, for tests.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct RecordingOutbound {
    pub frames: Mutex<Vec<Frame>>,
    pub close_requests: AtomicU64,
}

#[cfg(test)]
impl Outbound for RecordingOutbound {
    fn write_frame(&self, frame: Frame) -> Result<(), SendError> {
        self.frames.lock().push(frame);
        Ok(())
    }

    fn close(&self) {
        self.close_requests.fetch_add(1, Ordering::SeqCst);
    }
}
