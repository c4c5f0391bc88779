mod dispatch;
mod frame;
mod handlers;

pub use dispatch::{dispatch, Dispatch};
pub use frame::{CloseReason, Frame};
pub use handlers::{CloseHandler, EchoProcessor, HeartbeatResponder};

// https://datatracker.ietf.org/doc/html/rfc6455
