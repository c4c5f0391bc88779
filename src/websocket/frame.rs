use bytes::Bytes;
use std::borrow::Cow;
use tokio_tungstenite::tungstenite::protocol::{frame::coding::CloseCode, CloseFrame};
use tokio_tungstenite::tungstenite::Message;

/// A decoded WebSocket frame as seen by the session handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
    Ping(Bytes),
    Pong(Bytes),
    Close(Option<CloseReason>),
    /// A raw frame the protocol layer did not assemble into a message.
    Continuation(Bytes),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    pub code: u16,
    pub reason: String,
}

impl Frame {
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Text(_) => "text",
            Frame::Binary(_) => "binary",
            Frame::Ping(_) => "ping",
            Frame::Pong(_) => "pong",
            Frame::Close(_) => "close",
            Frame::Continuation(_) => "continuation",
        }
    }
}

impl From<Message> for Frame {
    fn from(message: Message) -> Self {
        match message {
            Message::Text(text) => Frame::Text(text),
            Message::Binary(data) => Frame::Binary(Bytes::from(data)),
            Message::Ping(data) => Frame::Ping(Bytes::from(data)),
            Message::Pong(data) => Frame::Pong(Bytes::from(data)),
            Message::Close(close) => Frame::Close(close.map(|close| CloseReason {
                code: u16::from(close.code),
                reason: close.reason.into_owned(),
            })),
            Message::Frame(frame) => Frame::Continuation(Bytes::from(frame.payload().to_vec())),
        }
    }
}

impl From<Frame> for Message {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::Text(text) => Message::Text(text),
            Frame::Binary(data) => Message::Binary(data.to_vec()),
            Frame::Ping(data) => Message::Ping(data.to_vec()),
            Frame::Pong(data) => Message::Pong(data.to_vec()),
            Frame::Close(reason) => Message::Close(reason.map(|reason| CloseFrame {
                code: CloseCode::from(reason.code),
                reason: Cow::Owned(reason.reason),
            })),
            // continuation payloads are written as a complete binary message
            Frame::Continuation(data) => Message::Binary(data.to_vec()),
        }
    }
}
