use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::tokens;

/// Largest request head accepted before the upgrade is abandoned.
pub const MAX_HEAD_SIZE: usize = 8192;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RequestError {
    #[error("invalid version")]
    Version,
    #[error("invalid newline")]
    NewLine,
    #[error("invalid token")]
    Token,
    #[error("invalid uri")]
    URI,
}

/// The first line of an HTTP/1.x request, e.g. `GET /ws?token=abc HTTP/1.1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    /// The request method, such as `GET`.
    pub method: String,
    /// The raw request target, such as `/ws?token=abc`.
    pub target: String,
    /// The minor HTTP version, `0` or `1`.
    pub version: u8,
}

impl RequestLine {
    pub fn parse(buf: &[u8]) -> Result<Self, RequestError> {
        let mut bytes = Bytes::copy_from_slice(buf);
        let method = RequestLine::parse_token(&mut bytes)?;
        let target = RequestLine::parse_uri(&mut bytes)?;
        let version = RequestLine::parse_version(&mut bytes)?;
        RequestLine::parse_new_line(&mut bytes)?;

        Ok(RequestLine {
            method,
            target,
            version,
        })
    }

    pub fn parse_new_line(bytes: &mut Bytes) -> Result<(), RequestError> {
        if !bytes.has_remaining() {
            return Err(RequestError::NewLine);
        }

        match bytes.get_u8() {
            b'\r' => {
                if bytes.has_remaining() && bytes.get_u8() == b'\n' {
                    Ok(())
                } else {
                    Err(RequestError::NewLine)
                }
            }
            b'\n' => Ok(()),
            _ => Err(RequestError::NewLine),
        }
    }

    pub fn parse_version(bytes: &mut Bytes) -> Result<u8, RequestError> {
        if bytes.len() < 8 {
            return Err(RequestError::Version);
        }

        let res = match &bytes[..8] {
            b"HTTP/1.0" => 0,
            b"HTTP/1.1" => 1,
            _ => return Err(RequestError::Version),
        };
        bytes.advance(8);
        Ok(res)
    }

    pub fn parse_uri(bytes: &mut Bytes) -> Result<String, RequestError> {
        for (i, b) in bytes.iter().enumerate() {
            if *b == b' ' {
                if i == 0 {
                    break;
                }
                let token = bytes.slice(0..i);
                bytes.advance(i + 1);
                return Ok(std::str::from_utf8(&token)
                    .map_err(|_| RequestError::URI)?
                    .to_string());
            } else if !tokens::is_uri_token(*b) {
                break;
            }
        }
        Err(RequestError::URI)
    }

    pub fn parse_token(bytes: &mut Bytes) -> Result<String, RequestError> {
        for (i, b) in bytes.iter().enumerate() {
            if *b == b' ' {
                if i == 0 {
                    break;
                }
                let token = bytes.slice(0..i);
                bytes.advance(i + 1);
                return Ok(std::str::from_utf8(&token)
                    .map_err(|_| RequestError::Token)?
                    .to_string());
            } else if !tokens::is_token(*b) {
                break;
            }
        }
        Err(RequestError::Token)
    }
}

/// Returns the length of the request head (terminator included) once the
/// buffer holds a complete one.
pub fn find_head_end(buf: &[u8]) -> Option<usize> {
    // bare `\n` line endings are tolerated, same as in the request line
    for (i, b) in buf.iter().enumerate() {
        if *b != b'\n' {
            continue;
        }
        match &buf[..i] {
            [.., b'\n'] => return Some(i + 1),
            [.., b'\n', b'\r'] => return Some(i + 1),
            _ => {}
        }
    }
    None
}

/// Copies `head` with the request line's target replaced by `target`.
pub fn rewrite_target(head: &[u8], line: &RequestLine, target: &str) -> BytesMut {
    let start = line.method.len() + 1;
    let end = start + line.target.len();

    let mut rewritten = BytesMut::with_capacity(head.len() - line.target.len() + target.len());
    rewritten.put_slice(&head[..start]);
    rewritten.put_slice(target.as_bytes());
    rewritten.put_slice(&head[end..]);
    rewritten
}
