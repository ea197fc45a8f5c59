//! The PostgreSQL v3 wire message codec.
//!
//! Every backend message is `<u8 tag><i32 length-including-self><payload>`;
//! every frontend message follows the same shape except [`frontend::Startup`]
//! and [`frontend::SslRequest`], which have no leading tag byte.
pub mod backend;
pub mod frontend;

use bytes::{Buf, Bytes, BytesMut};

use crate::{
    common::unit_error,
    error::{Error, ErrorKind},
};

/// Frontend message type bytes.
pub mod frontend_tag {
    pub const PASSWORD: u8 = b'p';
    pub const QUERY: u8 = b'Q';
    pub const PARSE: u8 = b'P';
    pub const BIND: u8 = b'B';
    pub const EXECUTE: u8 = b'E';
    pub const DESCRIBE: u8 = b'D';
    pub const CLOSE: u8 = b'C';
    pub const SYNC: u8 = b'S';
    pub const FLUSH: u8 = b'H';
    pub const COPY_DATA: u8 = b'd';
    pub const COPY_DONE: u8 = b'c';
    pub const COPY_FAIL: u8 = b'f';
    pub const TERMINATE: u8 = b'X';
}

/// Backend message type bytes.
pub mod backend_tag {
    pub const AUTHENTICATION: u8 = b'R';
    pub const BACKEND_KEY_DATA: u8 = b'K';
    pub const PARAMETER_STATUS: u8 = b'S';
    pub const READY_FOR_QUERY: u8 = b'Z';
    pub const ROW_DESCRIPTION: u8 = b'T';
    pub const DATA_ROW: u8 = b'D';
    pub const COMMAND_COMPLETE: u8 = b'C';
    pub const EMPTY_QUERY_RESPONSE: u8 = b'I';
    pub const ERROR_RESPONSE: u8 = b'E';
    pub const NOTICE_RESPONSE: u8 = b'N';
    pub const NOTIFICATION_RESPONSE: u8 = b'A';
    pub const PARSE_COMPLETE: u8 = b'1';
    pub const BIND_COMPLETE: u8 = b'2';
    pub const CLOSE_COMPLETE: u8 = b'3';
    pub const PARAMETER_DESCRIPTION: u8 = b't';
    pub const NO_DATA: u8 = b'n';
    pub const PORTAL_SUSPENDED: u8 = b's';
    pub const NEGOTIATE_PROTOCOL_VERSION: u8 = b'v';
}

/// A message can arrive at any point in the protocol regardless of what the
/// caller is currently waiting for; the transport layer consumes it silently.
pub fn is_async_tag(tag: u8) -> bool {
    matches!(
        tag,
        backend_tag::NOTICE_RESPONSE
            | backend_tag::NOTIFICATION_RESPONSE
            | backend_tag::PARAMETER_STATUS
            | backend_tag::NEGOTIATE_PROTOCOL_VERSION
    )
}

/// A decoded, not-yet-typed backend frame.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub tag: u8,
    pub payload: Bytes,
}

/// Attempt to split one complete frame off the front of `buf`.
///
/// Returns `None` (without mutating `buf`) if the buffer does not yet hold a
/// full frame. `buf` must contain the leading tag byte.
pub fn decode_one(buf: &mut BytesMut) -> Result<Option<RawMessage>, Error> {
    if buf.len() < 5 {
        return Ok(None);
    }
    let tag = buf[0];
    let len = i32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);
    if len < 4 {
        return Err(ProtocolError::BadFrameLength(len).into());
    }
    let total = 1 + len as usize;
    if buf.len() < total {
        return Ok(None);
    }
    let mut frame = buf.split_to(total);
    frame.advance(5);
    Ok(Some(RawMessage { tag, payload: frame.freeze() }))
}

/// A type decodable from a tagged, length-framed backend message.
pub trait BackendProtocol: Sized {
    fn decode(tag: u8, payload: Bytes) -> Result<Self, Error>;
}

unit_error! {
    /// Internal auth-negotiation failure not covered by the enumerated kinds.
    pub struct UnsupportedAuth("authentication method is not supported");
}

/// Wire-level protocol violations: bad framing, unexpected message ordering.
#[derive(Debug)]
pub enum ProtocolError {
    BadFrameLength(i32),
    Unexpected { expected: &'static str, context: &'static str, tag: u8 },
    BadCommandTag(String),
    Utf8,
}

impl ProtocolError {
    pub fn unexpected(expected: &'static str, context: &'static str, tag: u8) -> Self {
        Self::Unexpected { expected, context, tag }
    }
}

impl std::error::Error for ProtocolError {}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadFrameLength(len) => write!(f, "invalid message length: {len}"),
            Self::Unexpected { expected, context, tag } => write!(
                f,
                "expected {expected} during {context}, got message tag {:?}",
                *tag as char
            ),
            Self::BadCommandTag(tag) => write!(f, "unparseable command tag: {tag:?}"),
            Self::Utf8 => write!(f, "backend sent invalid utf-8"),
        }
    }
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        ErrorKind::Protocol(e).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_one_waits_for_a_full_frame_before_splitting_it_off() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[backend_tag::READY_FOR_QUERY]);
        buf.extend_from_slice(&5i32.to_be_bytes());
        // length says 5 bytes follow the tag (4 for itself + 1 payload byte);
        // only the length prefix has arrived so far.
        assert!(decode_one(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 5);

        buf.extend_from_slice(b"I");
        let msg = decode_one(&mut buf).unwrap().unwrap();
        assert_eq!(msg.tag, backend_tag::READY_FOR_QUERY);
        assert_eq!(&msg.payload[..], b"I");
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_one_rejects_a_length_shorter_than_itself() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[backend_tag::READY_FOR_QUERY]);
        buf.extend_from_slice(&0i32.to_be_bytes());
        assert!(decode_one(&mut buf).is_err());
    }

    #[test]
    fn is_async_tag_only_matches_the_three_out_of_band_messages() {
        assert!(is_async_tag(backend_tag::NOTICE_RESPONSE));
        assert!(is_async_tag(backend_tag::NOTIFICATION_RESPONSE));
        assert!(is_async_tag(backend_tag::PARAMETER_STATUS));
        assert!(is_async_tag(backend_tag::NEGOTIATE_PROTOCOL_VERSION));
        assert!(!is_async_tag(backend_tag::READY_FOR_QUERY));
        assert!(!is_async_tag(backend_tag::DATA_ROW));
    }
}
