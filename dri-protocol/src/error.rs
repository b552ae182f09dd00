//! Error types for the DRI wire formats.

use thiserror::Error;

/// Protocol-level errors raised while encoding or decoding a message.
///
/// A decode error is fatal to the message being decoded, never to the
/// session that received it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Fewer bytes remain than the field being read requires.
    #[error("Truncated input at offset {offset}: need {needed} bytes, {available} available")]
    TruncatedInput {
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// A length field is malformed or would overrun the buffer.
    #[error("Invalid length field at offset {offset}: {reason}")]
    InvalidLength { offset: usize, reason: String },

    /// A tag other than the expected one was found.
    #[error("Unexpected tag 0x{tag:06X} at offset {offset}")]
    UnexpectedTag { tag: u32, offset: usize },

    /// Menu resynchronisation ran off the end of the buffer.
    #[error("No object tag found after offset {0}")]
    MissingObjectTag(usize),

    /// Text cannot be expressed in the single-byte character set.
    #[error("Character {0:?} cannot be encoded as a single byte")]
    UnencodableText(char),

    /// RTSP status line or header block could not be parsed.
    #[error("Malformed RTSP message: {0}")]
    MalformedRtsp(String),

    /// `Transport` header value could not be parsed.
    #[error("Malformed transport specification: {0}")]
    MalformedTransport(String),

    /// Enumerated device value is not recognised.
    #[error("Unknown {kind} value: {value:?}")]
    UnknownValue { kind: &'static str, value: String },
}

impl ProtocolError {
    pub(crate) fn truncated(offset: usize, needed: usize, buf_len: usize) -> Self {
        ProtocolError::TruncatedInput {
            offset,
            needed,
            available: buf_len.saturating_sub(offset),
        }
    }
}
