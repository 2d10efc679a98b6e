//! Protocol error types.

use thiserror::Error;

/// Errors raised while decoding RESP data.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Not enough bytes buffered for a whole frame. Internal to the
    /// parser; [`crate::parse_frame`] reports this as `Ok(None)`.
    #[error("incomplete frame: need more data")]
    Incomplete,

    /// The type byte is not one we understand.
    #[error("invalid type prefix: {0:#04x}")]
    InvalidPrefix(u8),

    #[error("invalid integer encoding")]
    InvalidInteger,

    /// A declared length is negative (other than the RESP2 `-1` null).
    #[error("invalid frame length: {0}")]
    InvalidFrameLength(i64),

    #[error("bulk string of {0} bytes exceeds the 512 MB limit")]
    BulkStringTooLarge(usize),

    #[error("aggregate declares {0} elements, over the limit")]
    TooManyElements(usize),

    #[error("frames nested deeper than {0} levels")]
    NestingTooDeep(usize),

    /// Text frame content that is not valid UTF-8, or a malformed boolean.
    #[error("malformed frame: {0}")]
    Malformed(String),
}
