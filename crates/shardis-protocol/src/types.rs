//! RESP frame types.
//!
//! A [`Frame`] is one decoded reply (or one encoded request). Bulk
//! payloads are held as `Bytes` so replies can be handed from the socket
//! buffer to the caller without copying.

use bytes::Bytes;

/// A single RESP value.
///
/// Covers what a sharding client needs to read back from a stock server
/// in either RESP2 or RESP3 mode. RESP2 null bulk strings (`$-1`) and
/// null arrays (`*-1`) both decode to [`Frame::Null`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Status reply, e.g. `+OK\r\n`.
    Simple(String),

    /// Error reply, e.g. `-ERR unknown command\r\n`.
    Error(String),

    /// Signed 64-bit integer, e.g. `:42\r\n`.
    Integer(i64),

    /// Binary-safe string, e.g. `$5\r\nhello\r\n`.
    Bulk(Bytes),

    /// Ordered sequence, e.g. `*2\r\n:1\r\n:2\r\n`.
    Array(Vec<Frame>),

    /// Absent value: `_\r\n`, `$-1\r\n` or `*-1\r\n`.
    Null,

    /// RESP3 map, kept as ordered pairs.
    Map(Vec<(Frame, Frame)>),

    /// RESP3 boolean, `#t\r\n` / `#f\r\n`.
    Boolean(bool),
}

impl Frame {
    /// Builds a request frame: an array of bulk strings.
    pub fn command<I, T>(tokens: I) -> Frame
    where
        I: IntoIterator<Item = T>,
        T: Into<Bytes>,
    {
        Frame::Array(tokens.into_iter().map(|t| Frame::Bulk(t.into())).collect())
    }

    /// Returns `true` if this frame is a null value.
    pub fn is_null(&self) -> bool {
        matches!(self, Frame::Null)
    }

    /// Returns `true` for a `+OK` status reply.
    pub fn is_ok(&self) -> bool {
        matches!(self, Frame::Simple(s) if s == "OK")
    }

    /// Returns the payload of a string-like frame.
    ///
    /// Bulk frames are returned without copying; simple strings are copied.
    pub fn to_bytes(&self) -> Option<Bytes> {
        match self {
            Frame::Bulk(b) => Some(b.clone()),
            Frame::Simple(s) => Some(Bytes::copy_from_slice(s.as_bytes())),
            _ => None,
        }
    }

    /// Consumes an array frame into its elements.
    ///
    /// `Null` is treated as an empty array; anything else is handed back
    /// unchanged as the error.
    pub fn into_array(self) -> Result<Vec<Frame>, Frame> {
        match self {
            Frame::Array(items) => Ok(items),
            Frame::Null => Ok(Vec::new()),
            other => Err(other),
        }
    }
}

impl std::fmt::Display for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Frame::Simple(s) => write!(f, "{s}"),
            Frame::Error(e) => write!(f, "(error) {e}"),
            Frame::Integer(n) => write!(f, "(integer) {n}"),
            Frame::Bulk(b) => write!(f, "\"{}\"", String::from_utf8_lossy(b)),
            Frame::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Frame::Null => write!(f, "(nil)"),
            Frame::Map(pairs) => write!(f, "(map of {} entries)", pairs.len()),
            Frame::Boolean(b) => write!(f, "{b}"),
        }
    }
}
