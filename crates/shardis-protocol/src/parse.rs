//! Incremental RESP parser.
//!
//! The caller owns the read buffer: it appends bytes from the socket and
//! calls [`parse_frame`] until a frame comes back, then drops the consumed
//! prefix. Nothing is consumed on `Ok(None)`, so a partial frame is simply
//! retried once more data arrives.
//!
//! Replies from stock servers may be RESP2 or RESP3, so both null
//! encodings are accepted.

use bytes::Bytes;

use crate::error::ProtocolError;
use crate::types::Frame;

/// Maximum nesting depth for arrays and maps.
const MAX_NESTING_DEPTH: usize = 64;

/// Maximum declared element count of an aggregate.
const MAX_ARRAY_ELEMENTS: usize = 1_048_576;

/// Maximum bulk string length (512 MB, as the server enforces).
const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;

/// Upper bound on up-front `Vec` capacity for aggregates. The declared
/// count is untrusted until the children have actually been read.
const PREALLOC_CAP: usize = 1024;

/// Parses one frame from the front of `buf`.
///
/// Returns `Ok(Some((frame, consumed)))` for a complete frame,
/// `Ok(None)` when more data is needed, or an error for malformed input.
pub fn parse_frame(buf: &[u8]) -> Result<Option<(Frame, usize)>, ProtocolError> {
    if buf.is_empty() {
        return Ok(None);
    }

    let mut parser = Parser { buf, pos: 0 };
    match parser.frame(0) {
        Ok(frame) => Ok(Some((frame, parser.pos))),
        Err(ProtocolError::Incomplete) => Ok(None),
        Err(e) => Err(e),
    }
}

struct Parser<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn frame(&mut self, depth: usize) -> Result<Frame, ProtocolError> {
        match self.byte()? {
            b'+' => Ok(Frame::Simple(self.text_line()?)),
            b'-' => Ok(Frame::Error(self.text_line()?)),
            b':' => Ok(Frame::Integer(self.integer_line()?)),
            b'$' => self.bulk(),
            b'*' => {
                let Some(count) = self.aggregate_len(depth)? else {
                    return Ok(Frame::Null);
                };
                let mut items = Vec::with_capacity(count.min(PREALLOC_CAP));
                for _ in 0..count {
                    items.push(self.frame(depth + 1)?);
                }
                Ok(Frame::Array(items))
            }
            b'%' => {
                let Some(count) = self.aggregate_len(depth)? else {
                    return Ok(Frame::Null);
                };
                let mut pairs = Vec::with_capacity(count.min(PREALLOC_CAP));
                for _ in 0..count {
                    let key = self.frame(depth + 1)?;
                    let val = self.frame(depth + 1)?;
                    pairs.push((key, val));
                }
                Ok(Frame::Map(pairs))
            }
            b'_' => {
                self.line()?;
                Ok(Frame::Null)
            }
            b'#' => match self.line()? {
                b"t" => Ok(Frame::Boolean(true)),
                b"f" => Ok(Frame::Boolean(false)),
                other => Err(ProtocolError::Malformed(format!(
                    "invalid boolean '{}'",
                    String::from_utf8_lossy(other)
                ))),
            },
            other => Err(ProtocolError::InvalidPrefix(other)),
        }
    }

    fn bulk(&mut self) -> Result<Frame, ProtocolError> {
        let len = self.integer_line()?;
        if len == -1 {
            return Ok(Frame::Null);
        }
        if len < 0 {
            return Err(ProtocolError::InvalidFrameLength(len));
        }
        if len > MAX_BULK_LEN {
            return Err(ProtocolError::BulkStringTooLarge(len as usize));
        }

        let len = len as usize;
        let start = self.pos;
        let end = start + len;
        if self.buf.len() < end + 2 {
            return Err(ProtocolError::Incomplete);
        }
        if &self.buf[end..end + 2] != b"\r\n" {
            return Err(ProtocolError::InvalidFrameLength(len as i64));
        }

        self.pos = end + 2;
        Ok(Frame::Bulk(Bytes::copy_from_slice(&self.buf[start..end])))
    }

    /// Reads an aggregate header. `None` means a RESP2 `-1` null.
    fn aggregate_len(&mut self, depth: usize) -> Result<Option<usize>, ProtocolError> {
        if depth + 1 > MAX_NESTING_DEPTH {
            return Err(ProtocolError::NestingTooDeep(MAX_NESTING_DEPTH));
        }
        let count = self.integer_line()?;
        if count == -1 {
            return Ok(None);
        }
        if count < 0 {
            return Err(ProtocolError::InvalidFrameLength(count));
        }
        if count as usize > MAX_ARRAY_ELEMENTS {
            return Err(ProtocolError::TooManyElements(count as usize));
        }
        Ok(Some(count as usize))
    }

    fn byte(&mut self) -> Result<u8, ProtocolError> {
        let b = *self.buf.get(self.pos).ok_or(ProtocolError::Incomplete)?;
        self.pos += 1;
        Ok(b)
    }

    /// Returns everything up to the next `\r\n` and steps past it.
    fn line(&mut self) -> Result<&'a [u8], ProtocolError> {
        let buf = self.buf;
        let start = self.pos;
        let mut from = start;
        while let Some(offset) = memchr::memchr(b'\r', &buf[from..]) {
            let cr = from + offset;
            if cr + 1 >= buf.len() {
                break;
            }
            if buf[cr + 1] == b'\n' {
                self.pos = cr + 2;
                return Ok(&buf[start..cr]);
            }
            from = cr + 1;
        }
        Err(ProtocolError::Incomplete)
    }

    fn text_line(&mut self) -> Result<String, ProtocolError> {
        let line = self.line()?;
        std::str::from_utf8(line)
            .map(str::to_owned)
            .map_err(|_| ProtocolError::Malformed("invalid utf-8 in status line".into()))
    }

    fn integer_line(&mut self) -> Result<i64, ProtocolError> {
        parse_i64(self.line()?)
    }
}

/// Parses a decimal i64 without going through `str`.
///
/// Negative values accumulate downward so `i64::MIN` does not overflow.
fn parse_i64(digits: &[u8]) -> Result<i64, ProtocolError> {
    let (negative, digits) = match digits.split_first() {
        Some((&b'-', rest)) => (true, rest),
        Some(_) => (false, digits),
        None => return Err(ProtocolError::InvalidInteger),
    };
    if digits.is_empty() {
        return Err(ProtocolError::InvalidInteger);
    }

    digits.iter().try_fold(0i64, |acc, &b| {
        if !b.is_ascii_digit() {
            return Err(ProtocolError::InvalidInteger);
        }
        let d = (b - b'0') as i64;
        let next = acc.checked_mul(10).and_then(|n| {
            if negative {
                n.checked_sub(d)
            } else {
                n.checked_add(d)
            }
        });
        next.ok_or(ProtocolError::InvalidInteger)
    })
}
