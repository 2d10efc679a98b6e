//! RESP serialization straight into a `BytesMut`.

use bytes::{BufMut, BytesMut};

use crate::types::Frame;

impl Frame {
    /// Appends the wire form of this frame to `dst`.
    pub fn serialize(&self, dst: &mut BytesMut) {
        match self {
            Frame::Simple(s) => line(dst, b'+', s.as_bytes()),
            Frame::Error(msg) => line(dst, b'-', msg.as_bytes()),
            Frame::Integer(n) => header(dst, b':', *n),
            Frame::Bulk(data) => {
                header(dst, b'$', data.len() as i64);
                dst.put_slice(data);
                dst.put_slice(b"\r\n");
            }
            Frame::Array(items) => {
                header(dst, b'*', items.len() as i64);
                for item in items {
                    item.serialize(dst);
                }
            }
            Frame::Null => dst.put_slice(b"_\r\n"),
            Frame::Map(pairs) => {
                header(dst, b'%', pairs.len() as i64);
                for (key, val) in pairs {
                    key.serialize(dst);
                    val.serialize(dst);
                }
            }
            Frame::Boolean(b) => dst.put_slice(if *b { b"#t\r\n" } else { b"#f\r\n" }),
        }
    }
}

fn line(dst: &mut BytesMut, prefix: u8, body: &[u8]) {
    dst.put_u8(prefix);
    dst.put_slice(body);
    dst.put_slice(b"\r\n");
}

/// Writes `<prefix><decimal>\r\n` using `itoa` for the number.
fn header(dst: &mut BytesMut, prefix: u8, n: i64) {
    let mut buf = itoa::Buffer::new();
    line(dst, prefix, buf.format(n).as_bytes());
}
