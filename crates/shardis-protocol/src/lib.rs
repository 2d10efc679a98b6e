//! shardis-protocol: RESP codec for shardis backend connections.
//!
//! Parses replies incrementally from a caller-owned buffer and serializes
//! requests directly into a `BytesMut`.
//!
//! # quick start
//!
//! ```
//! use bytes::BytesMut;
//! use shardis_protocol::{parse_frame, Frame};
//!
//! let mut buf = BytesMut::new();
//! Frame::command(["GET", "user:1"]).serialize(&mut buf);
//! assert_eq!(&buf[..], b"*2\r\n$3\r\nGET\r\n$6\r\nuser:1\r\n");
//!
//! let (reply, consumed) = parse_frame(b"$-1\r\n").unwrap().unwrap();
//! assert_eq!(reply, Frame::Null);
//! assert_eq!(consumed, 5);
//! ```

pub mod error;
pub mod parse;
mod serialize;
pub mod types;

pub use error::ProtocolError;
pub use parse::parse_frame;
pub use types::Frame;
