//! shardis: client-side sharding for Redis-protocol key-value stores.
//!
//! Spreads a keyspace over several independent servers by hashing each
//! key onto a consistent-hash ring. The servers know nothing about each
//! other; all routing happens here.
//!
//! # Architecture
//!
//! - **Ring**: 40 virtual nodes per server, SHA-256 placement, `{tag}`
//!   hash tags for co-locating keys
//! - **Classifier**: a static table sorting every command into single-key,
//!   fan-out or unshardable
//! - **Router**: single-key commands go to exactly one backend
//! - **Fan-out**: `mget`, `mset` and `keys` split per shard, run
//!   concurrently and merge
//! - **Pipelines**: one MULTI/EXEC per shard, replies reassembled in call
//!   order
//! - **Events**: per-connection lifecycle events, bridged to one listener
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use shardis::{ShardConfig, ShardRouter};
//!
//! let config = ShardConfig::new(["10.0.0.1:6379", "10.0.0.2:6379"]);
//! let router = ShardRouter::connect(config).await?;
//!
//! router.set("user:1", "alice").await?;
//! let values = router.mget(&["user:1", "user:2"]).await?;
//!
//! let mut tx = router.multi();
//! tx.incr("visits")?.set("last", "user:1")?;
//! let replies = tx.exec().await?;
//! ```

mod backend;
mod command;
mod config;
mod connection;
mod error;
mod events;
mod fanout;
mod pipeline;
mod ring;
mod router;

#[cfg(test)]
mod testing;

pub use backend::Backend;
pub use command::{classify, wire_tokens, CommandClass};
pub use config::{ClientOptions, ShardConfig};
pub use connection::Connection;
pub use error::{ConnectionError, ShardError};
pub use events::{ConnectionEvent, EventKind, EventListener, EventSubscription};
pub use pipeline::Pipeline;
pub use ring::{BackendAddr, HashRing, VNODES_PER_SERVER};
pub use router::ShardRouter;
pub use shardis_protocol::Frame;
