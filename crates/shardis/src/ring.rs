//! Consistent-hash ring mapping keys to backend addresses.
//!
//! Ketama-style placement: every address contributes [`VNODES_PER_SERVER`]
//! virtual nodes, each hashed with SHA-256 and split into four 32-bit
//! points, for 160 points per address. A key lands on the first point at
//! or after its own hash, wrapping around at the top of the ring.
//!
//! Keys may carry a hash tag: when a key contains `{...}` with a
//! non-empty body, only the body is hashed, so `user:{42}:name` and
//! `user:{42}:email` always share a shard.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::error::ShardError;

/// Virtual nodes per address. Each yields four ring points.
pub const VNODES_PER_SERVER: usize = 40;

/// Identifier of one backend, in `host:port` form.
///
/// Cheap to clone; the string is shared.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BackendAddr(Arc<str>);

impl BackendAddr {
    pub fn new(addr: impl AsRef<str>) -> Self {
        Self(Arc::from(addr.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BackendAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BackendAddr {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl AsRef<str> for BackendAddr {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Immutable consistent-hash ring.
///
/// Membership is fixed at construction. [`HashRing::resolve`] is a pure
/// function of the address set and the key.
#[derive(Debug, Clone)]
pub struct HashRing {
    /// Addresses in configuration order. Ring points refer to indices here.
    nodes: Vec<BackendAddr>,
    points: BTreeMap<u32, usize>,
}

impl HashRing {
    /// Builds a ring with equal weight per address.
    ///
    /// An empty address list is a configuration error.
    pub fn new<I, A>(addrs: I) -> Result<Self, ShardError>
    where
        I: IntoIterator<Item = A>,
        A: Into<BackendAddr>,
    {
        let nodes: Vec<BackendAddr> = addrs.into_iter().map(Into::into).collect();
        if nodes.is_empty() {
            return Err(ShardError::Config(
                "hash ring needs at least one server".into(),
            ));
        }

        let mut points = BTreeMap::new();
        for (idx, node) in nodes.iter().enumerate() {
            for vnode in 0..VNODES_PER_SERVER {
                let digest = Sha256::digest(format!("{node}-{vnode}").as_bytes());
                for chunk in digest[..16].chunks_exact(4) {
                    let point = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                    // on collision the smaller address wins, so placement
                    // does not depend on configuration order
                    points
                        .entry(point)
                        .and_modify(|owner: &mut usize| {
                            if nodes[idx] < nodes[*owner] {
                                *owner = idx;
                            }
                        })
                        .or_insert(idx);
                }
            }
        }

        Ok(Self { nodes, points })
    }

    /// Returns the address owning `key`.
    pub fn resolve(&self, key: &[u8]) -> &BackendAddr {
        &self.nodes[self.resolve_index(key)]
    }

    /// Index of the owning address in [`HashRing::nodes`].
    pub(crate) fn resolve_index(&self, key: &[u8]) -> usize {
        let hash = key_hash(key);
        self.points
            .range(hash..)
            .next()
            .or_else(|| self.points.iter().next())
            .map(|(_, idx)| *idx)
            // construction guarantees at least one point
            .unwrap_or(0)
    }

    /// Every distinct address on the ring, in configuration order.
    pub fn nodes(&self) -> &[BackendAddr] {
        &self.nodes
    }

    /// Number of points on the ring.
    pub fn point_count(&self) -> usize {
        self.points.len()
    }
}

/// Hashes the routable part of a key onto the ring.
fn key_hash(key: &[u8]) -> u32 {
    let digest = Sha256::digest(hash_tag(key));
    u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]])
}

/// Returns the hash tag of a key, or the whole key if it has none.
///
/// The tag is the content between the first `{` and the first `}` after
/// it. An empty tag (`foo{}bar`) or an unclosed brace means no tag.
fn hash_tag(key: &[u8]) -> &[u8] {
    let Some(open) = key.iter().position(|&b| b == b'{') else {
        return key;
    };
    let rest = &key[open + 1..];
    match rest.iter().position(|&b| b == b'}') {
        Some(close) if close > 0 => &rest[..close],
        _ => key,
    }
}
