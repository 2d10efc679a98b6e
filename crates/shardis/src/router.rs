//! The router facade: ring, connection table and single-key dispatch.

use std::sync::Arc;

use bytes::Bytes;
use futures::future::try_join_all;
use shardis_protocol::Frame;
use tokio::sync::broadcast;
use tracing::debug;

use crate::backend::Backend;
use crate::command::{classify, request, CommandClass};
use crate::config::ShardConfig;
use crate::connection::Connection;
use crate::error::ShardError;
use crate::events::{self, ConnectionEvent, EventKind, EventSubscription};
use crate::pipeline::Pipeline;
use crate::ring::{BackendAddr, HashRing};

/// Client-side sharding router.
///
/// Holds an immutable [`HashRing`] and one backend per ring address.
/// Nothing here is mutated after construction, so a router can be shared
/// (`Arc<ShardRouter>`) across any number of concurrent callers.
pub struct ShardRouter<B = Connection> {
    ring: HashRing,
    /// Aligned with `ring.nodes()`: `backends[i]` serves `nodes()[i]`.
    backends: Vec<B>,
}

impl<B> std::fmt::Debug for ShardRouter<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardRouter")
            .field("servers", &self.ring.nodes())
            .finish_non_exhaustive()
    }
}

impl ShardRouter<Connection> {
    /// Validates `config` and creates one lazy TCP connection per server.
    ///
    /// No socket is opened; connections are established by
    /// [`ShardRouter::connect_all`] or on first use. Subscribing with
    /// [`ShardRouter::on`] before connecting observes the `Connect` and
    /// `Ready` events.
    pub fn new(config: ShardConfig) -> Result<Self, ShardError> {
        config.validate()?;
        let backends = config
            .servers
            .iter()
            .map(|server| {
                let addr = BackendAddr::new(server);
                (addr.clone(), Connection::new(addr, &config))
            })
            .collect::<Vec<_>>();
        Self::from_backends(backends)
    }

    /// Like [`ShardRouter::new`], then connects every backend.
    pub async fn connect(config: ShardConfig) -> Result<Self, ShardError> {
        let router = Self::new(config)?;
        router.connect_all().await?;
        Ok(router)
    }
}

impl<B: Backend> ShardRouter<B> {
    /// Builds a router over caller-supplied backends.
    ///
    /// Fails with a configuration error when the list is empty or an
    /// address appears twice.
    pub fn from_backends<I, A>(backends: I) -> Result<Self, ShardError>
    where
        I: IntoIterator<Item = (A, B)>,
        A: Into<BackendAddr>,
    {
        let (addrs, backends): (Vec<BackendAddr>, Vec<B>) = backends
            .into_iter()
            .map(|(addr, backend)| (addr.into(), backend))
            .unzip();

        for (i, addr) in addrs.iter().enumerate() {
            if addrs[..i].contains(addr) {
                return Err(ShardError::Config(format!(
                    "server '{addr}' is listed more than once"
                )));
            }
        }

        let ring = HashRing::new(addrs)?;
        debug!(servers = ring.nodes().len(), "shard ring built");
        Ok(Self { ring, backends })
    }

    /// Connects every backend concurrently. The first failure is returned.
    pub async fn connect_all(&self) -> Result<(), ShardError> {
        try_join_all(self.backends.iter().map(Backend::connect)).await?;
        Ok(())
    }

    pub fn ring(&self) -> &HashRing {
        &self.ring
    }

    /// Every backend address, in configuration order.
    pub fn servers(&self) -> &[BackendAddr] {
        self.ring.nodes()
    }

    /// Looks up the backend serving `addr`.
    pub fn backend(&self, addr: &str) -> Option<&B> {
        self.ring
            .nodes()
            .iter()
            .position(|n| n.as_str() == addr)
            .map(|i| &self.backends[i])
    }

    /// The address a key routes to.
    pub fn shard_for(&self, key: impl AsRef<[u8]>) -> &BackendAddr {
        self.ring.resolve(key.as_ref())
    }

    /// Runs any command in the table by name.
    ///
    /// Single-key commands go to the shard owning `args[0]`; `mget`,
    /// `mset` and `keys` fan out. Unknown and unshardable commands are
    /// rejected before any network call.
    pub async fn command<A: AsRef<[u8]>>(&self, name: &str, args: &[A]) -> Result<Frame, ShardError> {
        match classify(name) {
            None => Err(ShardError::UnknownCommand(name.to_string())),
            Some(CommandClass::Unshardable) => Err(ShardError::NotShardable(name.to_string())),
            Some(CommandClass::SingleKey) => {
                let (shard, req) = self.route_single(name, args)?;
                debug!(command = name, shard = %self.ring.nodes()[shard], "routing single-key command");
                self.backends[shard].call(req).await
            }
            Some(CommandClass::MultiGet) => {
                let values = self.mget(args).await?;
                Ok(Frame::Array(
                    values
                        .into_iter()
                        .map(|v| v.map_or(Frame::Null, Frame::Bulk))
                        .collect(),
                ))
            }
            Some(CommandClass::MultiSet) => {
                self.mset(args).await?;
                Ok(Frame::Simple("OK".into()))
            }
            Some(CommandClass::Scan) => {
                let [pattern] = args else {
                    return Err(ShardError::WrongArity(name.to_string()));
                };
                let keys = self.keys(pattern).await?;
                Ok(Frame::Array(keys.into_iter().map(Frame::Bulk).collect()))
            }
        }
    }

    /// Resolves the shard for a single-key command and builds its request.
    pub(crate) fn route_single<A: AsRef<[u8]>>(
        &self,
        name: &str,
        args: &[A],
    ) -> Result<(usize, Vec<Bytes>), ShardError> {
        let Some(key) = args.first() else {
            return Err(ShardError::WrongArity(name.to_string()));
        };
        Ok((self.ring.resolve_index(key.as_ref()), request(name, args)))
    }

    pub(crate) fn backend_at(&self, shard: usize) -> &B {
        &self.backends[shard]
    }

    /// Opens a pipeline. Calls queue locally until [`Pipeline::exec`].
    pub fn multi(&self) -> Pipeline<'_, B> {
        Pipeline::new(self)
    }

    /// Subscribes `listener` to `kind` events from every backend.
    ///
    /// The listener receives the event and the address of the backend
    /// that emitted it.
    ///
    /// # Panics
    ///
    /// Spawns one forwarding task per backend, so it panics when called
    /// outside a tokio runtime.
    pub fn on<F>(&self, kind: EventKind, listener: F) -> EventSubscription
    where
        F: Fn(&ConnectionEvent, &BackendAddr) + Send + Sync + 'static,
    {
        events::bridge(self.event_sources(), kind, Arc::new(listener), false)
    }

    /// Like [`ShardRouter::on`], but each backend delivers at most one
    /// event. With N shards the listener can fire up to N times: this is
    /// once per shard, not once per cluster.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime, like
    /// [`ShardRouter::on`].
    pub fn once<F>(&self, kind: EventKind, listener: F) -> EventSubscription
    where
        F: Fn(&ConnectionEvent, &BackendAddr) + Send + Sync + 'static,
    {
        events::bridge(self.event_sources(), kind, Arc::new(listener), true)
    }

    fn event_sources(&self) -> Vec<(BackendAddr, broadcast::Receiver<ConnectionEvent>)> {
        self.ring
            .nodes()
            .iter()
            .cloned()
            .zip(self.backends.iter().map(Backend::events))
            .collect()
    }

    // -- typed helpers for common single-key commands --

    /// GET. `None` when the key does not exist.
    pub async fn get(&self, key: impl AsRef<[u8]>) -> Result<Option<Bytes>, ShardError> {
        let reply = self.command("get", &[key.as_ref()]).await?;
        optional_bytes("get", reply)
    }

    /// SET without options.
    pub async fn set(&self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Result<(), ShardError> {
        let reply = self.command("set", &[key.as_ref(), value.as_ref()]).await?;
        expect_ok("set", reply)
    }

    /// DEL of one key. Returns the number of keys removed.
    pub async fn del(&self, key: impl AsRef<[u8]>) -> Result<i64, ShardError> {
        let reply = self.command("del", &[key.as_ref()]).await?;
        integer("del", reply)
    }

    pub async fn exists(&self, key: impl AsRef<[u8]>) -> Result<bool, ShardError> {
        let reply = self.command("exists", &[key.as_ref()]).await?;
        Ok(integer("exists", reply)? > 0)
    }

    pub async fn incr(&self, key: impl AsRef<[u8]>) -> Result<i64, ShardError> {
        let reply = self.command("incr", &[key.as_ref()]).await?;
        integer("incr", reply)
    }

    /// EXPIRE. Returns false when the key does not exist.
    pub async fn expire(&self, key: impl AsRef<[u8]>, seconds: u64) -> Result<bool, ShardError> {
        let secs = seconds.to_string();
        let reply = self
            .command("expire", &[key.as_ref(), secs.as_bytes()])
            .await?;
        Ok(integer("expire", reply)? == 1)
    }

    /// TTL in seconds; -1 without expiry, -2 when missing.
    pub async fn ttl(&self, key: impl AsRef<[u8]>) -> Result<i64, ShardError> {
        let reply = self.command("ttl", &[key.as_ref()]).await?;
        integer("ttl", reply)
    }

    pub async fn hget(
        &self,
        key: impl AsRef<[u8]>,
        field: impl AsRef<[u8]>,
    ) -> Result<Option<Bytes>, ShardError> {
        let reply = self.command("hget", &[key.as_ref(), field.as_ref()]).await?;
        optional_bytes("hget", reply)
    }

    /// HSET of one field. Returns true when the field was created.
    pub async fn hset(
        &self,
        key: impl AsRef<[u8]>,
        field: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
    ) -> Result<bool, ShardError> {
        let reply = self
            .command("hset", &[key.as_ref(), field.as_ref(), value.as_ref()])
            .await?;
        Ok(integer("hset", reply)? == 1)
    }
}

fn optional_bytes(command: &str, reply: Frame) -> Result<Option<Bytes>, ShardError> {
    match reply {
        Frame::Null => Ok(None),
        other => other
            .to_bytes()
            .map(Some)
            .ok_or_else(|| ShardError::unexpected(command, &other)),
    }
}

fn expect_ok(command: &str, reply: Frame) -> Result<(), ShardError> {
    if reply.is_ok() {
        Ok(())
    } else {
        Err(ShardError::unexpected(command, &reply))
    }
}

fn integer(command: &str, reply: Frame) -> Result<i64, ShardError> {
    match reply {
        Frame::Integer(n) => Ok(n),
        other => Err(ShardError::unexpected(command, &other)),
    }
}
