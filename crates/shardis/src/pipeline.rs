//! Cross-shard pipelines.
//!
//! A [`Pipeline`] queues single-key commands locally, one batch per shard,
//! and records which shard each call went to. [`Pipeline::exec`] runs every
//! batch as its own MULTI/EXEC transaction, concurrently, then replays the
//! recorded routing to put the replies back in call order.
//!
//! Atomicity holds per shard only. A pipeline spanning several shards is
//! several independent transactions.

use std::collections::{BTreeMap, HashMap, VecDeque};

use bytes::Bytes;
use futures::future::try_join_all;
use shardis_protocol::Frame;
use tracing::{debug, warn};

use crate::backend::Backend;
use crate::command::{classify, CommandClass};
use crate::connection::Connection;
use crate::error::ShardError;
use crate::router::ShardRouter;

/// A batch of single-key commands to run across shards.
///
/// Created by [`ShardRouter::multi`]. Dropping a pipeline without calling
/// [`Pipeline::exec`] discards the queued commands; nothing has been sent.
pub struct Pipeline<'r, B = Connection> {
    router: &'r ShardRouter<B>,
    /// Queued requests per shard index, created on first use.
    batches: BTreeMap<usize, Vec<Vec<Bytes>>>,
    /// Shard index of every call, in call order.
    trace: Vec<usize>,
}

impl<'r, B: Backend> Pipeline<'r, B> {
    pub(crate) fn new(router: &'r ShardRouter<B>) -> Self {
        Self {
            router,
            batches: BTreeMap::new(),
            trace: Vec::new(),
        }
    }

    /// Queues a command.
    ///
    /// Only single-key commands can be pipelined. Anything else is
    /// rejected here and leaves the pipeline unchanged.
    pub fn cmd<A: AsRef<[u8]>>(
        &mut self,
        name: &str,
        args: &[A],
    ) -> Result<&mut Self, ShardError> {
        match classify(name) {
            Some(CommandClass::SingleKey) => {}
            Some(CommandClass::Unshardable) => {
                return Err(ShardError::NotShardable(name.to_string()))
            }
            Some(CommandClass::MultiGet | CommandClass::MultiSet | CommandClass::Scan) => {
                return Err(ShardError::NotPipelinable(name.to_string()))
            }
            None => return Err(ShardError::UnknownCommand(name.to_string())),
        }

        let (shard, request) = self.router.route_single(name, args)?;
        self.batches.entry(shard).or_default().push(request);
        self.trace.push(shard);
        Ok(self)
    }

    pub fn get(&mut self, key: impl AsRef<[u8]>) -> Result<&mut Self, ShardError> {
        self.cmd("get", &[key.as_ref()])
    }

    pub fn set(
        &mut self,
        key: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
    ) -> Result<&mut Self, ShardError> {
        self.cmd("set", &[key.as_ref(), value.as_ref()])
    }

    pub fn del(&mut self, key: impl AsRef<[u8]>) -> Result<&mut Self, ShardError> {
        self.cmd("del", &[key.as_ref()])
    }

    pub fn incr(&mut self, key: impl AsRef<[u8]>) -> Result<&mut Self, ShardError> {
        self.cmd("incr", &[key.as_ref()])
    }

    pub fn expire(
        &mut self,
        key: impl AsRef<[u8]>,
        seconds: u64,
    ) -> Result<&mut Self, ShardError> {
        let secs = seconds.to_string();
        self.cmd("expire", &[key.as_ref(), secs.as_bytes()])
    }

    pub fn hset(
        &mut self,
        key: impl AsRef<[u8]>,
        field: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
    ) -> Result<&mut Self, ShardError> {
        self.cmd("hset", &[key.as_ref(), field.as_ref(), value.as_ref()])
    }

    pub fn hget(
        &mut self,
        key: impl AsRef<[u8]>,
        field: impl AsRef<[u8]>,
    ) -> Result<&mut Self, ShardError> {
        self.cmd("hget", &[key.as_ref(), field.as_ref()])
    }

    /// Number of queued calls.
    pub fn len(&self) -> usize {
        self.trace.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trace.is_empty()
    }

    /// Number of distinct shards the queued calls touch.
    pub fn shard_count(&self) -> usize {
        self.batches.len()
    }

    /// Runs every shard's batch as one transaction and returns the replies
    /// in call order.
    ///
    /// Per-command error replies from a committed transaction appear in
    /// place as [`Frame::Error`]. If any shard's transaction fails, the
    /// whole call fails; batches on other shards may already have
    /// committed. An empty pipeline sends nothing.
    pub async fn exec(self) -> Result<Vec<Frame>, ShardError> {
        let Pipeline {
            router,
            batches,
            trace,
        } = self;
        if trace.is_empty() {
            return Ok(Vec::new());
        }

        debug!(calls = trace.len(), shards = batches.len(), "executing pipeline");
        let shards: Vec<usize> = batches.keys().copied().collect();
        let groups = try_join_all(batches.into_iter().map(|(shard, batch)| async move {
            router.backend_at(shard).exec(batch).await.map_err(|e| {
                warn!(shard = %router.servers()[shard], error = %e, "pipeline transaction failed");
                e
            })
        }))
        .await?;

        interleave(&shards, groups, &trace)
    }
}

/// Puts per-shard reply groups back in call order by replaying `trace`.
///
/// `groups[i]` holds the replies of shard `shards[i]`, in that shard's
/// submission order.
fn interleave(
    shards: &[usize],
    groups: Vec<Vec<Frame>>,
    trace: &[usize],
) -> Result<Vec<Frame>, ShardError> {
    if shards.len() != groups.len() {
        return Err(ShardError::Consistency(format!(
            "expected {} reply groups, got {}",
            shards.len(),
            groups.len()
        )));
    }

    let mut queues: HashMap<usize, VecDeque<Frame>> = shards
        .iter()
        .copied()
        .zip(groups.into_iter().map(VecDeque::from))
        .collect();

    trace
        .iter()
        .map(|shard| {
            queues
                .get_mut(shard)
                .and_then(VecDeque::pop_front)
                .ok_or_else(|| {
                    ShardError::Consistency(format!("no reply left for shard #{shard}"))
                })
        })
        .collect()
}
