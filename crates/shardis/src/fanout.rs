//! Multi-key fan-out: `mget`, `mset` and `keys`.
//!
//! Keys are partitioned by owning shard, the per-shard requests run
//! concurrently, and the replies are merged back. The first shard failure
//! fails the whole operation; sub-requests still in flight are dropped.

use std::collections::HashMap;

use bytes::Bytes;
use futures::future::try_join_all;
use shardis_protocol::Frame;
use tracing::{debug, warn};

use crate::backend::Backend;
use crate::command::wire_tokens;
use crate::error::ShardError;
use crate::router::ShardRouter;

impl<B: Backend> ShardRouter<B> {
    /// Fetches several keys that may live on different shards.
    ///
    /// Values come back in the order the keys were given. Missing keys
    /// are `None`. Repeated keys are fetched once per occurrence.
    pub async fn mget<K: AsRef<[u8]>>(
        &self,
        keys: &[K],
    ) -> Result<Vec<Option<Bytes>>, ShardError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let groups = self.partition(keys.iter().map(|k| {
            let key = Bytes::copy_from_slice(k.as_ref());
            (self.ring().resolve_index(&key), vec![key])
        }));
        debug!(keys = keys.len(), shards = groups.len(), "mget fan-out");

        let replies = try_join_all(groups.into_iter().map(|(shard, group)| async move {
            let request = wire_tokens("mget").chain(group.iter().cloned()).collect();
            let reply = self.call_shard(shard, "mget", request).await?;
            Ok::<_, ShardError>((group, reply))
        }))
        .await?;

        let mut found: HashMap<Bytes, Option<Bytes>> = HashMap::with_capacity(keys.len());
        for (group, reply) in replies {
            let values = reply
                .into_array()
                .map_err(|other| ShardError::unexpected("mget", &other))?;
            // a short reply leaves the trailing keys absent
            for (key, value) in group.into_iter().zip(values) {
                let value = match value {
                    Frame::Null => None,
                    other => Some(
                        other
                            .to_bytes()
                            .ok_or_else(|| ShardError::unexpected("mget", &other))?,
                    ),
                };
                found.insert(key, value);
            }
        }

        Ok(keys
            .iter()
            .map(|k| found.get(k.as_ref()).cloned().flatten())
            .collect())
    }

    /// Writes several key/value pairs that may live on different shards.
    ///
    /// `pairs` alternates keys and values. Each shard's pairs are written
    /// with one MSET; there is no atomicity across shards.
    pub async fn mset<A: AsRef<[u8]>>(&self, pairs: &[A]) -> Result<(), ShardError> {
        if pairs.len() % 2 != 0 {
            return Err(ShardError::WrongArity("mset".into()));
        }
        if pairs.is_empty() {
            return Ok(());
        }

        let groups = self.partition(pairs.chunks_exact(2).map(|pair| {
            let key = Bytes::copy_from_slice(pair[0].as_ref());
            let value = Bytes::copy_from_slice(pair[1].as_ref());
            (self.ring().resolve_index(&key), vec![key, value])
        }));
        debug!(pairs = pairs.len() / 2, shards = groups.len(), "mset fan-out");

        try_join_all(groups.into_iter().map(|(shard, group)| async move {
            let request = wire_tokens("mset").chain(group).collect();
            let reply = self.call_shard(shard, "mset", request).await?;
            if reply.is_ok() {
                Ok(())
            } else {
                Err(ShardError::unexpected("mset", &reply))
            }
        }))
        .await?;
        Ok(())
    }

    /// Runs KEYS on every shard and concatenates the results.
    ///
    /// Results are grouped by shard in configuration order; order within
    /// a shard is whatever the server returned.
    pub async fn keys(&self, pattern: impl AsRef<[u8]>) -> Result<Vec<Bytes>, ShardError> {
        let pattern = Bytes::copy_from_slice(pattern.as_ref());
        let per_shard = try_join_all((0..self.servers().len()).map(|shard| {
            let request = wire_tokens("keys").chain([pattern.clone()]).collect();
            async move {
                let reply = self.call_shard(shard, "keys", request).await?;
                reply
                    .into_array()
                    .map_err(|other| ShardError::unexpected("keys", &other))?
                    .into_iter()
                    .map(|item| {
                        item.to_bytes()
                            .ok_or_else(|| ShardError::unexpected("keys", &item))
                    })
                    .collect::<Result<Vec<Bytes>, ShardError>>()
            }
        }))
        .await?;

        Ok(per_shard.into_iter().flatten().collect())
    }

    /// Groups items by shard, preserving submission order within each
    /// group. Groups come out in shard index order.
    fn partition<I>(&self, items: I) -> Vec<(usize, Vec<Bytes>)>
    where
        I: IntoIterator<Item = (usize, Vec<Bytes>)>,
    {
        let mut groups: Vec<Vec<Bytes>> = vec![Vec::new(); self.servers().len()];
        for (shard, item) in items {
            groups[shard].extend(item);
        }
        groups
            .into_iter()
            .enumerate()
            .filter(|(_, group)| !group.is_empty())
            .collect()
    }

    async fn call_shard(
        &self,
        shard: usize,
        command: &str,
        request: Vec<Bytes>,
    ) -> Result<Frame, ShardError> {
        match self.backend_at(shard).call(request).await {
            Ok(reply) => Ok(reply),
            Err(e) => {
                warn!(command, shard = %self.servers()[shard], error = %e, "fan-out sub-request failed");
                Err(e)
            }
        }
    }
}
