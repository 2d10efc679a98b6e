//! In-memory backend for unit tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use shardis_protocol::Frame;
use tokio::sync::{broadcast, Barrier};

use crate::backend::Backend;
use crate::error::ShardError;
use crate::events::{ConnectionEvent, EVENT_CHANNEL_CAPACITY};
use crate::ring::BackendAddr;
use crate::router::ShardRouter;

#[derive(Default)]
struct State {
    strings: HashMap<Bytes, Bytes>,
    hashes: HashMap<Bytes, HashMap<Bytes, Bytes>>,
    calls: usize,
    exec_batches: Vec<usize>,
    failure: Option<String>,
    canned: Option<Frame>,
}

/// A single-node key/value store speaking just enough of the command set
/// for router tests. Records how it was called.
pub(crate) struct MemoryBackend {
    state: Mutex<State>,
    events: broadcast::Sender<ConnectionEvent>,
}

impl MemoryBackend {
    pub(crate) fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            state: Mutex::default(),
            events,
        }
    }

    /// Number of `call` invocations so far.
    pub(crate) fn call_count(&self) -> usize {
        self.state.lock().unwrap().calls
    }

    /// Size of every batch passed to `exec`, in order.
    pub(crate) fn exec_batches(&self) -> Vec<usize> {
        self.state.lock().unwrap().exec_batches.clone()
    }

    /// Makes every later call and exec fail with `message`.
    pub(crate) fn fail_with(&self, message: &str) {
        self.state.lock().unwrap().failure = Some(message.to_string());
    }

    /// Makes every later call answer `reply` instead of running the
    /// command.
    pub(crate) fn answer_with(&self, reply: Frame) {
        self.state.lock().unwrap().canned = Some(reply);
    }

    pub(crate) fn stored(&self, key: &str) -> Option<Bytes> {
        self.state.lock().unwrap().strings.get(key.as_bytes()).cloned()
    }

    pub(crate) fn emit(&self, event: ConnectionEvent) {
        let _ = self.events.send(event);
    }
}

impl State {
    fn run(&mut self, request: &[Bytes]) -> Frame {
        let Some((name, args)) = request.split_first() else {
            return Frame::Error("ERR empty request".into());
        };
        match (&name[..], args) {
            (b"GET", [key]) => self
                .strings
                .get(key)
                .cloned()
                .map_or(Frame::Null, Frame::Bulk),
            (b"SET", [key, value]) => {
                self.strings.insert(key.clone(), value.clone());
                ok()
            }
            (b"DEL", keys) => {
                let removed = keys
                    .iter()
                    .filter(|k| {
                        self.strings.remove(*k).is_some() | self.hashes.remove(*k).is_some()
                    })
                    .count();
                Frame::Integer(removed as i64)
            }
            (b"EXISTS", keys) => Frame::Integer(
                keys.iter()
                    .filter(|k| self.strings.contains_key(*k) || self.hashes.contains_key(*k))
                    .count() as i64,
            ),
            (b"INCR", [key]) => {
                let current = match self.strings.get(key) {
                    None => 0,
                    Some(raw) => match std::str::from_utf8(raw).ok().and_then(|s| s.parse::<i64>().ok()) {
                        Some(n) => n,
                        None => {
                            return Frame::Error("ERR value is not an integer or out of range".into())
                        }
                    },
                };
                let next = current + 1;
                self.strings.insert(key.clone(), Bytes::from(next.to_string()));
                Frame::Integer(next)
            }
            (b"HSET", [key, field, value]) => {
                let created = self
                    .hashes
                    .entry(key.clone())
                    .or_default()
                    .insert(field.clone(), value.clone())
                    .is_none();
                Frame::Integer(i64::from(created))
            }
            (b"HGET", [key, field]) => self
                .hashes
                .get(key)
                .and_then(|h| h.get(field))
                .cloned()
                .map_or(Frame::Null, Frame::Bulk),
            (b"MGET", keys) => Frame::Array(
                keys.iter()
                    .map(|k| self.strings.get(k).cloned().map_or(Frame::Null, Frame::Bulk))
                    .collect(),
            ),
            (b"MSET", pairs) if pairs.len() % 2 == 0 => {
                for pair in pairs.chunks_exact(2) {
                    self.strings.insert(pair[0].clone(), pair[1].clone());
                }
                ok()
            }
            (b"KEYS", [pattern]) => {
                let mut keys: Vec<&Bytes> = self
                    .strings
                    .keys()
                    .chain(self.hashes.keys())
                    .filter(|k| glob_match(pattern, k))
                    .collect();
                keys.sort();
                Frame::Array(keys.into_iter().cloned().map(Frame::Bulk).collect())
            }
            _ => Frame::Error("ERR unknown command or wrong number of arguments".into()),
        }
    }
}

fn ok() -> Frame {
    Frame::Simple("OK".into())
}

/// `*` and `?` only.
fn glob_match(pattern: &[u8], input: &[u8]) -> bool {
    match pattern.split_first() {
        None => input.is_empty(),
        Some((b'*', rest)) => (0..=input.len()).any(|skip| glob_match(rest, &input[skip..])),
        Some((b'?', rest)) => !input.is_empty() && glob_match(rest, &input[1..]),
        Some((c, rest)) => input.first() == Some(c) && glob_match(rest, &input[1..]),
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn call(&self, request: Vec<Bytes>) -> Result<Frame, ShardError> {
        let mut state = self.state.lock().unwrap();
        state.calls += 1;
        if let Some(message) = &state.failure {
            return Err(ShardError::Server(message.clone()));
        }
        if let Some(reply) = &state.canned {
            return Ok(reply.clone());
        }
        match state.run(&request) {
            Frame::Error(message) => Err(ShardError::Server(message)),
            reply => Ok(reply),
        }
    }

    async fn exec(&self, batch: Vec<Vec<Bytes>>) -> Result<Vec<Frame>, ShardError> {
        let mut state = self.state.lock().unwrap();
        state.exec_batches.push(batch.len());
        if let Some(message) = &state.failure {
            return Err(ShardError::Server(message.clone()));
        }
        Ok(batch.iter().map(|request| state.run(request)).collect())
    }

    fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }
}

/// An in-memory backend whose calls first wait on a barrier shared with
/// its siblings. Sub-requests issued one after another never get past
/// the barrier.
pub(crate) struct GatedBackend {
    gate: Arc<Barrier>,
    inner: MemoryBackend,
}

#[async_trait]
impl Backend for GatedBackend {
    async fn call(&self, request: Vec<Bytes>) -> Result<Frame, ShardError> {
        self.gate.wait().await;
        self.inner.call(request).await
    }

    async fn exec(&self, batch: Vec<Vec<Bytes>>) -> Result<Vec<Frame>, ShardError> {
        self.gate.wait().await;
        self.inner.exec(batch).await
    }

    fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.events()
    }
}

/// A router over `n` gated backends sharing one barrier of `n` parties.
pub(crate) fn gated_cluster(n: usize) -> ShardRouter<GatedBackend> {
    let gate = Arc::new(Barrier::new(n));
    ShardRouter::from_backends((1..=n).map(|i| {
        let backend = GatedBackend {
            gate: Arc::clone(&gate),
            inner: MemoryBackend::new(),
        };
        (BackendAddr::new(format!("10.0.1.{i}:6379")), backend)
    }))
    .unwrap()
}

/// A router over `n` in-memory backends.
pub(crate) fn cluster(n: usize) -> ShardRouter<MemoryBackend> {
    ShardRouter::from_backends(
        (1..=n).map(|i| (BackendAddr::new(format!("10.0.0.{i}:6379")), MemoryBackend::new())),
    )
    .unwrap()
}

/// Two keys that route to different backends.
pub(crate) fn keys_on_distinct_shards<B: Backend>(router: &ShardRouter<B>) -> (String, String) {
    let first = "key:0".to_string();
    let owner = router.shard_for(&first).clone();
    let second = (1..)
        .map(|i| format!("key:{i}"))
        .find(|k| *router.shard_for(k) != owner)
        .unwrap();
    (first, second)
}

#[test]
fn glob() {
    assert!(glob_match(b"user:*", b"user:1"));
    assert!(glob_match(b"*", b""));
    assert!(glob_match(b"k?y", b"key"));
    assert!(!glob_match(b"user:*", b"other"));
}
