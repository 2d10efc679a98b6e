//! Test helpers: in-process fake servers speaking RESP.
//!
//! Each [`FakeServer`] listens on an ephemeral localhost port and keeps a
//! tiny string/hash store in memory, enough for the router to be driven
//! end to end through real [`shardis::Connection`]s.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Once};

use bytes::{Bytes, BytesMut};
use shardis::{ShardConfig, ShardRouter};
use shardis_protocol::{parse_frame, Frame};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Installs a fmt subscriber once per test binary. Set `RUST_LOG` to see
/// router logs.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "shardis=warn".into()),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Options for starting a fake server.
#[derive(Default, Clone)]
pub struct ServerOptions {
    pub requirepass: Option<String>,
}

#[derive(Default)]
struct Store {
    strings: HashMap<Bytes, Bytes>,
    hashes: HashMap<Bytes, HashMap<Bytes, Bytes>>,
    /// Every command name received, uppercased, in arrival order.
    log: Vec<String>,
    /// Databases chosen with SELECT.
    selected: Vec<u32>,
}

/// A fake server on 127.0.0.1. Stops accepting when dropped.
pub struct FakeServer {
    pub port: u16,
    store: Arc<Mutex<Store>>,
    accept_task: JoinHandle<()>,
}

impl FakeServer {
    pub async fn start() -> Self {
        Self::start_with(ServerOptions::default()).await
    }

    pub async fn start_with(opts: ServerOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let store = Arc::new(Mutex::new(Store::default()));

        let shared = Arc::clone(&store);
        let accept_task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(stream, Arc::clone(&shared), opts.clone()));
            }
        });

        Self {
            port,
            store,
            accept_task,
        }
    }

    pub fn addr(&self) -> String {
        format!("127.0.0.1:{}", self.port)
    }

    /// Command names this server has received, excluding the handshake.
    pub fn commands(&self) -> Vec<String> {
        self.store
            .lock()
            .unwrap()
            .log
            .iter()
            .filter(|c| !matches!(c.as_str(), "AUTH" | "SELECT"))
            .cloned()
            .collect()
    }

    pub fn selected_dbs(&self) -> Vec<u32> {
        self.store.lock().unwrap().selected.clone()
    }

    /// Whether `key` is stored here as a string.
    pub fn has(&self, key: &str) -> bool {
        self.store
            .lock()
            .unwrap()
            .strings
            .contains_key(key.as_bytes())
    }
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

/// Starts `n` fake servers and a router over them.
pub async fn cluster(n: usize) -> (Vec<FakeServer>, ShardRouter) {
    init_tracing();
    let mut servers = Vec::with_capacity(n);
    for _ in 0..n {
        servers.push(FakeServer::start().await);
    }
    let config = ShardConfig::new(servers.iter().map(FakeServer::addr));
    let router = ShardRouter::connect(config).await.unwrap();
    (servers, router)
}

/// The fake server a key routes to.
pub fn owner<'a>(servers: &'a [FakeServer], router: &ShardRouter, key: &str) -> &'a FakeServer {
    let addr = router.shard_for(key);
    servers
        .iter()
        .find(|s| s.addr() == addr.as_str())
        .unwrap()
}

/// Two keys that route to different servers.
pub fn keys_on_distinct_shards(router: &ShardRouter) -> (String, String) {
    let first = "key:0".to_string();
    let home = router.shard_for(&first).clone();
    let second = (1..)
        .map(|i| format!("key:{i}"))
        .find(|k| *router.shard_for(k) != home)
        .unwrap();
    (first, second)
}

/// A localhost address with nothing listening on it.
pub async fn unused_addr() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr.to_string()
}

struct Session {
    authed: bool,
    queued: Option<Vec<Vec<Bytes>>>,
}

async fn serve(mut stream: TcpStream, store: Arc<Mutex<Store>>, opts: ServerOptions) {
    let mut buf = BytesMut::with_capacity(4096);
    let mut out = BytesMut::new();
    let mut session = Session {
        authed: opts.requirepass.is_none(),
        queued: None,
    };

    loop {
        loop {
            match parse_frame(&buf) {
                Ok(Some((frame, consumed))) => {
                    let _ = buf.split_to(consumed);
                    let request = match frame.into_array() {
                        Ok(items) => items.into_iter().filter_map(|f| f.to_bytes()).collect(),
                        Err(_) => Vec::new(),
                    };
                    let reply = dispatch(&store, &opts, &mut session, request);
                    write_resp2(&reply, &mut out);
                }
                Ok(None) => break,
                Err(_) => return,
            }
        }
        if !out.is_empty() {
            if stream.write_all(&out).await.is_err() {
                return;
            }
            out.clear();
        }
        match stream.read_buf(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
    }
}

fn dispatch(
    store: &Mutex<Store>,
    opts: &ServerOptions,
    session: &mut Session,
    request: Vec<Bytes>,
) -> Frame {
    let Some(name) = request.first() else {
        return err("ERR empty command");
    };
    let name = String::from_utf8_lossy(name).to_ascii_uppercase();
    store.lock().unwrap().log.push(name.clone());

    if name == "AUTH" {
        return match (&opts.requirepass, request.get(1)) {
            (Some(pass), Some(given)) if pass.as_bytes() == &given[..] => {
                session.authed = true;
                ok()
            }
            (None, _) => err("ERR AUTH called without any password configured"),
            _ => err("WRONGPASS invalid username-password pair"),
        };
    }
    if !session.authed {
        return err("NOAUTH Authentication required.");
    }

    match name.as_str() {
        "MULTI" => {
            session.queued = Some(Vec::new());
            ok()
        }
        "EXEC" => match session.queued.take() {
            Some(queued) => {
                let mut store = store.lock().unwrap();
                Frame::Array(queued.iter().map(|req| execute(&mut store, req)).collect())
            }
            None => err("ERR EXEC without MULTI"),
        },
        _ => match &mut session.queued {
            Some(queued) => {
                queued.push(request);
                Frame::Simple("QUEUED".into())
            }
            None => execute(&mut store.lock().unwrap(), &request),
        },
    }
}

fn execute(store: &mut Store, request: &[Bytes]) -> Frame {
    let name = String::from_utf8_lossy(&request[0]).to_ascii_uppercase();
    let args = &request[1..];
    match (name.as_str(), args) {
        ("PING", []) => Frame::Simple("PONG".into()),
        ("SELECT", [db]) => match std::str::from_utf8(db).ok().and_then(|s| s.parse().ok()) {
            Some(db) => {
                store.selected.push(db);
                ok()
            }
            None => err("ERR invalid DB index"),
        },
        ("GET", [key]) => {
            if store.hashes.contains_key(key) {
                return wrongtype();
            }
            bulk_or_null(store.strings.get(key))
        }
        ("SET", [key, value]) => {
            store.hashes.remove(key);
            store.strings.insert(key.clone(), value.clone());
            ok()
        }
        ("DEL", keys) if !keys.is_empty() => {
            let mut removed = 0;
            for key in keys {
                if store.strings.remove(key).is_some() || store.hashes.remove(key).is_some() {
                    removed += 1;
                }
            }
            Frame::Integer(removed)
        }
        ("EXISTS", keys) if !keys.is_empty() => Frame::Integer(
            keys.iter()
                .filter(|k| store.strings.contains_key(*k) || store.hashes.contains_key(*k))
                .count() as i64,
        ),
        ("INCR", [key]) => {
            let current = match store.strings.get(key) {
                None => 0,
                Some(raw) => match std::str::from_utf8(raw).ok().and_then(|s| s.parse::<i64>().ok()) {
                    Some(n) => n,
                    None => return err("ERR value is not an integer or out of range"),
                },
            };
            store
                .strings
                .insert(key.clone(), Bytes::from((current + 1).to_string()));
            Frame::Integer(current + 1)
        }
        ("EXPIRE", [key, _]) => {
            let exists = store.strings.contains_key(key) || store.hashes.contains_key(key);
            Frame::Integer(i64::from(exists))
        }
        ("TTL", [key]) => {
            let exists = store.strings.contains_key(key) || store.hashes.contains_key(key);
            Frame::Integer(if exists { -1 } else { -2 })
        }
        ("HSET", [key, field, value]) => {
            if store.strings.contains_key(key) {
                return wrongtype();
            }
            let created = store
                .hashes
                .entry(key.clone())
                .or_default()
                .insert(field.clone(), value.clone())
                .is_none();
            Frame::Integer(i64::from(created))
        }
        ("HGET", [key, field]) => {
            if store.strings.contains_key(key) {
                return wrongtype();
            }
            bulk_or_null(store.hashes.get(key).and_then(|h| h.get(field)))
        }
        ("MGET", keys) if !keys.is_empty() => Frame::Array(
            keys.iter()
                .map(|k| bulk_or_null(store.strings.get(k)))
                .collect(),
        ),
        ("MSET", pairs) if !pairs.is_empty() && pairs.len() % 2 == 0 => {
            for pair in pairs.chunks_exact(2) {
                store.hashes.remove(&pair[0]);
                store.strings.insert(pair[0].clone(), pair[1].clone());
            }
            ok()
        }
        ("KEYS", [pattern]) => {
            let mut keys: Vec<Bytes> = store
                .strings
                .keys()
                .chain(store.hashes.keys())
                .filter(|k| glob_match(pattern, k))
                .cloned()
                .collect();
            keys.sort();
            Frame::Array(keys.into_iter().map(Frame::Bulk).collect())
        }
        _ => err(&format!("ERR unknown command '{name}', or wrong number of arguments")),
    }
}

fn ok() -> Frame {
    Frame::Simple("OK".into())
}

fn err(message: &str) -> Frame {
    Frame::Error(message.into())
}

fn wrongtype() -> Frame {
    err("WRONGTYPE Operation against a key holding the wrong kind of value")
}

fn bulk_or_null(value: Option<&Bytes>) -> Frame {
    value.cloned().map_or(Frame::Null, Frame::Bulk)
}

/// Encodes nulls as `$-1`, the way a RESP2 server answers.
fn write_resp2(frame: &Frame, out: &mut BytesMut) {
    match frame {
        Frame::Null => out.extend_from_slice(b"$-1\r\n"),
        Frame::Array(items) => {
            out.extend_from_slice(format!("*{}\r\n", items.len()).as_bytes());
            for item in items {
                write_resp2(item, out);
            }
        }
        other => other.serialize(out),
    }
}

/// Backtracking matcher for `*` and `?`.
fn glob_match(pat: &[u8], inp: &[u8]) -> bool {
    let (mut pi, mut ii) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ii < inp.len() {
        if pi < pat.len() && (pat[pi] == b'?' || pat[pi] == inp[ii]) {
            pi += 1;
            ii += 1;
        } else if pi < pat.len() && pat[pi] == b'*' {
            star = Some((pi, ii));
            pi += 1;
        } else if let Some((star_pi, star_ii)) = star {
            pi = star_pi + 1;
            ii = star_ii + 1;
            star = Some((star_pi, star_ii + 1));
        } else {
            return false;
        }
    }
    pat[pi..].iter().all(|&c| c == b'*')
}
