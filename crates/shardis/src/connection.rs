//! Async TCP connection to one backend server.
//!
//! The socket is opened lazily, on [`Backend::connect`] or the first call,
//! and the handshake runs AUTH and SELECT when configured. Requests are
//! serialized as RESP arrays of bulk strings; a transaction is written
//! as a single pipelined buffer (MULTI, the queued commands, EXEC) and
//! its replies are read back in one pass.
//!
//! A transport failure drops the socket and emits `Error` and `Close`.
//! The failed call is not retried; the next call reconnects.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use shardis_protocol::{parse_frame, Frame};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use crate::backend::Backend;
use crate::config::{ClientOptions, ShardConfig};
use crate::error::{ConnectionError, ShardError};
use crate::events::{ConnectionEvent, EVENT_CHANNEL_CAPACITY};
use crate::ring::BackendAddr;

/// A lazily opened connection to one backend.
pub struct Connection {
    addr: BackendAddr,
    options: ClientOptions,
    password: Option<String>,
    database: Option<u32>,
    transport: Mutex<Option<Transport>>,
    events: broadcast::Sender<ConnectionEvent>,
    /// Set after the first successful handshake; later opens are reconnects.
    connected_once: AtomicBool,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("addr", &self.addr)
            .field("database", &self.database)
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Creates an unconnected handle using the shared settings of `config`.
    pub fn new(addr: BackendAddr, config: &ShardConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            addr,
            options: config.client_options.clone(),
            password: config.password.clone(),
            database: config.database,
            transport: Mutex::new(None),
            events,
            connected_once: AtomicBool::new(false),
        }
    }

    pub fn addr(&self) -> &BackendAddr {
        &self.addr
    }

    /// Returns true while a socket is open.
    pub async fn is_connected(&self) -> bool {
        self.transport.lock().await.is_some()
    }

    /// Drops the socket, if any. The next call reconnects.
    pub async fn disconnect(&self) {
        let mut guard = self.transport.lock().await;
        if let Some(mut transport) = guard.take() {
            let _ = transport.stream.shutdown().await;
            self.emit(ConnectionEvent::Close);
        }
    }

    /// Writes `requests` and reads exactly one reply per request.
    ///
    /// The transport is taken out of its slot for the exchange and only
    /// put back on success, so a call dropped mid-reply (or one that
    /// failed) never leaves a half-read stream behind.
    async fn round_trip(&self, requests: &[Vec<Bytes>]) -> Result<Vec<Frame>, ConnectionError> {
        let mut guard = self.transport.lock().await;

        let transport = match guard.take() {
            Some(transport) => transport,
            None => {
                if self.connected_once.load(Ordering::Relaxed) {
                    self.emit(ConnectionEvent::Reconnecting);
                }
                self.open().await?
            }
        };
        let mut in_flight = InFlight {
            events: &self.events,
            transport: Some(transport),
        };
        let Some(transport) = in_flight.transport.as_mut() else {
            return Err(ConnectionError::Disconnected);
        };

        let exchange = transport.exchange(requests);
        let result = match self.options.command_timeout() {
            Some(limit) => match tokio::time::timeout(limit, exchange).await {
                Ok(r) => r,
                Err(_) => Err(ConnectionError::Timeout(limit.as_millis() as u64)),
            },
            None => exchange.await,
        };

        match result {
            Ok(replies) => {
                *guard = in_flight.release();
                Ok(replies)
            }
            Err(e) => {
                warn!(addr = %self.addr, error = %e, "backend call failed, dropping connection");
                self.emit(ConnectionEvent::Error(e.to_string()));
                // in_flight drops the socket and emits Close
                Err(e)
            }
        }
    }

    /// Opens the socket and runs the handshake.
    async fn open(&self) -> Result<Transport, ConnectionError> {
        let transport = match self.try_open().await {
            Ok(t) => t,
            Err(e) => {
                self.emit(ConnectionEvent::Error(e.to_string()));
                return Err(e);
            }
        };
        self.connected_once.store(true, Ordering::Relaxed);
        info!(addr = %self.addr, db = ?self.database, "backend ready");
        self.emit(ConnectionEvent::Ready);
        Ok(transport)
    }

    async fn try_open(&self) -> Result<Transport, ConnectionError> {
        let limit = self.options.connect_timeout();
        let stream = tokio::time::timeout(limit, TcpStream::connect(self.addr.as_str()))
            .await
            .map_err(|_| ConnectionError::Timeout(limit.as_millis() as u64))??;
        stream.set_nodelay(self.options.nodelay)?;

        debug!(addr = %self.addr, "tcp connection established");
        self.emit(ConnectionEvent::Connect);

        let mut transport = Transport::new(stream);
        if let Some(password) = &self.password {
            let reply = transport
                .exchange(&[vec![Bytes::from_static(b"AUTH"), Bytes::from(password.clone())]])
                .await?;
            match reply.first() {
                Some(f) if f.is_ok() => {}
                Some(Frame::Error(e)) => return Err(ConnectionError::AuthFailed(e.clone())),
                _ => {
                    return Err(ConnectionError::AuthFailed(
                        "unexpected response to AUTH".into(),
                    ))
                }
            }
        }
        if let Some(db) = self.database {
            let reply = transport
                .exchange(&[vec![Bytes::from_static(b"SELECT"), Bytes::from(db.to_string())]])
                .await?;
            match reply.first() {
                Some(f) if f.is_ok() => {}
                Some(other) => {
                    return Err(ConnectionError::SelectFailed {
                        db,
                        reason: other.to_string(),
                    })
                }
                None => return Err(ConnectionError::Disconnected),
            }
        }
        Ok(transport)
    }

    fn emit(&self, event: ConnectionEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl Backend for Connection {
    async fn call(&self, request: Vec<Bytes>) -> Result<Frame, ShardError> {
        let mut replies = self.round_trip(std::slice::from_ref(&request)).await?;
        match replies.pop() {
            Some(Frame::Error(msg)) => Err(ShardError::Server(msg)),
            Some(frame) => Ok(frame),
            None => Err(ConnectionError::Disconnected.into()),
        }
    }

    async fn exec(&self, batch: Vec<Vec<Bytes>>) -> Result<Vec<Frame>, ShardError> {
        let queued = batch.len();
        let mut requests = Vec::with_capacity(queued + 2);
        requests.push(vec![Bytes::from_static(b"MULTI")]);
        requests.extend(batch);
        requests.push(vec![Bytes::from_static(b"EXEC")]);

        let mut replies = self.round_trip(&requests).await?;

        if let Some(Frame::Error(msg)) = replies.first() {
            return Err(ShardError::Server(msg.clone()));
        }
        match replies.pop() {
            Some(Frame::Array(results)) if results.len() == queued => Ok(results),
            // EXECABORT: a command was rejected while queueing
            Some(Frame::Error(msg)) => Err(ShardError::Server(msg)),
            Some(Frame::Null) => Err(ShardError::Server(
                "EXECABORT transaction discarded because a watched key changed".into(),
            )),
            Some(other) => Err(ShardError::unexpected("EXEC", &other)),
            None => Err(ConnectionError::Disconnected.into()),
        }
    }

    fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    async fn connect(&self) -> Result<(), ShardError> {
        let mut guard = self.transport.lock().await;
        if guard.is_none() {
            *guard = Some(self.open().await?);
        }
        Ok(())
    }
}

/// A transport taken out of its slot for one exchange.
///
/// Dropping it without [`InFlight::release`] closes the socket and emits
/// `Close`, including when the calling future is cancelled mid-exchange.
struct InFlight<'a> {
    events: &'a broadcast::Sender<ConnectionEvent>,
    transport: Option<Transport>,
}

impl InFlight<'_> {
    fn release(mut self) -> Option<Transport> {
        self.transport.take()
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.transport.take().is_some() {
            let _ = self.events.send(ConnectionEvent::Close);
        }
    }
}

/// An open socket with its buffers.
struct Transport {
    stream: TcpStream,
    read_buf: BytesMut,
    write_buf: BytesMut,
}

impl Transport {
    fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            read_buf: BytesMut::with_capacity(4096),
            write_buf: BytesMut::with_capacity(4096),
        }
    }

    /// Writes all requests in one flush, then reads one reply each.
    async fn exchange(&mut self, requests: &[Vec<Bytes>]) -> Result<Vec<Frame>, ConnectionError> {
        self.write_buf.clear();
        for request in requests {
            Frame::command(request.iter().cloned()).serialize(&mut self.write_buf);
        }
        self.stream.write_all(&self.write_buf).await?;
        self.stream.flush().await?;

        let mut replies = Vec::with_capacity(requests.len());
        for _ in 0..requests.len() {
            replies.push(self.read_frame().await?);
        }
        Ok(replies)
    }

    /// Reads one complete frame, pulling more bytes as needed.
    async fn read_frame(&mut self) -> Result<Frame, ConnectionError> {
        loop {
            if let Some((frame, consumed)) = parse_frame(&self.read_buf)? {
                let _ = self.read_buf.split_to(consumed);
                return Ok(frame);
            }
            if self.stream.read_buf(&mut self.read_buf).await? == 0 {
                return Err(ConnectionError::Disconnected);
            }
        }
    }
}
