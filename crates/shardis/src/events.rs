//! Connection lifecycle events and the cluster-wide event bridge.
//!
//! Each backend publishes its lifecycle on a tokio broadcast channel.
//! [`ShardRouter::on`](crate::ShardRouter::on) and
//! [`ShardRouter::once`](crate::ShardRouter::once) subscribe to every
//! backend at once and hand each event to a single listener together
//! with the address that produced it.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::ring::BackendAddr;

/// Capacity of each connection's event channel. A listener that falls
/// further behind than this skips the oldest events.
pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Something that happened to a backend connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// TCP connection established.
    Connect,
    /// Handshake (AUTH / SELECT) done; the connection accepts commands.
    Ready,
    /// A transport or handshake failure, with its message.
    Error(String),
    /// The socket was dropped after a failure.
    Close,
    /// A call found the socket closed and is opening a new one.
    Reconnecting,
}

/// Event names a listener can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connect,
    Ready,
    Error,
    Close,
    Reconnecting,
}

impl ConnectionEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ConnectionEvent::Connect => EventKind::Connect,
            ConnectionEvent::Ready => EventKind::Ready,
            ConnectionEvent::Error(_) => EventKind::Error,
            ConnectionEvent::Close => EventKind::Close,
            ConnectionEvent::Reconnecting => EventKind::Reconnecting,
        }
    }
}

/// Listener invoked with the event and the address of the backend that
/// emitted it.
pub type EventListener = Arc<dyn Fn(&ConnectionEvent, &BackendAddr) + Send + Sync>;

/// Handle to a bridged subscription: one forwarding task per backend.
///
/// Dropping the handle leaves the listener attached; call
/// [`EventSubscription::unsubscribe`] to detach it.
#[derive(Debug)]
pub struct EventSubscription {
    tasks: Vec<JoinHandle<()>>,
}

impl EventSubscription {
    /// Detaches the listener from every backend.
    pub fn unsubscribe(self) {
        for task in self.tasks {
            task.abort();
        }
    }

    /// True once every per-backend task has stopped, e.g. after a `once`
    /// listener fired on every shard.
    pub fn is_finished(&self) -> bool {
        self.tasks.iter().all(JoinHandle::is_finished)
    }
}

/// Spawns one forwarding task per `(addr, receiver)` pair.
///
/// The receivers are created by the caller before this returns, so no
/// event published after subscription is missed. With `once`, each task
/// stops after its first matching event: the listener fires once per
/// shard, not once per cluster.
///
/// # Panics
///
/// Panics outside a tokio runtime (`tokio::spawn`).
pub(crate) fn bridge(
    sources: Vec<(BackendAddr, broadcast::Receiver<ConnectionEvent>)>,
    kind: EventKind,
    listener: EventListener,
    once: bool,
) -> EventSubscription {
    let tasks = sources
        .into_iter()
        .map(|(addr, mut rx)| {
            let listener = Arc::clone(&listener);
            tokio::spawn(async move {
                loop {
                    match rx.recv().await {
                        Ok(event) if event.kind() == kind => {
                            listener(&event, &addr);
                            if once {
                                break;
                            }
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(%addr, skipped, "event listener lagged, events dropped");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            })
        })
        .collect();

    EventSubscription { tasks }
}
