//! The bridge service: live cache, client fanout and persistence, owned by a
//! single scheduling context (the [`Supervisor`] task).
//!
//! Other tasks (HTTP and WebSocket handlers) never touch this state directly;
//! they send [`Command`]s through a [`BridgeHandle`]. Commands are executed
//! between inbound messages, so a client's hydration snapshot is always
//! consistent with the live messages that follow it.

mod supervisor;

pub use supervisor::Supervisor;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::broker::RawMessage;
use crate::decode::decode_payload;
use crate::livetail::{
    BroadcastResult, ClientId, ClientSink, FanoutRegistry, LiveMessage, LiveStateCache,
};
use crate::pipeline::TimeSeriesSink;

const COMMAND_BUFFER: usize = 64;

/// Requests served on the bridge's context.
pub enum Command<C> {
    Register { id: ClientId, client: C },
    Deregister { id: ClientId },
    Topics { reply: oneshot::Sender<Vec<String>> },
}

/// What happened to the decoded point of one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persisted {
    Written,
    /// The payload decodes to no point.
    Skipped,
    /// The write failed; already logged.
    Failed,
}

#[derive(Debug, PartialEq, Eq)]
pub struct IngestReport {
    pub persisted: Persisted,
    pub broadcast: BroadcastResult,
}

pub struct Bridge<C> {
    cache: LiveStateCache,
    clients: FanoutRegistry<C>,
    sink: Arc<dyn TimeSeriesSink>,
}

impl<C: ClientSink> Bridge<C> {
    pub fn new(sink: Arc<dyn TimeSeriesSink>) -> Self {
        Self {
            cache: LiveStateCache::new(),
            clients: FanoutRegistry::new(),
            sink,
        }
    }

    pub fn cache(&self) -> &LiveStateCache {
        &self.cache
    }

    pub fn clients(&self) -> &FanoutRegistry<C> {
        &self.clients
    }

    /// Process one inbound message: update the cache, persist its decoded
    /// point (if any), then fan it out. A failed write is logged and does not
    /// stop the fanout.
    pub async fn ingest(&mut self, message: RawMessage) -> IngestReport {
        let RawMessage { topic, payload } = message;
        self.cache.put(&topic, &payload);

        let persisted = match decode_payload(&topic, &payload, Utc::now()) {
            Some(point) => match self.sink.write(&point).await {
                Ok(()) => Persisted::Written,
                Err(e) => {
                    warn!(topic = %topic, error = %e, "failed to persist point");
                    Persisted::Failed
                }
            },
            None => {
                debug!(topic = %topic, "payload produced no point");
                Persisted::Skipped
            }
        };

        let text = LiveMessage::new(topic, payload).to_json();
        let broadcast = self.clients.broadcast(&text).await;

        IngestReport {
            persisted,
            broadcast,
        }
    }

    pub async fn handle(&mut self, command: Command<C>) {
        match command {
            Command::Register { id, client } => {
                if self.clients.register(id, client, &self.cache).await.is_err() {
                    debug!(client_id = id, "client left during hydration");
                }
            }
            Command::Deregister { id } => {
                self.clients.deregister(id);
            }
            Command::Topics { reply } => {
                let _ = reply.send(self.cache.topics());
            }
        }
    }
}

/// The bridge task has stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("bridge is not running")]
pub struct BridgeStopped;

/// Cloneable access to a running bridge.
pub struct BridgeHandle<C> {
    commands: mpsc::Sender<Command<C>>,
    next_id: Arc<AtomicU64>,
}

impl<C> Clone for BridgeHandle<C> {
    fn clone(&self) -> Self {
        Self {
            commands: self.commands.clone(),
            next_id: self.next_id.clone(),
        }
    }
}

impl<C: ClientSink> BridgeHandle<C> {
    pub(crate) fn channel() -> (Self, mpsc::Receiver<Command<C>>) {
        let (commands, rx) = mpsc::channel(COMMAND_BUFFER);
        let handle = Self {
            commands,
            next_id: Arc::new(AtomicU64::new(1)),
        };
        (handle, rx)
    }

    /// Queue a client for registration. The client receives the cache
    /// snapshot, then live messages.
    pub async fn register(&self, client: C) -> Result<ClientId, BridgeStopped> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.commands
            .send(Command::Register { id, client })
            .await
            .map_err(|_| BridgeStopped)?;
        Ok(id)
    }

    pub async fn deregister(&self, id: ClientId) {
        let _ = self.commands.send(Command::Deregister { id }).await;
    }

    /// Topics currently in the live cache.
    pub async fn topics(&self) -> Result<Vec<String>, BridgeStopped> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Topics { reply })
            .await
            .map_err(|_| BridgeStopped)?;
        rx.await.map_err(|_| BridgeStopped)
    }
}
