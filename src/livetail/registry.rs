//! Fanout registry: the set of connected live clients.

use super::{LiveMessage, LiveStateCache};

/// Identifier assigned to a client connection for explicit deregistration.
pub type ClientId = u64;

/// The client's transport is gone; it will not accept further messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("client disconnected")]
pub struct ClientGone;

/// Outbound half of a live client connection.
#[async_trait::async_trait]
pub trait ClientSink: Send + Sync {
    /// Deliver one serialized message. An error means the client is gone.
    async fn send(&self, text: String) -> Result<(), ClientGone>;
}

/// Result of one broadcast pass.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct BroadcastResult {
    pub delivered: usize,
    pub pruned: Vec<ClientId>,
}

/// Registered clients in registration order.
pub struct FanoutRegistry<C> {
    clients: Vec<(ClientId, C)>,
}

impl<C> Default for FanoutRegistry<C> {
    fn default() -> Self {
        Self {
            clients: Vec::new(),
        }
    }
}

impl<C: ClientSink> FanoutRegistry<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hydrate the client with one message per cached topic, then add it.
    ///
    /// A client that fails during hydration is never added.
    pub async fn register(
        &mut self,
        id: ClientId,
        client: C,
        cache: &LiveStateCache,
    ) -> Result<(), ClientGone> {
        for (topic, payload) in cache.snapshot() {
            client.send(LiveMessage::new(topic, payload).to_json()).await?;
        }
        self.clients.push((id, client));
        tracing::debug!(client_id = id, clients = self.clients.len(), "client registered");
        Ok(())
    }

    /// Remove a client. Unknown ids are ignored.
    pub fn deregister(&mut self, id: ClientId) -> bool {
        let before = self.clients.len();
        self.clients.retain(|(cid, _)| *cid != id);
        let removed = self.clients.len() != before;
        if removed {
            tracing::debug!(client_id = id, clients = self.clients.len(), "client deregistered");
        }
        removed
    }

    /// Send `text` to every client in order. Clients whose send fails are
    /// dropped in the same pass; there is no retry or buffering.
    pub async fn broadcast(&mut self, text: &str) -> BroadcastResult {
        let mut result = BroadcastResult::default();

        for (id, client) in &self.clients {
            match client.send(text.to_string()).await {
                Ok(()) => result.delivered += 1,
                Err(ClientGone) => result.pruned.push(*id),
            }
        }

        if !result.pruned.is_empty() {
            self.clients.retain(|(id, _)| !result.pruned.contains(id));
            tracing::debug!(
                pruned = result.pruned.len(),
                clients = self.clients.len(),
                "pruned disconnected clients"
            );
        }

        result
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn contains(&self, id: ClientId) -> bool {
        self.clients.iter().any(|(cid, _)| *cid == id)
    }
}
