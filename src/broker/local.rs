//! In-process broker.
//!
//! Implements both sides of the broker seam without a network: publishes are
//! routed to matching subscriptions using MQTT topic-filter rules. Used for
//! local development and by the test suites, which also use it to simulate
//! outages (`set_available`, `disconnect_all`).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;

use super::{Broker, BrokerError, Publisher, RawMessage, Subscription};

#[derive(Default)]
struct LocalState {
    unavailable: bool,
    subscribers: Vec<(String, mpsc::UnboundedSender<RawMessage>)>,
    published: Vec<RawMessage>,
}

#[derive(Clone, Default)]
pub struct LocalBroker {
    state: Arc<Mutex<LocalState>>,
    subscribe_attempts: Arc<AtomicUsize>,
}

impl LocalBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, LocalState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// While unavailable, subscribe and publish fail.
    pub fn set_available(&self, available: bool) {
        self.lock().unavailable = !available;
    }

    /// Drop every open subscription. Subscribers see `BrokerError::Closed`
    /// after draining messages already delivered to them.
    pub fn disconnect_all(&self) {
        self.lock().subscribers.clear();
    }

    /// Route a message to every matching subscription. Returns how many
    /// subscriptions received it.
    pub fn deliver(&self, topic: &str, payload: &str) -> usize {
        let mut state = self.lock();
        state.subscribers.retain(|(_, tx)| !tx.is_closed());
        state
            .subscribers
            .iter()
            .filter(|(filter, _)| topic_matches(filter, topic))
            .filter(|(_, tx)| tx.send(RawMessage::new(topic, payload)).is_ok())
            .count()
    }

    pub fn subscriber_count(&self) -> usize {
        let mut state = self.lock();
        state.subscribers.retain(|(_, tx)| !tx.is_closed());
        state.subscribers.len()
    }

    pub fn subscribe_attempts(&self) -> usize {
        self.subscribe_attempts.load(Ordering::SeqCst)
    }

    /// Every message accepted through [`Publisher::publish`].
    pub fn published(&self) -> Vec<RawMessage> {
        self.lock().published.clone()
    }
}

#[async_trait::async_trait]
impl Broker for LocalBroker {
    type Subscription = LocalSubscription;

    async fn subscribe(&self, pattern: &str) -> Result<LocalSubscription, BrokerError> {
        self.subscribe_attempts.fetch_add(1, Ordering::SeqCst);
        let mut state = self.lock();
        if state.unavailable {
            return Err(BrokerError::Connection("broker unavailable".to_string()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        state.subscribers.push((pattern.to_string(), tx));
        Ok(LocalSubscription { messages: rx })
    }
}

#[async_trait::async_trait]
impl Publisher for LocalBroker {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), BrokerError> {
        {
            let mut state = self.lock();
            if state.unavailable {
                return Err(BrokerError::Publish {
                    topic: topic.to_string(),
                    reason: "broker unavailable".to_string(),
                });
            }
            state.published.push(RawMessage::new(topic, payload));
        }
        self.deliver(topic, payload);
        Ok(())
    }
}

pub struct LocalSubscription {
    messages: mpsc::UnboundedReceiver<RawMessage>,
}

#[async_trait::async_trait]
impl Subscription for LocalSubscription {
    async fn next_message(&mut self) -> Result<RawMessage, BrokerError> {
        self.messages.recv().await.ok_or(BrokerError::Closed)
    }
}

/// MQTT topic-filter matching: `+` matches one level, a trailing `#` matches
/// any remaining levels (including none).
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut levels = topic.split('/');
    for part in filter.split('/') {
        match part {
            "#" => return true,
            "+" => {
                if levels.next().is_none() {
                    return false;
                }
            }
            literal => {
                if levels.next() != Some(literal) {
                    return false;
                }
            }
        }
    }
    levels.next().is_none()
}
