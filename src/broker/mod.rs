//! Publish/subscribe broker seam.
//!
//! The bridge needs two things from the broker: a wildcard subscription that
//! yields every published message, and a way to publish. Both are traits so
//! the supervisor and relay can run against an in-process broker in tests.

pub mod local;
pub mod mqtt;

pub use local::LocalBroker;
pub use mqtt::{MqttBroker, MqttConfig, MqttPublisher, ReconnectConfig, ReconnectPolicy};

/// Topic filter matching every topic.
pub const WILDCARD: &str = "#";

/// A message as delivered by the broker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawMessage {
    pub topic: String,
    pub payload: String,
}

impl RawMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    #[error("broker connection failed: {0}")]
    Connection(String),
    #[error("subscribe to {pattern} failed: {reason}")]
    Subscribe { pattern: String, reason: String },
    #[error("publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },
    #[error("broker closed the connection")]
    Closed,
}

/// Opens subscriptions. Each call establishes a fresh connection.
#[async_trait::async_trait]
pub trait Broker: Send + Sync + 'static {
    type Subscription: Subscription;

    async fn subscribe(&self, pattern: &str) -> Result<Self::Subscription, BrokerError>;
}

/// A live subscription. Any error means the connection is gone.
#[async_trait::async_trait]
pub trait Subscription: Send {
    /// Wait for the next message. Must be cancel-safe: dropping the future
    /// must not lose a message.
    async fn next_message(&mut self) -> Result<RawMessage, BrokerError>;
}

/// Outbound publishing, independent of any subscription.
#[async_trait::async_trait]
pub trait Publisher: Send + Sync + 'static {
    /// Publish once; returns after the broker acknowledged the message.
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), BrokerError>;
}
