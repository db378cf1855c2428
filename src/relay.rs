//! Client-originated publish commands.
//!
//! Inbound frames are `{"topic": ..., "payload": ...}`. Anything that does not
//! parse, or lacks either key, is dropped without a reply. Publishing goes
//! through the shared [`Publisher`] and never touches the bridge's state.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::broker::{BrokerError, Publisher};

/// Result of handling one inbound frame.
#[derive(Debug, PartialEq)]
pub enum RelayOutcome {
    Published { topic: String },
    Ignored(&'static str),
    Failed(BrokerError),
}

/// A validated publish request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishCommand {
    pub topic: String,
    pub payload: String,
}

impl PublishCommand {
    /// Parse a client frame. Scalar payloads are published as their text;
    /// `null` publishes an empty payload.
    pub fn parse(text: &str) -> Result<Self, &'static str> {
        let value: Value = serde_json::from_str(text).map_err(|_| "not valid JSON")?;
        let Value::Object(mut map) = value else {
            return Err("not a JSON object");
        };

        let topic = match map.remove("topic") {
            Some(Value::String(topic)) => topic,
            Some(_) => return Err("topic is not a string"),
            None => return Err("missing topic"),
        };
        if topic.is_empty() {
            return Err("empty topic");
        }
        if topic.contains(['+', '#']) {
            return Err("topic contains a wildcard");
        }

        let payload = match map.remove("payload") {
            Some(Value::String(s)) => s,
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::Bool(b)) => b.to_string(),
            Some(Value::Null) => String::new(),
            Some(_) => return Err("payload is not a scalar"),
            None => return Err("missing payload"),
        };

        Ok(Self { topic, payload })
    }
}

#[derive(Clone)]
pub struct CommandRelay {
    publisher: Arc<dyn Publisher>,
}

impl CommandRelay {
    pub fn new(publisher: Arc<dyn Publisher>) -> Self {
        Self { publisher }
    }

    /// Handle one inbound text frame. Never fails: invalid frames are ignored
    /// and publish errors are logged.
    pub async fn handle_text(&self, text: &str) -> RelayOutcome {
        let command = match PublishCommand::parse(text) {
            Ok(command) => command,
            Err(reason) => {
                debug!(reason, "dropping client command");
                return RelayOutcome::Ignored(reason);
            }
        };

        match self.publisher.publish(&command.topic, &command.payload).await {
            Ok(()) => {
                debug!(topic = %command.topic, "relayed client publish");
                RelayOutcome::Published {
                    topic: command.topic,
                }
            }
            Err(e) => {
                warn!(topic = %command.topic, error = %e, "client publish failed");
                RelayOutcome::Failed(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{LocalBroker, RawMessage};

    fn relay() -> (LocalBroker, CommandRelay) {
        let broker = LocalBroker::new();
        let relay = CommandRelay::new(Arc::new(broker.clone()));
        (broker, relay)
    }

    #[tokio::test]
    async fn publishes_valid_command() {
        let (broker, relay) = relay();
        let outcome = relay
            .handle_text(r#"{"topic":"home/salon/light","payload":"on"}"#)
            .await;

        assert_eq!(
            outcome,
            RelayOutcome::Published {
                topic: "home/salon/light".to_string()
            }
        );
        assert_eq!(
            broker.published(),
            vec![RawMessage::new("home/salon/light", "on")]
        );
    }

    #[tokio::test]
    async fn missing_keys_are_ignored() {
        let (broker, relay) = relay();
        assert_eq!(
            relay.handle_text(r#"{"topic":"a"}"#).await,
            RelayOutcome::Ignored("missing payload")
        );
        assert_eq!(
            relay.handle_text(r#"{"payload":"x"}"#).await,
            RelayOutcome::Ignored("missing topic")
        );
        assert!(broker.published().is_empty());
    }

    #[tokio::test]
    async fn malformed_json_is_ignored() {
        let (broker, relay) = relay();
        assert_eq!(
            relay.handle_text("{not json").await,
            RelayOutcome::Ignored("not valid JSON")
        );
        assert_eq!(
            relay.handle_text("[1,2]").await,
            RelayOutcome::Ignored("not a JSON object")
        );
        assert!(broker.published().is_empty());
    }

    #[tokio::test]
    async fn wildcard_topics_are_rejected() {
        let (broker, relay) = relay();
        for topic in ["home/#", "home/+/light"] {
            let frame = serde_json::json!({ "topic": topic, "payload": "on" }).to_string();
            assert_eq!(
                relay.handle_text(&frame).await,
                RelayOutcome::Ignored("topic contains a wildcard")
            );
        }
        assert!(broker.published().is_empty());
    }

    #[test]
    fn scalar_payloads_become_text() {
        let parse = |s: &str| PublishCommand::parse(s).map(|c| c.payload);
        assert_eq!(parse(r#"{"topic":"t","payload":21.5}"#), Ok("21.5".to_string()));
        assert_eq!(parse(r#"{"topic":"t","payload":true}"#), Ok("true".to_string()));
        assert_eq!(parse(r#"{"topic":"t","payload":null}"#), Ok(String::new()));
        assert_eq!(
            parse(r#"{"topic":"t","payload":{"a":1}}"#),
            Err("payload is not a scalar")
        );
    }

    #[tokio::test]
    async fn broker_failure_is_reported_not_raised() {
        let (broker, relay) = relay();
        broker.set_available(false);
        let outcome = relay.handle_text(r#"{"topic":"a","payload":"1"}"#).await;
        assert!(matches!(outcome, RelayOutcome::Failed(BrokerError::Publish { .. })));
    }
}
