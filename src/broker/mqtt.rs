//! MQTT adapters over rumqttc.

use std::collections::VecDeque;
use std::time::Duration;

use rand::Rng;
use rumqttc::{
    AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS, SubAck, SubscribeReasonCode,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{Broker, BrokerError, Publisher, RawMessage, Subscription, WILDCARD};
use crate::pipeline::retry::Backoff;

const REQUEST_CAPACITY: usize = 64;
const MESSAGE_BUFFER: usize = 16;
const ACK_BUFFER: usize = 16;
const PUBLISH_ACK_TIMEOUT: Duration = Duration::from_secs(10);
const PUBLISH_RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Delay policy between subscription attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ReconnectPolicy {
    #[default]
    Fixed,
    Exponential,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub policy: ReconnectPolicy,
    /// Fixed delay, or the base delay for exponential backoff
    pub delay_secs: u64,
    /// Upper bound for exponential backoff
    pub max_delay_secs: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            policy: ReconnectPolicy::Fixed,
            delay_secs: 5,
            max_delay_secs: 60,
        }
    }
}

impl ReconnectConfig {
    pub fn backoff(&self) -> Backoff {
        match self.policy {
            ReconnectPolicy::Fixed => Backoff::fixed(Duration::from_secs(self.delay_secs)),
            ReconnectPolicy::Exponential => Backoff::exponential(
                self.delay_secs.saturating_mul(1000),
                self.max_delay_secs.max(self.delay_secs).saturating_mul(1000),
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id_prefix: String,
    pub keep_alive_secs: u64,
    pub subscribe_pattern: String,
    pub reconnect: ReconnectConfig,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "mosquitto".to_string(),
            port: 1883,
            client_id_prefix: "sensorbridge".to_string(),
            keep_alive_secs: 30,
            subscribe_pattern: WILDCARD.to_string(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl MqttConfig {
    fn options(&self, role: &str) -> MqttOptions {
        let suffix: u32 = rand::thread_rng().gen();
        let client_id = format!("{}-{}-{:08x}", self.client_id_prefix, role, suffix);
        let mut options = MqttOptions::new(client_id, self.host.clone(), self.port);
        options.set_keep_alive(Duration::from_secs(self.keep_alive_secs.max(5)));
        options.set_clean_session(true);
        options
    }
}

/// Subscribing side: one fresh connection per `subscribe` call.
#[derive(Debug, Clone)]
pub struct MqttBroker {
    config: MqttConfig,
}

impl MqttBroker {
    pub fn new(config: MqttConfig) -> Self {
        Self { config }
    }
}

#[async_trait::async_trait]
impl Broker for MqttBroker {
    type Subscription = MqttSubscription;

    async fn subscribe(&self, pattern: &str) -> Result<MqttSubscription, BrokerError> {
        let (client, mut eventloop) = AsyncClient::new(self.config.options("sub"), REQUEST_CAPACITY);
        client
            .subscribe(pattern, QoS::AtMostOnce)
            .await
            .map_err(|e| BrokerError::Subscribe {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })?;

        // Drive the connection until the broker confirms the subscription so
        // connect failures surface here rather than on the first receive.
        let mut early = VecDeque::new();
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::SubAck(ack))) => {
                    check_suback(pattern, &ack)?;
                    break;
                }
                Ok(Event::Incoming(Packet::Publish(p))) => early.push_back(to_raw(&p)),
                Ok(_) => {}
                Err(e) => return Err(BrokerError::Connection(e.to_string())),
            }
        }
        info!(
            host = %self.config.host,
            port = self.config.port,
            pattern,
            "subscribed to broker"
        );

        let (tx, rx) = mpsc::channel(MESSAGE_BUFFER);
        let driver = tokio::spawn(drive_subscription(eventloop, tx));

        Ok(MqttSubscription {
            _client: client,
            early,
            messages: rx,
            driver,
        })
    }
}

/// A SubAck can still refuse the filter (e.g. an ACL denial).
fn check_suback(pattern: &str, ack: &SubAck) -> Result<(), BrokerError> {
    if ack
        .return_codes
        .iter()
        .any(|code| matches!(code, SubscribeReasonCode::Failure))
    {
        return Err(BrokerError::Subscribe {
            pattern: pattern.to_string(),
            reason: "broker refused the subscription".to_string(),
        });
    }
    Ok(())
}

fn to_raw(publish: &rumqttc::Publish) -> RawMessage {
    RawMessage {
        topic: publish.topic.clone(),
        payload: String::from_utf8_lossy(&publish.payload).into_owned(),
    }
}

async fn drive_subscription(
    mut eventloop: EventLoop,
    tx: mpsc::Sender<Result<RawMessage, BrokerError>>,
) {
    loop {
        let item = match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(p))) => Ok(to_raw(&p)),
            Ok(Event::Incoming(Packet::Disconnect)) => Err(BrokerError::Closed),
            Ok(_) => continue,
            Err(e) => Err(BrokerError::Connection(e.to_string())),
        };
        let failed = item.is_err();
        if tx.send(item).await.is_err() || failed {
            break;
        }
    }
}

/// A subscription whose connection is driven by a background task.
pub struct MqttSubscription {
    _client: AsyncClient,
    early: VecDeque<RawMessage>,
    messages: mpsc::Receiver<Result<RawMessage, BrokerError>>,
    driver: JoinHandle<()>,
}

#[async_trait::async_trait]
impl Subscription for MqttSubscription {
    async fn next_message(&mut self) -> Result<RawMessage, BrokerError> {
        if let Some(message) = self.early.pop_front() {
            return Ok(message);
        }
        match self.messages.recv().await {
            Some(item) => item,
            None => Err(BrokerError::Closed),
        }
    }
}

impl Drop for MqttSubscription {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

#[derive(Debug)]
enum AckEvent {
    /// A publish left with this packet id.
    Sent(u16),
    Acked(u16),
    ConnectionLost(String),
}

/// Tracks one QoS 1 publish: the first `Sent` after it was queued carries its
/// packet id, and only the PUBACK for that id completes it.
#[derive(Debug, Default)]
struct AckWaiter {
    pkid: Option<u16>,
}

impl AckWaiter {
    fn observe(&mut self, event: AckEvent) -> Option<Result<(), String>> {
        match (event, self.pkid) {
            (AckEvent::Sent(id), None) => {
                self.pkid = Some(id);
                None
            }
            (AckEvent::Acked(id), Some(own)) if id == own => Some(Ok(())),
            (AckEvent::ConnectionLost(reason), _) => Some(Err(reason)),
            _ => None,
        }
    }
}

/// Publishing side: one shared outbound connection.
///
/// Publishes are serialized by a mutex; each waits for the PUBACK carrying its
/// own packet id before the next one is sent, so a returned `Ok` means the
/// broker has the message.
pub struct MqttPublisher {
    client: AsyncClient,
    acks: Mutex<mpsc::Receiver<AckEvent>>,
    driver: JoinHandle<()>,
}

impl MqttPublisher {
    /// Create the publisher. Must be called inside a tokio runtime; the
    /// connection is established lazily by the driver task.
    pub fn new(config: &MqttConfig) -> Self {
        let (client, eventloop) = AsyncClient::new(config.options("pub"), REQUEST_CAPACITY);
        let (tx, rx) = mpsc::channel(ACK_BUFFER);
        let driver = tokio::spawn(drive_publisher(eventloop, tx));
        Self {
            client,
            acks: Mutex::new(rx),
            driver,
        }
    }
}

async fn drive_publisher(mut eventloop: EventLoop, acks: mpsc::Sender<AckEvent>) {
    loop {
        let event = match eventloop.poll().await {
            Ok(Event::Outgoing(Outgoing::Publish(pkid))) => AckEvent::Sent(pkid),
            Ok(Event::Incoming(Packet::PubAck(ack))) => AckEvent::Acked(ack.pkid),
            Ok(_) => continue,
            Err(e) => {
                warn!(error = %e, "publish connection lost");
                // rumqttc reconnects on the next poll
                tokio::time::sleep(PUBLISH_RECONNECT_DELAY).await;
                AckEvent::ConnectionLost(e.to_string())
            }
        };
        // Events nobody waits for are dropped once the buffer is full
        if let Err(mpsc::error::TrySendError::Closed(_)) = acks.try_send(event) {
            break;
        }
    }
}

#[async_trait::async_trait]
impl Publisher for MqttPublisher {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), BrokerError> {
        let mut acks = self.acks.lock().await;
        // Discard acknowledgements left over from timed-out publishes
        while acks.try_recv().is_ok() {}

        let failed = |reason: String| BrokerError::Publish {
            topic: topic.to_string(),
            reason,
        };

        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload.as_bytes().to_vec())
            .await
            .map_err(|e| failed(e.to_string()))?;

        let deadline = tokio::time::Instant::now() + PUBLISH_ACK_TIMEOUT;
        let mut waiter = AckWaiter::default();
        loop {
            let event = match tokio::time::timeout_at(deadline, acks.recv()).await {
                Ok(Some(event)) => event,
                Ok(None) => return Err(failed("publisher stopped".to_string())),
                Err(_) => return Err(failed("timed out waiting for acknowledgement".to_string())),
            };
            match waiter.observe(event) {
                Some(Ok(())) => {
                    debug!(topic, pkid = ?waiter.pkid, "publish acknowledged");
                    return Ok(());
                }
                Some(Err(reason)) => return Err(failed(reason)),
                None => {}
            }
        }
    }
}

impl Drop for MqttPublisher {
    fn drop(&mut self) {
        self.driver.abort();
    }
}
