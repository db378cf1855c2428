//! Broker connection supervisor.
//!
//! Holds exactly one subscription at a time. Any connection-level error ends
//! the session; the supervisor then waits out the backoff delay and
//! subscribes again, with no retry ceiling. Bridge commands keep being served
//! while connecting and while waiting. Cancellation interrupts every wait.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{Bridge, BridgeHandle, Command};
use crate::broker::{Broker, BrokerError, Subscription};
use crate::livetail::ClientSink;
use crate::pipeline::retry::Backoff;
use crate::pipeline::TimeSeriesSink;

enum SessionEnd {
    Shutdown,
    Failed {
        error: BrokerError,
        /// The subscription had been established before the failure.
        established: bool,
    },
}

pub struct Supervisor<B, C> {
    broker: B,
    pattern: String,
    backoff: Backoff,
    bridge: Bridge<C>,
    commands: mpsc::Receiver<Command<C>>,
}

impl<B: Broker, C: ClientSink> Supervisor<B, C> {
    pub fn new(
        broker: B,
        sink: Arc<dyn TimeSeriesSink>,
        pattern: impl Into<String>,
        backoff: Backoff,
    ) -> (Self, BridgeHandle<C>) {
        let (handle, commands) = BridgeHandle::channel();
        let supervisor = Self {
            broker,
            pattern: pattern.into(),
            backoff,
            bridge: Bridge::new(sink),
            commands,
        };
        (supervisor, handle)
    }

    /// Run until `shutdown` is cancelled.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let mut attempt: u32 = 0;

        loop {
            match self.session(&shutdown).await {
                SessionEnd::Shutdown => break,
                SessionEnd::Failed { error, established } => {
                    if established {
                        attempt = 0;
                    }
                    let delay = self.backoff.delay_for_attempt(attempt);
                    attempt = attempt.saturating_add(1);
                    warn!(
                        error = %error,
                        attempt,
                        retry_in_ms = delay.as_millis() as u64,
                        "broker connection lost, retrying"
                    );
                    if !self.wait(delay, &shutdown).await {
                        break;
                    }
                }
            }
        }

        info!("supervisor stopped");
    }

    async fn session(&mut self, shutdown: &CancellationToken) -> SessionEnd {
        let mut subscription = {
            let subscribe = self.broker.subscribe(&self.pattern);
            tokio::pin!(subscribe);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return SessionEnd::Shutdown,
                    result = &mut subscribe => match result {
                        Ok(subscription) => break subscription,
                        Err(error) => return SessionEnd::Failed { error, established: false },
                    },
                    Some(command) = self.commands.recv() => self.bridge.handle(command).await,
                }
            }
        };
        info!(pattern = %self.pattern, "broker subscription established");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return SessionEnd::Shutdown,
                result = subscription.next_message() => match result {
                    Ok(message) => {
                        tokio::select! {
                            _ = shutdown.cancelled() => return SessionEnd::Shutdown,
                            _ = self.bridge.ingest(message) => {}
                        }
                    }
                    Err(error) => return SessionEnd::Failed { error, established: true },
                },
                Some(command) = self.commands.recv() => self.bridge.handle(command).await,
            }
        }
    }

    /// Sleep for `delay` while serving commands. Returns false on shutdown.
    async fn wait(&mut self, delay: Duration, shutdown: &CancellationToken) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return false,
                _ = &mut sleep => return true,
                Some(command) = self.commands.recv() => self.bridge.handle(command).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::LocalBroker;
    use crate::livetail::ClientGone;
    use crate::pipeline::MemorySink;
    use std::sync::Mutex;
    use tokio::time::Instant;

    #[derive(Clone, Default)]
    struct RecordingClient {
        received: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait::async_trait]
    impl ClientSink for RecordingClient {
        async fn send(&self, text: String) -> Result<(), ClientGone> {
            self.received.lock().unwrap().push(text);
            Ok(())
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..10_000 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    fn start(
        broker: &LocalBroker,
        sink: &Arc<MemorySink>,
    ) -> (
        BridgeHandle<RecordingClient>,
        CancellationToken,
        tokio::task::JoinHandle<()>,
    ) {
        let (supervisor, handle) = Supervisor::new(
            broker.clone(),
            sink.clone(),
            "#",
            Backoff::fixed(Duration::from_secs(5)),
        );
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(supervisor.run(shutdown.clone()));
        (handle, shutdown, task)
    }

    #[tokio::test(start_paused = true)]
    async fn resumes_delivery_after_reconnect_delay() {
        let broker = LocalBroker::new();
        let sink = Arc::new(MemorySink::new());
        let (_handle, shutdown, task) = start(&broker, &sink);

        wait_until(|| broker.subscriber_count() == 1).await;
        broker.deliver("home/salon/temp", "21");
        broker.disconnect_all();
        let dropped_at = Instant::now();

        wait_until(|| broker.subscriber_count() == 1).await;
        assert!(dropped_at.elapsed() >= Duration::from_secs(5));
        assert_eq!(broker.subscribe_attempts(), 2);

        broker.deliver("home/salon/temp", "22");
        wait_until(|| sink.len() == 2).await;

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn retries_unavailable_broker_without_ceiling() {
        let broker = LocalBroker::new();
        broker.set_available(false);
        let sink = Arc::new(MemorySink::new());
        let (handle, shutdown, task) = start(&broker, &sink);

        wait_until(|| broker.subscribe_attempts() >= 10).await;
        // Commands are served while waiting to reconnect
        assert_eq!(handle.topics().await, Ok(vec![]));

        broker.set_available(true);
        wait_until(|| broker.subscriber_count() == 1).await;
        broker.deliver("status", "online");
        wait_until(|| sink.len() == 1).await;
        assert_eq!(handle.topics().await, Ok(vec!["status".to_string()]));

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_precedes_live_messages() {
        let broker = LocalBroker::new();
        let sink = Arc::new(MemorySink::new());
        let (handle, shutdown, task) = start(&broker, &sink);

        wait_until(|| broker.subscriber_count() == 1).await;
        broker.deliver("a", "1");
        broker.deliver("b", "2");
        wait_until(|| sink.len() == 2).await;

        let client = RecordingClient::default();
        handle.register(client.clone()).await.unwrap();
        // Commands run in order: once this replies, registration is done
        handle.topics().await.unwrap();
        broker.deliver("a", "3");
        wait_until(|| client.received.lock().unwrap().len() == 3).await;

        let received = client.received.lock().unwrap().clone();
        assert_eq!(
            received,
            vec![
                r#"{"topic":"a","payload":"1"}"#.to_string(),
                r#"{"topic":"b","payload":"2"}"#.to_string(),
                r#"{"topic":"a","payload":"3"}"#.to_string(),
            ]
        );

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_interrupts_reconnect_wait() {
        let broker = LocalBroker::new();
        broker.set_available(false);
        let sink = Arc::new(MemorySink::new());
        let (_handle, shutdown, task) = start(&broker, &sink);

        wait_until(|| broker.subscribe_attempts() == 1).await;
        let cancelled_at = Instant::now();
        shutdown.cancel();
        task.await.unwrap();
        assert!(cancelled_at.elapsed() < Duration::from_secs(5));
    }
}
