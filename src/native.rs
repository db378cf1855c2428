use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{routing::get, Router};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::bridge::Supervisor;
use crate::broker::{Broker, MqttBroker, MqttPublisher, Publisher};
use crate::cli::config::{Config, StorageBackend};
use crate::gateway::QueryGateway;
use crate::handler::{events, handle_ws, health, history, AppState};
use crate::pipeline::retry::Backoff;
use crate::pipeline::{InfluxSink, MemorySink, TimeSeriesSink};
use crate::relay::CommandRelay;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Initialize the tracing subscriber.
/// Uses RUST_LOG env var for filtering (defaults to info).
pub fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(true))
            .with(filter)
            .init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(fmt::layer().json().with_target(false))
            .with(filter)
            .init(),
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/history", get(history))
        .route("/api/events", get(events))
        .route("/ws", get(handle_ws))
        .with_state(state)
}

/// Everything the bridge needs apart from the HTTP listener.
pub struct BridgeParts<B> {
    pub broker: B,
    pub publisher: Arc<dyn Publisher>,
    pub sink: Arc<dyn TimeSeriesSink>,
    pub pattern: String,
    pub backoff: Backoff,
    pub ws_buffer: usize,
}

/// Start the supervisor task and return the handler state wired to it.
pub fn spawn_bridge<B: Broker>(
    parts: BridgeParts<B>,
    shutdown: CancellationToken,
) -> (AppState, JoinHandle<()>) {
    let BridgeParts {
        broker,
        publisher,
        sink,
        pattern,
        backoff,
        ws_buffer,
    } = parts;

    let (supervisor, bridge) = Supervisor::new(broker, sink.clone(), pattern, backoff);
    let task = tokio::spawn(supervisor.run(shutdown));

    let state = AppState {
        bridge,
        gateway: QueryGateway::new(sink),
        relay: CommandRelay::new(publisher),
        ws_buffer,
    };
    (state, task)
}

/// Serve the router on `listener` until `shutdown` is cancelled.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
}

fn build_sink(config: &Config) -> Result<Arc<dyn TimeSeriesSink>> {
    let sink: Arc<dyn TimeSeriesSink> = match config.storage.backend {
        StorageBackend::Influx => {
            let influx = &config.storage.influx;
            info!(url = %influx.url, org = %influx.org, bucket = %influx.bucket, "using InfluxDB storage");
            Arc::new(InfluxSink::new(influx.clone()).map_err(anyhow::Error::msg)?)
        }
        StorageBackend::Memory => {
            info!("using in-memory storage");
            Arc::new(MemorySink::new())
        }
    };
    Ok(sink)
}

/// Run the bridge against the configured MQTT broker and storage until
/// `shutdown` is cancelled.
pub async fn run(config: Config, shutdown: CancellationToken) -> Result<()> {
    let listener = TcpListener::bind(config.server.bind.as_str())
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind))?;
    let sink = build_sink(&config)?;

    let parts = BridgeParts {
        broker: MqttBroker::new(config.mqtt.clone()),
        publisher: Arc::new(MqttPublisher::new(&config.mqtt)),
        sink,
        pattern: config.mqtt.subscribe_pattern.clone(),
        backoff: config.mqtt.reconnect.backoff(),
        ws_buffer: config.server.ws_buffer,
    };
    let (state, supervisor) = spawn_bridge(parts, shutdown.clone());
    info!(addr = %config.server.bind, "listening");

    let served = serve(listener, state, shutdown.clone()).await;

    // The server may also stop on its own error
    shutdown.cancel();
    let _ = supervisor.await;
    served.context("HTTP server failed")?;
    info!("shutdown complete");
    Ok(())
}

/// Cancel `shutdown` on Ctrl-C or SIGTERM.
pub fn cancel_on_signal(shutdown: CancellationToken) {
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutdown signal received");
        shutdown.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
