#![allow(dead_code)] // Test helpers appear unused when compiled independently

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    routing::post,
    Router,
};
use futures::{SinkExt, StreamExt};
use sensorbridge::broker::LocalBroker;
use sensorbridge::native::{serve, spawn_bridge, BridgeParts};
use sensorbridge::pipeline::retry::Backoff;
use sensorbridge::pipeline::MemorySink;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

const WAIT_ATTEMPTS: usize = 50;
const WAIT_DELAY: Duration = Duration::from_millis(100);

pub const TEST_RECONNECT_DELAY: Duration = Duration::from_millis(200);

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Find an available TCP port
pub async fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Best-effort check for whether binding to loopback is permitted in the current sandbox.
pub async fn can_bind_loopback() -> bool {
    match TcpListener::bind("127.0.0.1:0").await {
        Ok(listener) => {
            drop(listener);
            true
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => false,
        Err(_) => true, // treat other errors as non-fatal for skipping
    }
}

/// A running bridge wired to an in-process broker and memory storage.
pub struct TestApp {
    pub base_url: String,
    pub ws_url: String,
    pub broker: LocalBroker,
    pub sink: Arc<MemorySink>,
    shutdown: CancellationToken,
    server: JoinHandle<()>,
    supervisor: JoinHandle<()>,
}

impl TestApp {
    pub async fn stop(self) {
        self.shutdown.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(5), self.supervisor).await;
        let _ = tokio::time::timeout(Duration::from_secs(5), self.server).await;
    }
}

/// Spawn the full bridge on a free loopback port and wait until it is
/// subscribed to the broker.
pub async fn spawn_app() -> TestApp {
    let broker = LocalBroker::new();
    let sink = Arc::new(MemorySink::new());
    let shutdown = CancellationToken::new();

    let (state, supervisor) = spawn_bridge(
        BridgeParts {
            broker: broker.clone(),
            publisher: Arc::new(broker.clone()),
            sink: sink.clone(),
            pattern: "#".to_string(),
            backoff: Backoff::fixed(TEST_RECONNECT_DELAY),
            ws_buffer: 64,
        },
        shutdown.clone(),
    );

    let port = free_port().await;
    let listener = TcpListener::bind(("127.0.0.1", port))
        .await
        .expect("failed to bind bridge listener");
    let token = shutdown.clone();
    let server = tokio::spawn(async move {
        if let Err(err) = serve(listener, state, token).await {
            eprintln!("bridge server error: {}", err);
        }
    });

    wait_for(|| broker.subscriber_count() == 1)
        .await
        .expect("bridge never subscribed");

    TestApp {
        base_url: format!("http://127.0.0.1:{}", port),
        ws_url: format!("ws://127.0.0.1:{}/ws", port),
        broker,
        sink,
        shutdown,
        server,
        supervisor,
    }
}

pub async fn connect_ws(url: &str) -> WsStream {
    let (stream, _) = connect_async(url).await.expect("websocket connect failed");
    stream
}

/// Next text frame, parsed as JSON. Panics after a timeout.
pub async fn next_json(ws: &mut WsStream) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for websocket message")
            .expect("websocket closed")
            .expect("websocket error");
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).expect("frame is not JSON");
        }
    }
}

pub async fn send_text(ws: &mut WsStream, text: &str) {
    ws.send(Message::Text(text.to_string()))
        .await
        .expect("websocket send failed");
}

pub async fn wait_for(mut condition: impl FnMut() -> bool) -> Option<()> {
    poll_until(|| {
        let ready = condition();
        async move { ready.then_some(()) }
    })
    .await
}

pub async fn poll_until<T, F, Fut>(mut f: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    for _ in 0..WAIT_ATTEMPTS {
        if let Some(result) = f().await {
            return Some(result);
        }
        tokio::time::sleep(WAIT_DELAY).await;
    }
    None
}

/// Scripted InfluxDB v2 stand-in: records writes, answers queries with a
/// fixed annotated-CSV body, and can fail the first N writes.
#[derive(Clone)]
struct InfluxState {
    writes: Arc<Mutex<Vec<RecordedRequest>>>,
    queries: Arc<Mutex<Vec<RecordedRequest>>>,
    fail_writes: Arc<Mutex<(u32, StatusCode)>>,
    csv: Arc<String>,
}

#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub params: HashMap<String, String>,
    pub authorization: Option<String>,
    pub body: String,
}

pub struct MockInflux {
    pub url: String,
    state: InfluxState,
    shutdown_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl MockInflux {
    pub async fn writes(&self) -> Vec<RecordedRequest> {
        self.state.writes.lock().await.clone()
    }

    pub async fn queries(&self) -> Vec<RecordedRequest> {
        self.state.queries.lock().await.clone()
    }

    /// Answer the next `count` writes with `status`.
    pub async fn fail_next_writes(&self, count: u32, status: StatusCode) {
        *self.state.fail_writes.lock().await = (count, status);
    }

    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.handle.await;
    }
}

pub async fn spawn_mock_influx(csv: &str) -> MockInflux {
    let state = InfluxState {
        writes: Arc::new(Mutex::new(Vec::new())),
        queries: Arc::new(Mutex::new(Vec::new())),
        fail_writes: Arc::new(Mutex::new((0, StatusCode::OK))),
        csv: Arc::new(csv.to_string()),
    };

    let app = Router::new()
        .route("/api/v2/write", post(influx_write))
        .route("/api/v2/query", post(influx_query))
        .with_state(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind mock influx listener");
    let port = listener.local_addr().unwrap().port();

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let handle = tokio::spawn(async move {
        let server = axum::serve(listener, app).with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        });
        if let Err(err) = server.await {
            eprintln!("mock influx server error: {}", err);
        }
    });

    MockInflux {
        url: format!("http://127.0.0.1:{}", port),
        state,
        shutdown_tx,
        handle,
    }
}

/// A server that accepts connections and never answers them.
pub struct StalledServer {
    pub url: String,
    handle: JoinHandle<()>,
}

impl StalledServer {
    pub fn stop(self) {
        self.handle.abort();
    }
}

pub async fn spawn_stalled_server() -> StalledServer {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind stalled listener");
    let port = listener.local_addr().unwrap().port();

    let handle = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    StalledServer {
        url: format!("http://127.0.0.1:{}", port),
        handle,
    }
}

fn record(
    params: HashMap<String, String>,
    headers: &axum::http::HeaderMap,
    body: Bytes,
) -> RecordedRequest {
    RecordedRequest {
        params,
        authorization: headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string()),
        body: String::from_utf8_lossy(&body).into_owned(),
    }
}

async fn influx_write(
    State(state): State<InfluxState>,
    Query(params): Query<HashMap<String, String>>,
    headers: axum::http::HeaderMap,
    body: Bytes,
) -> StatusCode {
    state.writes.lock().await.push(record(params, &headers, body));

    let mut fail = state.fail_writes.lock().await;
    if fail.0 > 0 {
        fail.0 -= 1;
        return fail.1;
    }
    StatusCode::NO_CONTENT
}

async fn influx_query(
    State(state): State<InfluxState>,
    Query(params): Query<HashMap<String, String>>,
    headers: axum::http::HeaderMap,
    body: Bytes,
) -> (StatusCode, String) {
    state.queries.lock().await.push(record(params, &headers, body));
    (StatusCode::OK, state.csv.as_str().to_string())
}
