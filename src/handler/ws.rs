//! `/ws`: live messages out, publish commands in.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::debug;

use super::AppState;
use crate::livetail::{ClientGone, ClientSink};

/// Bridge-side handle of one WebSocket connection.
#[derive(Clone)]
pub struct WsClient {
    outbound: mpsc::Sender<String>,
}

impl WsClient {
    pub fn new(outbound: mpsc::Sender<String>) -> Self {
        Self { outbound }
    }
}

#[async_trait::async_trait]
impl ClientSink for WsClient {
    async fn send(&self, text: String) -> Result<(), ClientGone> {
        self.outbound.send(text).await.map_err(|_| ClientGone)
    }
}

pub async fn handle_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws_connection(socket, state))
}

async fn ws_connection(socket: WebSocket, state: AppState) {
    let (tx, mut rx) = mpsc::channel::<String>(state.ws_buffer.max(1));
    let id = match state.bridge.register(WsClient::new(tx)).await {
        Ok(id) => id,
        Err(e) => {
            debug!(error = %e, "rejecting websocket client");
            return;
        }
    };
    debug!(client_id = id, "websocket client connected");

    let (mut sender, mut receiver) = socket.split();

    // Outbound delivery runs apart from the read loop so a slow publish never
    // holds up live messages.
    let mut writer = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            _ = &mut writer => break,
            frame = receiver.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    state.relay.handle_text(&text).await;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!(client_id = id, error = %e, "websocket receive failed");
                    break;
                }
                Some(Ok(_)) => {}
            },
        }
    }

    writer.abort();
    state.bridge.deregister(id).await;
    debug!(client_id = id, "websocket client disconnected");
}
