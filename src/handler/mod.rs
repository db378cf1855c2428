//! HTTP and WebSocket surface.

mod api;
mod ws;

pub use api::{events, health, history, HealthResponse, SeriesParams};
pub use ws::{handle_ws, WsClient};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::warn;

use crate::bridge::BridgeHandle;
use crate::gateway::QueryGateway;
use crate::pipeline::SinkError;
use crate::relay::CommandRelay;

/// Outbound messages buffered per WebSocket client.
pub const DEFAULT_WS_BUFFER: usize = 256;

#[derive(Clone)]
pub struct AppState {
    pub bridge: BridgeHandle<WsClient>,
    pub gateway: QueryGateway,
    pub relay: CommandRelay,
    pub ws_buffer: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("storage query failed: {0}")]
    Storage(#[from] SinkError),
    #[error("bridge is not running")]
    Unavailable,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Storage(e) => {
                warn!(error = %e, "query failed");
                StatusCode::BAD_GATEWAY
            }
            ApiError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        };
        let body = serde_json::json!({ "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}
