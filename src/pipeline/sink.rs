use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::pipeline::query::FluxQuery;
use crate::pipeline::retry::IsRetryable;
use crate::point::{FieldValue, SensorPoint};

/// Errors that can occur when talking to the time-series store
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("request timed out")]
    Timeout,
    #[error("HTTP {status} from {endpoint}: {body}")]
    Http {
        status: u16,
        endpoint: String,
        body: String,
    },
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid query response: {0}")]
    Decode(String),
    #[error("point has no fields")]
    EmptyPoint,
    #[error("query failed: {0}")]
    Query(String),
}

impl IsRetryable for SinkError {
    fn is_retryable(&self) -> bool {
        match self {
            SinkError::Timeout => true,
            SinkError::Http { status, .. } => matches!(status, 500..=504),
            SinkError::Network(_) => true,
            SinkError::Decode(_) | SinkError::EmptyPoint | SinkError::Query(_) => false,
        }
    }
}

impl From<reqwest::Error> for SinkError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SinkError::Timeout
        } else {
            SinkError::Network(e.to_string())
        }
    }
}

/// One row of a query result.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FluxRecord {
    pub time: DateTime<Utc>,
    pub field: String,
    pub value: FieldValue,
}

/// Write/query interface of the time-series store.
#[async_trait::async_trait]
pub trait TimeSeriesSink: Send + Sync {
    /// Persist one point. Each write is independent.
    async fn write(&self, point: &SensorPoint) -> Result<(), SinkError>;

    /// Run a declarative query and return its rows in result order.
    async fn query(&self, query: &FluxQuery) -> Result<Vec<FluxRecord>, SinkError>;
}
