//! LiveTail: latest-value cache and WebSocket fanout to browsers.

mod cache;
mod registry;

pub use cache::LiveStateCache;
pub use registry::{BroadcastResult, ClientGone, ClientId, ClientSink, FanoutRegistry};

use serde::{Deserialize, Serialize};

/// Wire shape shared by server→client events and client→server publish
/// commands.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveMessage {
    pub topic: String,
    pub payload: String,
}

impl LiveMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    pub fn to_json(&self) -> String {
        // Two string fields always serialize
        serde_json::to_string(self).unwrap_or_default()
    }
}
