//! Structured time-series points produced by the decoder and consumed by sinks.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Measurement name shared by every point the bridge writes.
pub const MEASUREMENT: &str = "sensor";

/// Tag keys used for indexing.
pub const TAG_LOCATION: &str = "location";
pub const TAG_MEASUREMENT: &str = "measurement";
pub const TAG_TOPIC: &str = "topic";

/// Field names with special meaning for the query side.
pub const FIELD_VALUE: &str = "value";
pub const FIELD_STATE: &str = "state";

/// A field value. Numbers are always stored as f64.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Float(f64),
    Text(String),
}

impl FieldValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Float(v) => Some(*v),
            FieldValue::Text(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Float(_) => None,
            FieldValue::Text(s) => Some(s),
        }
    }
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldValue::Float(v) => write!(f, "{}", v),
            FieldValue::Text(s) => f.write_str(s),
        }
    }
}

/// One persisted sample. Ordered maps keep encoding deterministic.
#[derive(Clone, Debug, PartialEq)]
pub struct SensorPoint {
    pub measurement: &'static str,
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<String, FieldValue>,
    pub timestamp: DateTime<Utc>,
}

impl SensorPoint {
    pub fn new(tags: BTreeMap<String, String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            measurement: MEASUREMENT,
            tags,
            fields: BTreeMap::new(),
            timestamp,
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: FieldValue) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }
}
