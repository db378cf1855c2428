//! Payload decoding: raw `(topic, payload)` text into at most one [`SensorPoint`].
//!
//! Payload shape is discovered, not declared. Decoding runs an ordered list of
//! attempts and stops at the first one that either produces a point or
//! decides the message must be dropped:
//!
//! 1. JSON. Objects become one field per key. Non-object JSON is accepted
//!    only if the payload text also parses as a number (field `value`).
//!    Anything else (arrays, strings, booleans, null) is dropped.
//! 2. Plain numeric text becomes field `value`, tagged with the full topic
//!    only. This path does not split the topic into location/measurement,
//!    unlike path 1; both tag shapes exist in stored data.
//! 3. Anything else is a state string (field `state`, trimmed).

mod tags;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use crate::point::{FieldValue, SensorPoint, FIELD_STATE, FIELD_VALUE};

pub use tags::{split_tags, topic_tag};

/// Outcome of a single decode attempt.
#[derive(Debug)]
enum Attempt {
    /// A point was produced; stop.
    Point(SensorPoint),
    /// The payload was recognised but yields nothing; stop.
    Drop,
    /// Not this shape; try the next attempt.
    Pass,
}

struct Input<'a> {
    topic: &'a str,
    payload: &'a str,
    at: DateTime<Utc>,
}

type DecodeStep = fn(&Input<'_>) -> Attempt;

const STEPS: [DecodeStep; 3] = [decode_json, decode_numeric, decode_state];

/// Decode a raw message into a point stamped with `at`.
///
/// Deterministic for a given `(topic, payload, at)`.
pub fn decode_payload(topic: &str, payload: &str, at: DateTime<Utc>) -> Option<SensorPoint> {
    let input = Input { topic, payload, at };
    for step in STEPS {
        match step(&input) {
            Attempt::Point(point) => return Some(point),
            Attempt::Drop => return None,
            Attempt::Pass => continue,
        }
    }
    None
}

fn decode_json(input: &Input<'_>) -> Attempt {
    let parsed: JsonValue = match serde_json::from_str(input.payload) {
        Ok(v) => v,
        Err(_) => return Attempt::Pass,
    };

    match parsed {
        JsonValue::Object(map) => {
            if map.is_empty() {
                // A point without fields cannot be stored
                return Attempt::Drop;
            }
            let point = map.into_iter().fold(
                SensorPoint::new(split_tags(input.topic), input.at),
                |point, (key, value)| point.with_field(key, json_field(value)),
            );
            Attempt::Point(point)
        }
        _ => match parse_number(input.payload) {
            Some(value) => Attempt::Point(
                SensorPoint::new(split_tags(input.topic), input.at)
                    .with_field(FIELD_VALUE, FieldValue::Float(value)),
            ),
            None => Attempt::Drop,
        },
    }
}

fn decode_numeric(input: &Input<'_>) -> Attempt {
    match parse_number(input.payload) {
        Some(value) => Attempt::Point(
            SensorPoint::new(topic_tag(input.topic), input.at)
                .with_field(FIELD_VALUE, FieldValue::Float(value)),
        ),
        None => Attempt::Pass,
    }
}

fn decode_state(input: &Input<'_>) -> Attempt {
    Attempt::Point(
        SensorPoint::new(split_tags(input.topic), input.at).with_field(
            FIELD_STATE,
            FieldValue::Text(input.payload.trim().to_string()),
        ),
    )
}

/// Numbers become floats; strings keep their text; everything else is
/// stored as its JSON rendering.
fn json_field(value: JsonValue) -> FieldValue {
    match value {
        JsonValue::Number(n) => match n.as_f64() {
            Some(v) => FieldValue::Float(v),
            None => FieldValue::Text(n.to_string()),
        },
        JsonValue::String(s) => FieldValue::Text(s),
        other => FieldValue::Text(other.to_string()),
    }
}

/// Parse surrounding-whitespace-tolerant numeric text. Non-finite values are
/// rejected since the store cannot hold them.
fn parse_number(text: &str) -> Option<f64> {
    text.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}
