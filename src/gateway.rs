//! Read side: aggregated history and raw state events.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::pipeline::{FluxQuery, FluxRecord, Predicate, SinkError, TimeSeriesSink};
use crate::point::{FIELD_STATE, TAG_LOCATION, TAG_MEASUREMENT};

pub const DEFAULT_HOURS: u32 = 24;
pub const HISTORY_WINDOW: Duration = Duration::from_secs(5 * 60);

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HistoryPoint {
    pub time: DateTime<Utc>,
    pub field: String,
    pub value: f64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EventPoint {
    pub time: DateTime<Utc>,
    pub value: String,
}

/// Numeric series for a location: fields named after the measurement (object
/// payloads) plus every numeric field of points tagged with the measurement
/// (scalar payloads, whose field is `value`). Text values are dropped before
/// the mean.
pub fn history_query(location: &str, measurement: &str, hours: u32) -> FluxQuery {
    let predicate = Predicate::And(vec![
        Predicate::tag_eq(TAG_LOCATION, location),
        Predicate::Or(vec![
            Predicate::field_eq(measurement),
            Predicate::And(vec![
                Predicate::tag_eq(TAG_MEASUREMENT, measurement),
                Predicate::field_ne(FIELD_STATE),
            ]),
        ]),
    ]);
    FluxQuery::last_hours(hours, predicate)
        .numeric_only()
        .mean_every(HISTORY_WINDOW)
        .sorted_by_time()
}

pub fn events_query(location: &str, measurement: &str, hours: u32) -> FluxQuery {
    let predicate = Predicate::And(vec![
        Predicate::tag_eq(TAG_LOCATION, location),
        Predicate::tag_eq(TAG_MEASUREMENT, measurement),
        Predicate::field_eq(FIELD_STATE),
    ]);
    FluxQuery::last_hours(hours, predicate).sorted_by_time()
}

#[derive(Clone)]
pub struct QueryGateway {
    sink: Arc<dyn TimeSeriesSink>,
}

impl QueryGateway {
    pub fn new(sink: Arc<dyn TimeSeriesSink>) -> Self {
        Self { sink }
    }

    pub async fn history(
        &self,
        location: &str,
        measurement: &str,
        hours: u32,
    ) -> Result<Vec<HistoryPoint>, SinkError> {
        let records = self
            .sink
            .query(&history_query(location, measurement, hours))
            .await?;
        Ok(records.into_iter().filter_map(to_history).collect())
    }

    pub async fn events(
        &self,
        location: &str,
        measurement: &str,
        hours: u32,
    ) -> Result<Vec<EventPoint>, SinkError> {
        let records = self
            .sink
            .query(&events_query(location, measurement, hours))
            .await?;
        Ok(records
            .into_iter()
            .map(|r| EventPoint {
                time: r.time,
                value: r.value.to_string(),
            })
            .collect())
    }
}

fn to_history(record: FluxRecord) -> Option<HistoryPoint> {
    let value = record.value.as_f64()?;
    Some(HistoryPoint {
        time: record.time,
        field: record.field,
        value,
    })
}
