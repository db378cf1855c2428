//! In-process time-series store.
//!
//! Evaluates [`FluxQuery`] with the same semantics the Flux pipeline has:
//! trailing range ending now, windowed mean with windows aligned to epoch
//! multiples of the window size and labelled with their (range-clipped) stop
//! time, empty windows omitted. Averaging a text value fails the query the
//! way Flux `mean` does.

use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration as ChronoDuration, Utc};

use crate::pipeline::query::{FluxQuery, MeanWindow};
use crate::pipeline::sink::{FluxRecord, SinkError, TimeSeriesSink};
use crate::point::{FieldValue, SensorPoint};

#[derive(Debug, Default)]
pub struct MemorySink {
    points: Mutex<Vec<SensorPoint>>,
}

/// Series identity: tag set plus field name.
type SeriesKey = (BTreeMap<String, String>, String);

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything written so far, in write order.
    pub fn points(&self) -> Vec<SensorPoint> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<SensorPoint>> {
        self.points.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Evaluate `query` against the stored points as of `now`.
    pub fn evaluate(
        &self,
        query: &FluxQuery,
        now: DateTime<Utc>,
    ) -> Result<Vec<FluxRecord>, SinkError> {
        let start = now
            .checked_sub_signed(to_chrono(query.range))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let points = self.lock();

        let mut series: BTreeMap<SeriesKey, Vec<(DateTime<Utc>, FieldValue)>> = BTreeMap::new();
        for point in points.iter() {
            if point.measurement != query.measurement
                || point.timestamp < start
                || point.timestamp >= now
            {
                continue;
            }
            for (field, value) in &point.fields {
                if query.numeric_only && value.as_f64().is_none() {
                    continue;
                }
                if query.predicate.matches(&point.tags, field) {
                    series
                        .entry((point.tags.clone(), field.clone()))
                        .or_default()
                        .push((point.timestamp, value.clone()));
                }
            }
        }
        drop(points);

        let mut records = Vec::new();
        for ((_, field), mut rows) in series {
            rows.sort_by_key(|(time, _)| *time);
            match query.aggregate {
                Some(window) => records.extend(mean_windows(&field, &rows, window, now)?),
                None => records.extend(rows.into_iter().map(|(time, value)| FluxRecord {
                    time,
                    field: field.clone(),
                    value,
                })),
            }
        }

        if query.sort_by_time {
            // Stable: rows with equal times keep series order
            records.sort_by_key(|r| r.time);
        }
        Ok(records)
    }
}

fn mean_windows(
    field: &str,
    rows: &[(DateTime<Utc>, FieldValue)],
    window: MeanWindow,
    now: DateTime<Utc>,
) -> Result<Vec<FluxRecord>, SinkError> {
    let every = window.every.as_nanos().max(1) as i64;
    let mut buckets: BTreeMap<i64, (f64, usize)> = BTreeMap::new();

    for (time, value) in rows {
        let Some(v) = value.as_f64() else {
            return Err(SinkError::Query(format!(
                "unsupported input type for mean aggregate on field {:?}: string",
                field
            )));
        };
        let Some(nanos) = time.timestamp_nanos_opt() else { continue };
        let bucket_start = nanos.div_euclid(every) * every;
        let entry = buckets.entry(bucket_start).or_insert((0.0, 0));
        entry.0 += v;
        entry.1 += 1;
    }

    Ok(buckets
        .into_iter()
        .map(|(bucket_start, (sum, count))| {
            let stop = DateTime::from_timestamp_nanos(bucket_start.saturating_add(every));
            FluxRecord {
                time: stop.min(now),
                field: field.to_string(),
                value: FieldValue::Float(sum / count as f64),
            }
        })
        .collect())
}

fn to_chrono(d: std::time::Duration) -> ChronoDuration {
    ChronoDuration::from_std(d).unwrap_or(ChronoDuration::MAX)
}

#[async_trait::async_trait]
impl TimeSeriesSink for MemorySink {
    async fn write(&self, point: &SensorPoint) -> Result<(), SinkError> {
        if point.fields.is_empty() {
            return Err(SinkError::EmptyPoint);
        }
        self.lock().push(point.clone());
        Ok(())
    }

    async fn query(&self, query: &FluxQuery) -> Result<Vec<FluxRecord>, SinkError> {
        self.evaluate(query, Utc::now())
    }
}
