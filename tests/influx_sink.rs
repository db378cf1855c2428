//! InfluxSink against a scripted InfluxDB v2 HTTP endpoint.

mod helpers;

use axum::http::StatusCode;
use chrono::{TimeZone, Utc};
use helpers::{can_bind_loopback, spawn_mock_influx, spawn_stalled_server};
use sensorbridge::bridge::{Bridge, Persisted};
use sensorbridge::broker::RawMessage;
use sensorbridge::decode::decode_payload;
use sensorbridge::gateway::{history_query, QueryGateway};
use sensorbridge::handler::WsClient;
use sensorbridge::pipeline::{InfluxConfig, InfluxSink, SinkError, TimeSeriesSink};
use std::sync::Arc;
use std::time::{Duration, Instant};

const HISTORY_CSV: &str = "#datatype,string,long,dateTime:RFC3339,double,string\r\n\
,result,table,_time,_value,_field\r\n\
,_result,0,2024-05-01T10:05:00Z,21.25,temp\r\n\
,_result,0,2024-05-01T10:10:00Z,22,temp\r\n\
\r\n";

fn config(url: &str) -> InfluxConfig {
    InfluxConfig {
        url: url.to_string(),
        token: "test-token".to_string(),
        ..InfluxConfig::default()
    }
}

#[tokio::test]
async fn test_write_sends_line_protocol() {
    if !can_bind_loopback().await {
        eprintln!("skipping influx test: cannot bind to loopback in this environment");
        return;
    }
    let influx = spawn_mock_influx("").await;
    let sink = InfluxSink::new(config(&influx.url)).unwrap();

    let at = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
    let point = decode_payload("home/entrada/door", "open", at).unwrap();
    sink.write(&point).await.unwrap();

    let writes = influx.writes().await;
    assert_eq!(writes.len(), 1);
    assert_eq!(
        writes[0].body,
        "sensor,location=home/entrada,measurement=door state=\"open\" 1714557600000000000"
    );
    assert_eq!(writes[0].authorization.as_deref(), Some("Token test-token"));
    assert_eq!(writes[0].params["org"], "home");
    assert_eq!(writes[0].params["bucket"], "sensors");
    assert_eq!(writes[0].params["precision"], "ns");

    influx.stop().await;
}

#[tokio::test]
async fn test_write_retries_server_errors() {
    if !can_bind_loopback().await {
        eprintln!("skipping influx test: cannot bind to loopback in this environment");
        return;
    }
    let influx = spawn_mock_influx("").await;
    influx
        .fail_next_writes(2, StatusCode::SERVICE_UNAVAILABLE)
        .await;
    let sink = InfluxSink::new(config(&influx.url)).unwrap();

    let point = decode_payload("lab/bench/temp", "21", Utc::now()).unwrap();
    sink.write(&point).await.unwrap();

    assert_eq!(influx.writes().await.len(), 3);
    influx.stop().await;
}

#[tokio::test]
async fn test_write_does_not_retry_client_errors() {
    if !can_bind_loopback().await {
        eprintln!("skipping influx test: cannot bind to loopback in this environment");
        return;
    }
    let influx = spawn_mock_influx("").await;
    influx.fail_next_writes(5, StatusCode::UNAUTHORIZED).await;
    let sink = InfluxSink::new(config(&influx.url)).unwrap();

    let point = decode_payload("lab/bench/temp", "21", Utc::now()).unwrap();
    let err = sink.write(&point).await.unwrap_err();

    assert!(matches!(err, SinkError::Http { status: 401, .. }));
    assert_eq!(influx.writes().await.len(), 1);
    influx.stop().await;
}

#[tokio::test]
async fn test_stalled_write_holds_ingestion_for_one_timeout() {
    if !can_bind_loopback().await {
        eprintln!("skipping influx test: cannot bind to loopback in this environment");
        return;
    }
    let server = spawn_stalled_server().await;
    let sink = InfluxSink::new(InfluxConfig {
        timeout_secs: 1,
        ..config(&server.url)
    })
    .unwrap();
    let mut bridge: Bridge<WsClient> = Bridge::new(Arc::new(sink));

    let started = Instant::now();
    let report = bridge
        .ingest(RawMessage::new("lab/bench/temp", "21"))
        .await;
    let elapsed = started.elapsed();

    assert_eq!(report.persisted, Persisted::Failed);
    assert!(
        elapsed < Duration::from_millis(1800),
        "ingest blocked for {:?}",
        elapsed
    );
    assert_eq!(bridge.cache().get("lab/bench/temp"), Some("21"));

    server.stop();
}

#[tokio::test]
async fn test_history_query_round_trip() {
    if !can_bind_loopback().await {
        eprintln!("skipping influx test: cannot bind to loopback in this environment");
        return;
    }
    let influx = spawn_mock_influx(HISTORY_CSV).await;
    let sink = Arc::new(InfluxSink::new(config(&influx.url)).unwrap());
    let gateway = QueryGateway::new(sink);

    let points = gateway.history("home/salon", "temp", 6).await.unwrap();
    assert_eq!(points.len(), 2);
    assert_eq!(points[0].field, "temp");
    assert_eq!(points[0].value, 21.25);
    assert_eq!(
        points[1].time,
        Utc.with_ymd_and_hms(2024, 5, 1, 10, 10, 0).unwrap()
    );

    let queries = influx.queries().await;
    assert_eq!(queries.len(), 1);
    assert_eq!(queries[0].params["org"], "home");
    let body: serde_json::Value = serde_json::from_str(&queries[0].body).unwrap();
    assert_eq!(body["type"], "flux");
    assert_eq!(
        body["query"],
        history_query("home/salon", "temp", 6).to_flux("sensors")
    );
    assert_eq!(body["dialect"]["annotations"][0], "datatype");

    influx.stop().await;
}
