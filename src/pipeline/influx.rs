use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::pipeline::line_protocol::encode_point;
use crate::pipeline::query::FluxQuery;
use crate::pipeline::retry::{with_retry, RetryConfig};
use crate::pipeline::sink::{FluxRecord, SinkError, TimeSeriesSink};
use crate::point::{FieldValue, SensorPoint};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection settings for an InfluxDB v2 server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InfluxConfig {
    pub url: String,
    pub org: String,
    pub bucket: String,
    pub token: String,
    /// Per-request timeout in seconds. Also caps a write including its
    /// retries, so a stalled server holds up ingestion for one timeout.
    pub timeout_secs: u64,
}

impl Default for InfluxConfig {
    fn default() -> Self {
        Self {
            url: "http://influxdb:8086".to_string(),
            org: "home".to_string(),
            bucket: "sensors".to_string(),
            token: String::new(),
            timeout_secs: DEFAULT_TIMEOUT.as_secs(),
        }
    }
}

/// InfluxDB v2 HTTP client: line protocol writes, Flux queries
pub struct InfluxSink {
    client: Client,
    config: InfluxConfig,
    retry: RetryConfig,
}

impl InfluxSink {
    /// Returns an error if the HTTP client fails to build (e.g., TLS configuration issues).
    pub fn new(config: InfluxConfig) -> Result<Self, String> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| format!("failed to build HTTP client: {}", e))?;
        Ok(Self {
            client,
            config,
            retry: RetryConfig::default(),
        })
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_secs.max(1))
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.url.trim_end_matches('/'), path)
    }

    fn auth_header(&self) -> String {
        format!("Token {}", self.config.token)
    }

    async fn check_status(
        response: reqwest::Response,
        endpoint: &str,
    ) -> Result<reqwest::Response, SinkError> {
        let status = response.status().as_u16();
        if (200..300).contains(&status) {
            return Ok(response);
        }
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "(failed to read body)".to_string());
        error!(endpoint, status, response_body = %body, "influxdb returned error status");
        Err(SinkError::Http {
            status,
            endpoint: endpoint.to_string(),
            body,
        })
    }
}

#[derive(Serialize)]
struct QueryRequest<'a> {
    query: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    dialect: Dialect,
}

#[derive(Serialize)]
struct Dialect {
    header: bool,
    annotations: [&'static str; 1],
    delimiter: &'static str,
}

#[async_trait::async_trait]
impl TimeSeriesSink for InfluxSink {
    async fn write(&self, point: &SensorPoint) -> Result<(), SinkError> {
        let line = encode_point(point).ok_or(SinkError::EmptyPoint)?;
        let endpoint = self.endpoint("/api/v2/write");

        let attempts = with_retry(&self.retry, || async {
            let response = self
                .client
                .post(&endpoint)
                .query(&[
                    ("org", self.config.org.as_str()),
                    ("bucket", self.config.bucket.as_str()),
                    ("precision", "ns"),
                ])
                .header("Authorization", self.auth_header())
                .header("Content-Type", "text/plain; charset=utf-8")
                .body(line.clone())
                .send()
                .await?;
            Self::check_status(response, &endpoint).await?;
            Ok(())
        });

        match tokio::time::timeout(self.timeout(), attempts).await {
            Ok(result) => result,
            Err(_) => {
                warn!(endpoint = %endpoint, "influxdb write exceeded its time budget");
                Err(SinkError::Timeout)
            }
        }
    }

    #[tracing::instrument(name = "influx_query", skip(self, query))]
    async fn query(&self, query: &FluxQuery) -> Result<Vec<FluxRecord>, SinkError> {
        let flux = query.to_flux(&self.config.bucket);
        let endpoint = self.endpoint("/api/v2/query");
        debug!(flux = %flux, "running flux query");

        let request = QueryRequest {
            query: &flux,
            kind: "flux",
            dialect: Dialect {
                header: true,
                annotations: ["datatype"],
                delimiter: ",",
            },
        };

        let response = self
            .client
            .post(&endpoint)
            .query(&[("org", self.config.org.as_str())])
            .header("Authorization", self.auth_header())
            .header("Accept", "application/csv")
            .json(&request)
            .send()
            .await?;
        let body = Self::check_status(response, &endpoint).await?.text().await?;

        parse_annotated_csv(&body)
    }
}

/// Parse Flux annotated CSV (datatype annotation + header) into records.
///
/// The response may hold several tables, each starting with its own
/// annotation and header rows.
pub fn parse_annotated_csv(body: &str) -> Result<Vec<FluxRecord>, SinkError> {
    let mut records = Vec::new();
    let mut datatypes: Vec<String> = Vec::new();
    let mut header: Option<TableHeader> = None;

    for row in parse_csv_rows(body) {
        if row.iter().all(|c| c.is_empty()) {
            // Blank line: next table
            header = None;
            continue;
        }
        if row[0].starts_with('#') {
            if row[0] == "#datatype" {
                datatypes = row;
                header = None;
            }
            continue;
        }
        let Some(table) = &header else {
            header = Some(TableHeader::from_row(&row, &datatypes)?);
            continue;
        };
        records.push(table.record(&row)?);
    }

    Ok(records)
}

struct TableHeader {
    time: usize,
    field: usize,
    value: usize,
    numeric: bool,
}

impl TableHeader {
    fn from_row(row: &[String], datatypes: &[String]) -> Result<Self, SinkError> {
        let position = |name: &str| row.iter().position(|c| c == name);

        if let Some(error) = position("error") {
            return Err(SinkError::Decode(format!(
                "query error table (column {})",
                error
            )));
        }

        let column = |name: &str| {
            position(name).ok_or_else(|| SinkError::Decode(format!("missing column {}", name)))
        };
        let value = column("_value")?;
        let numeric = matches!(
            datatypes.get(value).map(String::as_str),
            Some("double" | "long" | "unsignedLong")
        );

        Ok(Self {
            time: column("_time")?,
            field: column("_field")?,
            value,
            numeric,
        })
    }

    fn record(&self, row: &[String]) -> Result<FluxRecord, SinkError> {
        let cell = |idx: usize| {
            row.get(idx)
                .map(String::as_str)
                .ok_or_else(|| SinkError::Decode(format!("short row: {} cells", row.len())))
        };

        let time = DateTime::parse_from_rfc3339(cell(self.time)?)
            .map_err(|e| SinkError::Decode(format!("bad _time: {}", e)))?
            .with_timezone(&Utc);
        let raw = cell(self.value)?;
        let value = if self.numeric {
            raw.parse::<f64>()
                .map(FieldValue::Float)
                .map_err(|e| SinkError::Decode(format!("bad _value {:?}: {}", raw, e)))?
        } else {
            FieldValue::Text(raw.to_string())
        };

        Ok(FluxRecord {
            time,
            field: cell(self.field)?.to_string(),
            value,
        })
    }
}

/// Split RFC 4180 CSV into rows. Quoted cells may contain delimiters,
/// doubled quotes and line breaks.
fn parse_csv_rows(body: &str) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut cell = String::new();
    let mut in_quotes = false;
    let mut chars = body.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    cell.push('"');
                }
                '"' => in_quotes = false,
                _ => cell.push(c),
            }
            continue;
        }
        match c {
            '"' => in_quotes = true,
            ',' => row.push(std::mem::take(&mut cell)),
            '\r' => {}
            '\n' => {
                row.push(std::mem::take(&mut cell));
                rows.push(std::mem::take(&mut row));
            }
            _ => cell.push(c),
        }
    }

    if !cell.is_empty() || !row.is_empty() {
        row.push(cell);
        rows.push(row);
    }
    rows
}
