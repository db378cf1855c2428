//! Declarative time-series queries.
//!
//! A [`FluxQuery`] is built by the query side and handed to a sink. The
//! InfluxDB sink renders it to Flux text; the in-memory sink evaluates it
//! directly, so both backends share one description of what is asked.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::point::MEASUREMENT;

/// Filter over a single `(tags, field name)` series.
#[derive(Clone, Debug, PartialEq)]
pub enum Predicate {
    TagEq { key: String, value: String },
    FieldEq(String),
    FieldNe(String),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

impl Predicate {
    pub fn tag_eq(key: impl Into<String>, value: impl Into<String>) -> Self {
        Predicate::TagEq {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn field_eq(name: impl Into<String>) -> Self {
        Predicate::FieldEq(name.into())
    }

    pub fn field_ne(name: impl Into<String>) -> Self {
        Predicate::FieldNe(name.into())
    }

    pub fn matches(&self, tags: &BTreeMap<String, String>, field: &str) -> bool {
        match self {
            Predicate::TagEq { key, value } => tags.get(key) == Some(value),
            Predicate::FieldEq(name) => field == name,
            Predicate::FieldNe(name) => field != name,
            Predicate::And(all) => all.iter().all(|p| p.matches(tags, field)),
            Predicate::Or(any) => any.iter().any(|p| p.matches(tags, field)),
        }
    }

    /// Render as a Flux boolean expression over row `r`.
    pub fn to_flux(&self) -> String {
        match self {
            Predicate::TagEq { key, value } => {
                format!("r[{}] == {}", flux_string(key), flux_string(value))
            }
            Predicate::FieldEq(name) => format!("r._field == {}", flux_string(name)),
            Predicate::FieldNe(name) => format!("r._field != {}", flux_string(name)),
            Predicate::And(all) => join_flux(all, " and "),
            Predicate::Or(any) => join_flux(any, " or "),
        }
    }
}

fn join_flux(parts: &[Predicate], op: &str) -> String {
    match parts {
        [] if op == " and " => "true".to_string(),
        [] => "false".to_string(),
        [single] => single.to_flux(),
        _ => {
            let inner: Vec<String> = parts.iter().map(Predicate::to_flux).collect();
            format!("({})", inner.join(op))
        }
    }
}

/// Quote a value as a Flux string literal.
pub fn flux_string(value: &str) -> String {
    let escaped = value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace("${", "\\${");
    format!("\"{}\"", escaped)
}

/// Windowed mean aggregation; empty windows are omitted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MeanWindow {
    pub every: Duration,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FluxQuery {
    /// Trailing window ending now.
    pub range: Duration,
    pub measurement: String,
    pub predicate: Predicate,
    /// Keep only rows whose value is a number.
    pub numeric_only: bool,
    pub aggregate: Option<MeanWindow>,
    pub sort_by_time: bool,
}

impl FluxQuery {
    /// Query over the trailing `hours` of sensor points.
    pub fn last_hours(hours: u32, predicate: Predicate) -> Self {
        Self {
            range: Duration::from_secs(u64::from(hours) * 3600),
            measurement: MEASUREMENT.to_string(),
            predicate,
            numeric_only: false,
            aggregate: None,
            sort_by_time: false,
        }
    }

    pub fn numeric_only(mut self) -> Self {
        self.numeric_only = true;
        self
    }

    pub fn mean_every(mut self, every: Duration) -> Self {
        self.aggregate = Some(MeanWindow { every });
        self
    }

    pub fn sorted_by_time(mut self) -> Self {
        self.sort_by_time = true;
        self
    }

    /// Render the query as Flux against `bucket`.
    pub fn to_flux(&self, bucket: &str) -> String {
        let mut lines = Vec::new();
        if self.numeric_only {
            lines.push("import \"types\"".to_string());
            lines.push(String::new());
        }
        lines.extend([
            format!("from(bucket: {})", flux_string(bucket)),
            format!("  |> range(start: -{})", flux_duration(self.range)),
            format!(
                "  |> filter(fn: (r) => r._measurement == {})",
                flux_string(&self.measurement)
            ),
            format!("  |> filter(fn: (r) => {})", self.predicate.to_flux()),
        ]);
        if self.numeric_only {
            lines.push("  |> filter(fn: (r) => types.isNumeric(v: r._value))".to_string());
        }
        if let Some(window) = self.aggregate {
            lines.push(format!(
                "  |> aggregateWindow(every: {}, fn: mean, createEmpty: false)",
                flux_duration(window.every)
            ));
        }
        if self.sort_by_time {
            lines.push("  |> group()".to_string());
            lines.push("  |> sort(columns: [\"_time\"])".to_string());
        }
        lines.join("\n")
    }
}

/// Render a duration with the largest whole Flux unit.
fn flux_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs == 0 {
        return format!("{}ms", d.as_millis());
    }
    if secs % 3600 == 0 {
        format!("{}h", secs / 3600)
    } else if secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{}s", secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn predicate_matching() {
        let p = Predicate::And(vec![
            Predicate::tag_eq("location", "home/salon"),
            Predicate::Or(vec![
                Predicate::field_eq("clima"),
                Predicate::tag_eq("measurement", "clima"),
            ]),
        ]);
        let t = tags(&[("location", "home/salon"), ("measurement", "clima")]);
        assert!(p.matches(&t, "temp"));

        let other = tags(&[("location", "home/salon"), ("measurement", "door")]);
        assert!(!p.matches(&other, "state"));
        assert!(p.matches(&other, "clima"));
    }

    #[test]
    fn renders_flux_pipeline() {
        let query = FluxQuery::last_hours(
            24,
            Predicate::And(vec![
                Predicate::tag_eq("location", "home/salon"),
                Predicate::field_eq("state"),
            ]),
        )
        .mean_every(Duration::from_secs(300))
        .sorted_by_time();

        let flux = query.to_flux("sensors");
        assert_eq!(
            flux,
            [
                r#"from(bucket: "sensors")"#,
                r#"  |> range(start: -24h)"#,
                r#"  |> filter(fn: (r) => r._measurement == "sensor")"#,
                r#"  |> filter(fn: (r) => (r["location"] == "home/salon" and r._field == "state"))"#,
                r#"  |> aggregateWindow(every: 5m, fn: mean, createEmpty: false)"#,
                r#"  |> group()"#,
                r#"  |> sort(columns: ["_time"])"#,
            ]
            .join("\n")
        );
    }

    #[test]
    fn numeric_guard_precedes_aggregation() {
        let query = FluxQuery::last_hours(1, Predicate::tag_eq("location", "home/salon"))
            .numeric_only()
            .mean_every(Duration::from_secs(300));

        let flux = query.to_flux("sensors");
        assert!(flux.starts_with("import \"types\"\n\nfrom(bucket: \"sensors\")"));
        let guard = flux
            .find("filter(fn: (r) => types.isNumeric(v: r._value))")
            .unwrap();
        let mean = flux.find("aggregateWindow").unwrap();
        assert!(guard < mean);
    }

    #[test]
    fn flux_strings_are_escaped() {
        assert_eq!(flux_string(r#"a"b"#), r#""a\"b""#);
        assert_eq!(flux_string(r"a\b"), r#""a\\b""#);
        assert_eq!(flux_string("${x}"), r#""\${x}""#);
    }

    #[test]
    fn durations_use_largest_unit() {
        assert_eq!(flux_duration(Duration::from_secs(7200)), "2h");
        assert_eq!(flux_duration(Duration::from_secs(300)), "5m");
        assert_eq!(flux_duration(Duration::from_secs(45)), "45s");
    }
}
