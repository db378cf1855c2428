//! InfluxDB line protocol encoding.

use crate::point::{FieldValue, SensorPoint};

/// Encode one point as a single line (no trailing newline).
///
/// Tags with empty values are omitted since the store rejects them. Returns
/// `None` when the point has no fields.
pub fn encode_point(point: &SensorPoint) -> Option<String> {
    if point.fields.is_empty() {
        return None;
    }

    let mut line = escape(point.measurement, &[',', ' ']);

    for (key, value) in point.tags.iter().filter(|(_, v)| !v.is_empty()) {
        line.push(',');
        line.push_str(&escape(key, &[',', '=', ' ']));
        line.push('=');
        line.push_str(&escape(value, &[',', '=', ' ']));
    }

    let fields: Vec<String> = point
        .fields
        .iter()
        .map(|(key, value)| format!("{}={}", escape(key, &[',', '=', ' ']), field_value(value)))
        .collect();
    line.push(' ');
    line.push_str(&fields.join(","));

    if let Some(nanos) = point.timestamp.timestamp_nanos_opt() {
        line.push(' ');
        line.push_str(&nanos.to_string());
    }

    Some(line)
}

fn field_value(value: &FieldValue) -> String {
    match value {
        FieldValue::Float(v) => format!("{}", v),
        FieldValue::Text(s) => format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"")),
    }
}

fn escape(raw: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c == '\\' || special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
