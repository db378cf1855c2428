//! Latest payload per topic.
//!
//! One entry per topic ever observed, overwritten on every message and never
//! evicted. Used to hydrate newly connected clients and to list known topics.

use std::collections::BTreeMap;

#[derive(Debug, Default)]
pub struct LiveStateCache {
    latest: BTreeMap<String, String>,
}

impl LiveStateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unconditionally replace the payload stored for `topic`.
    pub fn put(&mut self, topic: &str, payload: &str) {
        match self.latest.get_mut(topic) {
            Some(existing) => {
                existing.clear();
                existing.push_str(payload);
            }
            None => {
                self.latest.insert(topic.to_string(), payload.to_string());
            }
        }
    }

    pub fn get(&self, topic: &str) -> Option<&str> {
        self.latest.get(topic).map(String::as_str)
    }

    /// Iterate `(topic, payload)` pairs in topic order.
    pub fn snapshot(&self) -> impl Iterator<Item = (&str, &str)> {
        self.latest.iter().map(|(t, p)| (t.as_str(), p.as_str()))
    }

    pub fn topics(&self) -> Vec<String> {
        self.latest.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.latest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.latest.is_empty()
    }
}
