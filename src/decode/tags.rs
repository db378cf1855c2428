use std::collections::BTreeMap;

use crate::point::{TAG_LOCATION, TAG_MEASUREMENT, TAG_TOPIC};

/// Split a topic at its last `/` into `location` and `measurement` tags.
/// Topics without a separator are tagged with the full topic instead.
pub fn split_tags(topic: &str) -> BTreeMap<String, String> {
    match topic.rsplit_once('/') {
        Some((location, measurement)) => BTreeMap::from([
            (TAG_LOCATION.to_string(), location.to_string()),
            (TAG_MEASUREMENT.to_string(), measurement.to_string()),
        ]),
        None => topic_tag(topic),
    }
}

/// Tag a point with the full topic only.
pub fn topic_tag(topic: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(TAG_TOPIC.to_string(), topic.to_string())])
}
