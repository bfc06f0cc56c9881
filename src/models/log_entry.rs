//! Occupancy log models.
//!
//! Counting devices append entries under `<log_root>/<locationId>`; the realtime
//! store hands back the whole keyed collection on every change.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// One count-at-a-timestamp observation from a counting device.
///
/// Fields are parsed leniently: a value of the wrong type becomes `None`
/// instead of rejecting the whole snapshot, so a malformed entry can still be
/// recognised as the latest one and reported as "unknown".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OccupancyLogEntry {
    #[serde(
        default,
        deserialize_with = "lenient_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub count: Option<f64>,
    /// Milliseconds since the Unix epoch.
    #[serde(
        default,
        deserialize_with = "lenient_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<f64>,
    #[serde(
        default,
        alias = "deviceID",
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub device_id: Option<String>,
}

impl OccupancyLogEntry {
    pub fn new(count: u64, timestamp_ms: i64) -> Self {
        Self {
            count: Some(count as f64),
            timestamp: Some(timestamp_ms as f64),
            device_id: None,
        }
    }

    pub fn with_device(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    /// The count if it is a finite, non-negative number.
    pub fn valid_count(&self) -> Option<f64> {
        self.count.filter(|count| count.is_finite() && *count >= 0.0)
    }
}

fn lenient_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|value| value.as_f64()))
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(text)) => Some(text),
        _ => None,
    })
}

/// Full contents of one location's log collection, ordered by entry key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogSnapshot {
    entries: BTreeMap<String, OccupancyLogEntry>,
}

impl LogSnapshot {
    /// Builds a snapshot from the raw value stored at a log path.
    ///
    /// `None`/`null` is an empty collection. Arrays (what the realtime store
    /// returns for dense integer keys) are keyed by index. Children that are not
    /// objects become entries with no fields.
    pub fn from_value(value: Option<&Value>) -> Self {
        let mut entries = BTreeMap::new();
        match value {
            Some(Value::Object(children)) => {
                for (key, child) in children {
                    entries.insert(key.clone(), parse_entry(child));
                }
            }
            Some(Value::Array(children)) => {
                for (index, child) in children.iter().enumerate() {
                    if !child.is_null() {
                        entries.insert(index.to_string(), parse_entry(child));
                    }
                }
            }
            _ => {}
        }
        Self { entries }
    }

    pub fn insert(&mut self, key: impl Into<String>, entry: OccupancyLogEntry) {
        self.entries.insert(key.into(), entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &OccupancyLogEntry)> {
        self.entries.iter().map(|(key, entry)| (key.as_str(), entry))
    }

    /// The entry with the greatest timestamp. Entries without a numeric
    /// timestamp are never selected; on a tie the smallest key wins.
    pub fn latest(&self) -> Option<(&str, &OccupancyLogEntry)> {
        let mut latest: Option<(&str, &OccupancyLogEntry, f64)> = None;
        for (key, entry) in &self.entries {
            let Some(timestamp) = entry.timestamp else {
                continue;
            };
            match latest {
                Some((_, _, best)) if timestamp <= best => {}
                _ => latest = Some((key.as_str(), entry, timestamp)),
            }
        }
        latest.map(|(key, entry, _)| (key, entry))
    }
}

impl FromIterator<(String, OccupancyLogEntry)> for LogSnapshot {
    fn from_iter<I: IntoIterator<Item = (String, OccupancyLogEntry)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

fn parse_entry(value: &Value) -> OccupancyLogEntry {
    serde_json::from_value(value.clone()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_object_snapshot_leniently() {
        let raw = json!({
            "-a": { "count": 12, "timestamp": 1000, "deviceID": "door-1" },
            "-b": { "count": "lots", "timestamp": 2000 },
            "-c": "garbage"
        });

        let snapshot = LogSnapshot::from_value(Some(&raw));
        assert_eq!(snapshot.len(), 3);

        let entries: Vec<_> = snapshot.iter().collect();
        assert_eq!(entries[0].1.valid_count(), Some(12.0));
        assert_eq!(entries[0].1.device_id.as_deref(), Some("door-1"));
        assert_eq!(entries[1].1.count, None);
        assert_eq!(entries[1].1.timestamp, Some(2000.0));
        assert_eq!(entries[2].1, &OccupancyLogEntry::default());
    }

    #[test]
    fn null_and_missing_values_are_empty() {
        assert!(LogSnapshot::from_value(None).is_empty());
        assert!(LogSnapshot::from_value(Some(&Value::Null)).is_empty());
    }

    #[test]
    fn arrays_are_keyed_by_index() {
        let raw = json!([null, { "count": 3, "timestamp": 5 }]);
        let snapshot = LogSnapshot::from_value(Some(&raw));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.latest().map(|(key, _)| key), Some("1"));
    }

    #[test]
    fn latest_prefers_largest_timestamp_then_smallest_key() {
        let snapshot: LogSnapshot = [
            ("b".to_string(), OccupancyLogEntry::new(1, 300)),
            ("a".to_string(), OccupancyLogEntry::new(2, 300)),
            ("c".to_string(), OccupancyLogEntry::new(3, 100)),
            (
                "d".to_string(),
                OccupancyLogEntry {
                    count: Some(4.0),
                    ..Default::default()
                },
            ),
        ]
        .into_iter()
        .collect();

        let (key, entry) = snapshot.latest().unwrap();
        assert_eq!(key, "a");
        assert_eq!(entry.valid_count(), Some(2.0));
    }

    #[test]
    fn negative_counts_are_not_valid() {
        let entry = OccupancyLogEntry {
            count: Some(-1.0),
            timestamp: Some(1.0),
            device_id: None,
        };
        assert_eq!(entry.valid_count(), None);
    }
}
