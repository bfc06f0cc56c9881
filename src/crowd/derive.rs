use serde::Serialize;

use crate::models::LogSnapshot;

/// Current occupancy of one location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(into = "Option<u8>")]
pub enum CrowdLevel {
    Unknown,
    /// Percent of capacity, always within 0..=100.
    Known(u8),
}

impl CrowdLevel {
    pub fn percentage(self) -> Option<u8> {
        match self {
            CrowdLevel::Unknown => None,
            CrowdLevel::Known(percent) => Some(percent),
        }
    }

    pub fn band(self) -> CrowdBand {
        match self {
            CrowdLevel::Unknown => CrowdBand::Unknown,
            CrowdLevel::Known(0..=20) => CrowdBand::Quiet,
            CrowdLevel::Known(21..=50) => CrowdBand::Moderate,
            CrowdLevel::Known(51..=80) => CrowdBand::Busy,
            CrowdLevel::Known(_) => CrowdBand::Packed,
        }
    }
}

impl From<CrowdLevel> for Option<u8> {
    fn from(level: CrowdLevel) -> Self {
        level.percentage()
    }
}

/// Coarse bucket the occupancy indicator is colored by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CrowdBand {
    Unknown,
    Quiet,
    Moderate,
    Busy,
    Packed,
}

/// Capacity usable as a divisor: present, finite and positive.
pub fn usable_capacity(capacity: Option<f64>) -> Option<f64> {
    capacity.filter(|capacity| capacity.is_finite() && *capacity > 0.0)
}

/// Derives the crowd level of a location from its full log snapshot.
///
/// The entry with the greatest timestamp decides (smallest key on a tie). The
/// result is unknown when capacity is unusable, the snapshot has no
/// timestamped entry, or the latest entry has no valid count.
pub fn crowd_percentage(snapshot: &LogSnapshot, capacity: Option<f64>) -> CrowdLevel {
    let Some(capacity) = usable_capacity(capacity) else {
        return CrowdLevel::Unknown;
    };
    let Some((_, latest)) = snapshot.latest() else {
        return CrowdLevel::Unknown;
    };
    match latest.valid_count() {
        Some(count) => percentage_of(count, capacity),
        None => CrowdLevel::Unknown,
    }
}

/// Key of the latest entry when that entry has no usable count.
pub fn latest_without_count(snapshot: &LogSnapshot) -> Option<&str> {
    snapshot
        .latest()
        .filter(|(_, latest)| latest.valid_count().is_none())
        .map(|(key, _)| key)
}

/// `round(min(count / capacity * 100, 100))`, never below zero.
pub fn percentage_of(count: f64, capacity: f64) -> CrowdLevel {
    let percent = (count / capacity * 100.0).clamp(0.0, 100.0).round();
    CrowdLevel::Known(percent as u8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OccupancyLogEntry;
    use serde_json::json;

    fn snapshot(entries: &[(&str, u64, i64)]) -> LogSnapshot {
        entries
            .iter()
            .map(|(key, count, timestamp)| {
                (key.to_string(), OccupancyLogEntry::new(*count, *timestamp))
            })
            .collect()
    }

    #[test]
    fn latest_timestamp_wins_regardless_of_key_order() {
        let forward = snapshot(&[("a", 10, 100), ("b", 40, 200)]);
        let backward = snapshot(&[("a", 40, 200), ("b", 10, 100)]);

        assert_eq!(crowd_percentage(&forward, Some(50.0)), CrowdLevel::Known(80));
        assert_eq!(crowd_percentage(&backward, Some(50.0)), CrowdLevel::Known(80));
    }

    #[test]
    fn clamps_at_one_hundred() {
        let logs = snapshot(&[("a", 120, 1)]);
        assert_eq!(crowd_percentage(&logs, Some(50.0)), CrowdLevel::Known(100));
    }

    #[test]
    fn unusable_capacity_is_unknown() {
        let logs = snapshot(&[("a", 10, 1)]);
        for capacity in [None, Some(0.0), Some(-5.0), Some(f64::NAN), Some(f64::INFINITY)] {
            assert_eq!(crowd_percentage(&logs, capacity), CrowdLevel::Unknown);
        }
    }

    #[test]
    fn empty_snapshot_is_unknown() {
        assert_eq!(
            crowd_percentage(&LogSnapshot::default(), Some(10.0)),
            CrowdLevel::Unknown
        );
    }

    #[test]
    fn invalid_latest_count_is_unknown() {
        let raw = json!({
            "a": { "count": 5, "timestamp": 1 },
            "b": { "count": "n/a", "timestamp": 2 }
        });
        let logs = LogSnapshot::from_value(Some(&raw));
        assert_eq!(crowd_percentage(&logs, Some(10.0)), CrowdLevel::Unknown);
        assert_eq!(latest_without_count(&logs), Some("b"));
    }

    #[test]
    fn only_a_bad_latest_entry_is_flagged() {
        let raw = json!({
            "a": { "count": "n/a", "timestamp": 1 },
            "b": { "count": 5, "timestamp": 2 }
        });
        let logs = LogSnapshot::from_value(Some(&raw));
        assert_eq!(latest_without_count(&logs), None);
        assert_eq!(latest_without_count(&LogSnapshot::default()), None);
    }

    #[test]
    fn redelivery_is_idempotent() {
        let logs = snapshot(&[("a", 7, 5), ("b", 9, 5), ("c", 3, 1)]);
        let first = crowd_percentage(&logs, Some(30.0));
        let second = crowd_percentage(&logs.clone(), Some(30.0));
        assert_eq!(first, second);
        assert_eq!(first, CrowdLevel::Known(23));
    }

    #[test]
    fn rounds_half_up_and_stays_in_range() {
        assert_eq!(percentage_of(1.0, 8.0), CrowdLevel::Known(13));
        assert_eq!(percentage_of(0.0, 8.0), CrowdLevel::Known(0));
        for count in 0..=300u32 {
            let percent = percentage_of(count as f64, 37.0).percentage().unwrap();
            let expected = ((count as f64 / 37.0 * 100.0).min(100.0)).round() as u8;
            assert_eq!(percent, expected);
            assert!(percent <= 100);
        }
    }

    #[test]
    fn bands_follow_thresholds() {
        assert_eq!(CrowdLevel::Unknown.band(), CrowdBand::Unknown);
        assert_eq!(CrowdLevel::Known(20).band(), CrowdBand::Quiet);
        assert_eq!(CrowdLevel::Known(21).band(), CrowdBand::Moderate);
        assert_eq!(CrowdLevel::Known(80).band(), CrowdBand::Busy);
        assert_eq!(CrowdLevel::Known(81).band(), CrowdBand::Packed);
    }

    #[test]
    fn serializes_as_optional_number() {
        assert_eq!(serde_json::to_value(CrowdLevel::Known(42)).unwrap(), json!(42));
        assert_eq!(serde_json::to_value(CrowdLevel::Unknown).unwrap(), json!(null));
    }
}
