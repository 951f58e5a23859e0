use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Upper heart rate bound for plausibility checks (not enforced by decoding)
pub const MAX_PLAUSIBLE_HEART_RATE: u16 = 250;

/// One structured reading from a Keiser M3 bike
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedSample {
    pub equipment_id: u8,
    pub power: u16,
    pub cadence: f64,
    pub heart_rate: u16,
    pub gear: u8,
    pub caloric_burn: u16,
    pub duration_minutes: u8,
    pub duration_seconds: u8,
    pub distance: f64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub timestamp: Option<OffsetDateTime>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub low_confidence: bool,
}

impl DecodedSample {
    /// Elapsed session time in seconds
    pub fn total_duration(&self) -> u32 {
        u32::from(self.duration_minutes) * 60 + u32::from(self.duration_seconds)
    }

    /// Attach the receive time. Broadcasts carry no timestamp of their own.
    pub fn stamped(mut self, at: OffsetDateTime) -> Self {
        self.timestamp = Some(at);
        self
    }

    pub fn is_plausible(&self) -> bool {
        self.heart_rate <= MAX_PLAUSIBLE_HEART_RATE
    }

    /// Flat key-value view of the sample
    pub fn to_map(&self) -> Result<serde_json::Map<String, serde_json::Value>, serde_json::Error> {
        match serde_json::to_value(self)? {
            serde_json::Value::Object(map) => Ok(map),
            _ => Ok(serde_json::Map::new()),
        }
    }
}

/// Per-bike standings accumulated by the persistence task
#[derive(Debug, Clone, PartialEq)]
pub struct LeaderboardEntry {
    pub equipment_id: u8,
    pub max_power: u16,
    pub max_cadence: f64,
    pub caloric_burn: u16,
    pub samples: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn sample() -> DecodedSample {
        DecodedSample {
            equipment_id: 7,
            power: 180,
            cadence: 88.5,
            heart_rate: 141,
            gear: 12,
            caloric_burn: 55,
            duration_minutes: 12,
            duration_seconds: 34,
            distance: 3.25,
            timestamp: None,
            low_confidence: false,
        }
    }

    #[test]
    fn total_duration_combines_minutes_and_seconds() {
        assert_eq!(sample().total_duration(), 754);
    }

    #[test]
    fn map_has_exactly_the_documented_keys() {
        let map = sample()
            .stamped(datetime!(2025-02-09 17:11:56 UTC))
            .to_map()
            .unwrap();
        let mut keys: Vec<&str> = map.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(
            keys,
            vec![
                "cadence",
                "caloric_burn",
                "distance",
                "duration_minutes",
                "duration_seconds",
                "equipment_id",
                "gear",
                "heart_rate",
                "power",
                "timestamp",
            ]
        );
        assert_eq!(map["timestamp"], "2025-02-09T17:11:56Z");
    }

    #[test]
    fn low_confidence_flag_only_serialized_when_set() {
        let mut flagged = sample();
        flagged.low_confidence = true;
        let map = flagged.to_map().unwrap();
        assert_eq!(map["low_confidence"], true);
        assert!(map["timestamp"].is_null());
    }

    #[test]
    fn heart_rate_above_bound_is_implausible() {
        let mut s = sample();
        assert!(s.is_plausible());
        s.heart_rate = 251;
        assert!(!s.is_plausible());
    }
}
