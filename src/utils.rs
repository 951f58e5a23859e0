/// Utility functions for sample bookkeeping and formatting
use std::collections::HashMap;
use time::macros::format_description;
use time::OffsetDateTime;

use crate::models::{DecodedSample, LeaderboardEntry};

/// Format a timestamp for human-readable logging
///
/// Converts an OffsetDateTime to DD.MM.YYYY - HH:MM:SS format
/// Falls back to default string representation if formatting fails.
pub fn format_datetime(dt: &OffsetDateTime) -> String {
    let format = format_description!("[day].[month].[year] - [hour]:[minute]:[second]");
    dt.format(format).unwrap_or_else(|_| dt.to_string())
}

/// Running per-bike statistics built from the stored samples
///
/// Tracks the leaderboard (best power and cadence, latest calorie count)
/// and the last reported session duration of every bike.
#[derive(Debug, Default)]
pub struct Standings {
    entries: HashMap<u8, LeaderboardEntry>,
    last_duration: HashMap<u8, u32>,
}

impl Standings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sample to the standings
    ///
    /// Returns false when the sample's duration went backwards, which means
    /// the bike started a new session.
    pub fn record(&mut self, sample: &DecodedSample) -> bool {
        let duration = sample.total_duration();
        let continuous = match self.last_duration.insert(sample.equipment_id, duration) {
            Some(previous) => duration >= previous,
            None => true,
        };

        let entry = self
            .entries
            .entry(sample.equipment_id)
            .or_insert_with(|| LeaderboardEntry {
                equipment_id: sample.equipment_id,
                max_power: 0,
                max_cadence: 0.0,
                caloric_burn: 0,
                samples: 0,
            });
        entry.max_power = entry.max_power.max(sample.power);
        entry.max_cadence = entry.max_cadence.max(sample.cadence);
        entry.caloric_burn = sample.caloric_burn;
        entry.samples += 1;

        continuous
    }

    /// Bikes ordered by best power, strongest first
    pub fn leaderboard(&self, limit: usize) -> Vec<LeaderboardEntry> {
        let mut entries: Vec<LeaderboardEntry> = self.entries.values().cloned().collect();
        entries.sort_by(|a, b| {
            b.max_power
                .cmp(&a.max_power)
                .then(a.equipment_id.cmp(&b.equipment_id))
        });
        entries.truncate(limit);
        entries
    }
}
