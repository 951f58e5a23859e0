/// Synthetic rider used when no bike is broadcasting
///
/// The ride goes through a warm-up, a steady block and a cooldown, decided
/// by the elapsed session time. Every tick applies one bounded random step.
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use time::OffsetDateTime;

use crate::models::DecodedSample;

pub const WARMUP_SECS: i64 = 300;
pub const STEADY_END_SECS: i64 = 1800;

pub const POWER_MIN: i32 = 50;
pub const POWER_MAX: i32 = 300;
pub const CADENCE_MIN: i32 = 60;
pub const CADENCE_MAX: i32 = 110;
pub const HEART_RATE_MIN: i32 = 100;
pub const HEART_RATE_MAX: i32 = 190;
pub const GEAR_MIN: u8 = 1;
pub const GEAR_MAX: u8 = 24;

/// Longest session time the minutes byte can express (255:59)
pub const MAX_REPORTED_SECS: i64 = 255 * 60 + 59;

/// Linear power to kcal approximation applied once per tick
pub const KCAL_PER_WATT_TICK: f64 = 0.00024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    WarmUp,
    Steady,
    Cooldown,
}

impl Phase {
    pub fn at(elapsed_secs: i64) -> Self {
        if elapsed_secs < WARMUP_SECS {
            Phase::WarmUp
        } else if elapsed_secs < STEADY_END_SECS {
            Phase::Steady
        } else {
            Phase::Cooldown
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RiderState {
    pub power: i32,
    pub cadence: i32,
    pub heart_rate: i32,
    pub gear: u8,
    pub calories: f64,
    pub session_start: OffsetDateTime,
}

impl RiderState {
    pub fn new(session_start: OffsetDateTime) -> Self {
        RiderState {
            power: 100,
            cadence: 80,
            heart_rate: 120,
            gear: 10,
            calories: 0.0,
            session_start,
        }
    }
}

/// Advance the rider by one tick
pub fn advance<R: Rng>(mut state: RiderState, elapsed_secs: i64, rng: &mut R) -> RiderState {
    let (power_step, cadence_step) = match Phase::at(elapsed_secs) {
        Phase::WarmUp => (rng.gen_range(-5..=10), rng.gen_range(-2..=5)),
        Phase::Steady => (rng.gen_range(-10..=10), rng.gen_range(-3..=3)),
        Phase::Cooldown => (-rng.gen_range(5..=15), -rng.gen_range(3..=8)),
    };

    state.power = (state.power + power_step).clamp(POWER_MIN, POWER_MAX);
    state.cadence = (state.cadence + cadence_step).clamp(CADENCE_MIN, CADENCE_MAX);

    // Heart rate lags power: ceil(power / 50) plus noise
    let effort = (state.power + 49) / 50;
    state.heart_rate =
        (state.heart_rate + effort + rng.gen_range(-2..=5)).clamp(HEART_RATE_MIN, HEART_RATE_MAX);

    if state.cadence > 95 {
        state.gear = (state.gear + 1).min(GEAR_MAX);
    } else if state.cadence < 75 {
        state.gear = state.gear.saturating_sub(1).max(GEAR_MIN);
    }

    state.calories += (f64::from(state.power) * KCAL_PER_WATT_TICK * 100.0).round() / 100.0;

    state
}

/// Owning handle around one rider's state
pub struct SyntheticRider<R = StdRng> {
    equipment_id: u8,
    state: RiderState,
    rng: R,
}

impl SyntheticRider<StdRng> {
    pub fn new(equipment_id: u8) -> Self {
        Self::with_rng(equipment_id, OffsetDateTime::now_utc(), StdRng::from_entropy())
    }
}

impl<R: Rng> SyntheticRider<R> {
    pub fn with_rng(equipment_id: u8, session_start: OffsetDateTime, rng: R) -> Self {
        SyntheticRider {
            equipment_id,
            state: RiderState::new(session_start),
            rng,
        }
    }

    pub fn state(&self) -> &RiderState {
        &self.state
    }

    /// Start a new session; calories and all metrics go back to their initial values
    pub fn restart(&mut self, at: OffsetDateTime) {
        self.state = RiderState::new(at);
    }

    pub fn tick(&mut self) -> DecodedSample {
        self.tick_at(OffsetDateTime::now_utc())
    }

    pub fn tick_at(&mut self, now: OffsetDateTime) -> DecodedSample {
        let elapsed = (now - self.state.session_start).whole_seconds().max(0);
        self.state = advance(self.state.clone(), elapsed, &mut self.rng);

        // The broadcast only has a byte for minutes, so the clock stops at 255:59
        let reported = elapsed.min(MAX_REPORTED_SECS);

        DecodedSample {
            equipment_id: self.equipment_id,
            power: self.state.power as u16,
            cadence: f64::from(self.state.cadence),
            heart_rate: self.state.heart_rate as u16,
            gear: self.state.gear,
            caloric_burn: self.state.calories.round() as u16,
            duration_minutes: (reported / 60) as u8,
            duration_seconds: (reported % 60) as u8,
            distance: 0.0,
            timestamp: Some(now),
            low_confidence: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;
    use time::Duration;

    const START: OffsetDateTime = datetime!(2025-02-09 17:00:00 UTC);

    fn rider(seed: u64) -> SyntheticRider<StdRng> {
        SyntheticRider::with_rng(5, START, StdRng::seed_from_u64(seed))
    }

    #[test]
    fn phases_follow_elapsed_time() {
        assert_eq!(Phase::at(0), Phase::WarmUp);
        assert_eq!(Phase::at(299), Phase::WarmUp);
        assert_eq!(Phase::at(300), Phase::Steady);
        assert_eq!(Phase::at(1799), Phase::Steady);
        assert_eq!(Phase::at(1800), Phase::Cooldown);
    }

    #[test]
    fn samples_stay_within_bounds_over_a_long_ride() {
        for seed in 0..8 {
            let mut rider = rider(seed);
            for tick in 0..1000 {
                let sample = rider.tick_at(START + Duration::seconds(tick * 5));
                assert!((50..=300).contains(&sample.power), "power {}", sample.power);
                assert!((60.0..=110.0).contains(&sample.cadence), "cadence {}", sample.cadence);
                assert!((100..=190).contains(&sample.heart_rate));
                assert!((1..=24).contains(&sample.gear));
            }
        }
    }

    #[test]
    fn calories_never_decrease() {
        let mut rider = rider(42);
        let mut last = 0.0;
        for tick in 0..500 {
            rider.tick_at(START + Duration::seconds(tick * 5));
            assert!(rider.state().calories >= last);
            last = rider.state().calories;
        }
        assert!(last > 0.0);
    }

    #[test]
    fn cooldown_pulls_power_and_cadence_down() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut state = RiderState::new(START);
        state.power = 250;
        state.cadence = 100;
        let next = advance(state, STEADY_END_SECS + 10, &mut rng);
        assert!((235..=245).contains(&next.power));
        assert!((92..=97).contains(&next.cadence));
    }

    #[test]
    fn gear_tracks_cadence_thresholds() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut state = RiderState::new(START);
        state.cadence = 110;
        state.gear = GEAR_MAX;
        // steady drift of at most 3 keeps cadence above 95
        assert_eq!(advance(state.clone(), 600, &mut rng).gear, GEAR_MAX);

        state.cadence = 60;
        state.gear = GEAR_MIN;
        assert_eq!(advance(state, 600, &mut rng).gear, GEAR_MIN);
    }

    #[test]
    fn tick_reports_elapsed_duration_and_equipment() {
        let mut rider = rider(3);
        let sample = rider.tick_at(START + Duration::seconds(754));
        assert_eq!(sample.equipment_id, 5);
        assert_eq!(sample.total_duration(), 754);
        assert_eq!(sample.timestamp, Some(START + Duration::seconds(754)));
    }

    #[test]
    fn duration_holds_at_byte_limit_on_long_sessions() {
        let mut rider = rider(11);
        let mut previous = 0;
        for tick in 0..200 {
            let sample = rider.tick_at(START + Duration::seconds(15_300 + tick * 5));
            assert!(
                sample.total_duration() >= previous,
                "duration went from {} to {}",
                previous,
                sample.total_duration()
            );
            previous = sample.total_duration();
        }
        assert_eq!(previous, 15_359);
        assert_eq!(previous as i64, MAX_REPORTED_SECS);
    }

    #[test]
    fn restart_resets_calories() {
        let mut rider = rider(9);
        for tick in 0..10 {
            rider.tick_at(START + Duration::seconds(tick * 5));
        }
        assert!(rider.state().calories > 0.0);
        rider.restart(START + Duration::hours(1));
        assert_eq!(rider.state().calories, 0.0);
        assert_eq!(rider.state().power, 100);
    }
}
