/// Database operations for storing bike samples
use crate::database::connection::Database;
use crate::models::DecodedSample;
use time::OffsetDateTime;

/// Store one bike sample in the keiser_m3 hypertable
///
/// Samples without a receive time are stored with the current time.
pub async fn store_sample(database: &Database, sample: &DecodedSample) -> Result<(), String> {
    let time = sample.timestamp.unwrap_or_else(OffsetDateTime::now_utc);

    database
        .execute(
            "INSERT INTO keiser_m3(time, equipment_id, power, cadence, heart_rate, gear, caloric_burn, duration, distance, low_confidence)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
            &[
                &time,
                &i32::from(sample.equipment_id),
                &i32::from(sample.power),
                &sample.cadence,
                &i32::from(sample.heart_rate),
                &i32::from(sample.gear),
                &i32::from(sample.caloric_burn),
                &(sample.total_duration() as i32),
                &sample.distance,
                &sample.low_confidence,
            ],
        )
        .await
        .map(|_| ())
}
