/// Replay of recorded BLE advertisements
///
/// Recordings are JSON arrays exported by a phone sensor logger. Bluetooth
/// entries carry the device id, the manufacturer data as hex and the time
/// since the recording started. Replay keeps the original spacing.
use log::{debug, info, warn};
use serde::{Deserialize, Deserializer};
use std::collections::HashSet;
use std::path::Path;
use time::OffsetDateTime;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, Duration, Instant};

use crate::bluetooth::decode_hex;
use crate::models::DecodedSample;
use crate::pipeline::enqueue;

const BLUETOOTH_SENSOR: &str = "Bluetooth";
const UNKNOWN_DEVICE: &str = "UNKNOWN_DEVICE";

#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("failed to read recording: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse recording: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RecordedAdvertisement {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "manufacturerData", default)]
    pub manufacturer_data: Option<String>,
    #[serde(deserialize_with = "seconds_from_number_or_text")]
    pub seconds_elapsed: f64,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReplayStats {
    pub sent: usize,
    pub skipped: usize,
    pub failed: usize,
    pub dropped: usize,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Seconds {
    Number(f64),
    Text(String),
}

fn seconds_from_number_or_text<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    match Seconds::deserialize(deserializer)? {
        Seconds::Number(secs) => Ok(secs),
        Seconds::Text(text) => text.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// Parse a recording, keeping Bluetooth entries in time order
///
/// `allow` restricts the replay to the given device ids.
pub fn parse_recording(
    json: &str,
    allow: Option<&HashSet<String>>,
) -> Result<Vec<RecordedAdvertisement>, ReplayError> {
    let entries: Vec<serde_json::Value> = serde_json::from_str(json)?;

    let mut records: Vec<RecordedAdvertisement> = entries
        .into_iter()
        .filter(|entry| entry.get("sensor").and_then(|s| s.as_str()) == Some(BLUETOOTH_SENSOR))
        .filter_map(|entry| match serde_json::from_value::<RecordedAdvertisement>(entry) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Skipping unreadable Bluetooth entry: {}", e);
                None
            }
        })
        .filter(|record| match (allow, record.id.as_ref()) {
            (Some(allow), Some(id)) => allow.contains(id),
            (Some(_), None) => false,
            (None, _) => true,
        })
        .collect();

    records.sort_by(|a, b| a.seconds_elapsed.total_cmp(&b.seconds_elapsed));
    Ok(records)
}

pub fn load_recording(
    path: &Path,
    allow: Option<&HashSet<String>>,
) -> Result<Vec<RecordedAdvertisement>, ReplayError> {
    let json = std::fs::read_to_string(path)?;
    let records = parse_recording(&json, allow)?;
    info!(
        "Loaded {} Bluetooth records from {}",
        records.len(),
        path.display()
    );
    Ok(records)
}

/// Push recorded advertisements through the decoder at their recorded pace
///
/// Bad records are logged and skipped. Stops early on shutdown.
pub async fn run_replay(
    records: Vec<RecordedAdvertisement>,
    tx: &mpsc::Sender<DecodedSample>,
    mut shutdown: watch::Receiver<bool>,
) -> ReplayStats {
    let mut stats = ReplayStats::default();
    let start = Instant::now();

    for record in records {
        let device_id = record.id.as_deref().unwrap_or(UNKNOWN_DEVICE);
        let payload = record.manufacturer_data.as_deref().map_or("", str::trim);

        if payload.is_empty() {
            warn!("Skipping device {} - no manufacturer data", device_id);
            stats.skipped += 1;
            continue;
        }

        let decoded = match decode_hex(payload) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!("Skipping device {} - {}: {}", device_id, e, payload);
                stats.failed += 1;
                continue;
            }
        };

        let offset = if record.seconds_elapsed.is_finite() {
            record.seconds_elapsed.max(0.0)
        } else {
            0.0
        };
        let target = match Duration::try_from_secs_f64(offset) {
            Ok(target) => target,
            Err(e) => {
                warn!(
                    "Skipping device {} - unusable offset {}: {}",
                    device_id, record.seconds_elapsed, e
                );
                stats.failed += 1;
                continue;
            }
        };
        let delay = target.saturating_sub(start.elapsed());
        debug!(
            "Waiting {:.2} sec before sending data for {}",
            delay.as_secs_f64(),
            device_id
        );

        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            _ = sleep(delay) => {}
            _ = shutdown.changed() => {
                info!("Replay interrupted");
                break;
            }
        }

        if enqueue(tx, decoded.sample.stamped(OffsetDateTime::now_utc())) {
            stats.sent += 1;
        } else {
            stats.dropped += 1;
        }
    }

    info!(
        "Replay finished: {} sent, {} skipped, {} failed, {} dropped",
        stats.sent, stats.skipped, stats.failed, stats.dropped
    );
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::sample_queue;
    use std::io::Write;

    const RECORDING: &str = r#"[
        {"sensor": "Accelerometer", "seconds_elapsed": "0.0", "x": "0.1"},
        {"sensor": "Bluetooth", "id": "F5:FC:73:B9:9E:CA", "seconds_elapsed": "0.03",
         "manufacturerData": "0645ff0cc801000006000000001e000001"},
        {"sensor": "Bluetooth", "id": "F5:FC:73:B9:9E:CA", "seconds_elapsed": 0.01,
         "manufacturerData": "0645061e0003035200af00d2002a0c22012c0e"},
        {"sensor": "Bluetooth", "id": "C0:FF:EE:00:00:01", "seconds_elapsed": "0.02",
         "manufacturerData": ""},
        {"sensor": "Bluetooth", "id": "C0:FF:EE:00:00:02", "seconds_elapsed": "0.025",
         "manufacturerData": "0645f"},
        {"sensor": "Bluetooth", "id": "C0:FF:EE:00:00:03", "seconds_elapsed": "soon"}
    ]"#;

    #[test]
    fn bluetooth_records_are_sorted_by_time() {
        let records = parse_recording(RECORDING, None).unwrap();
        let times: Vec<f64> = records.iter().map(|r| r.seconds_elapsed).collect();
        assert_eq!(times, vec![0.01, 0.02, 0.025, 0.03]);
    }

    #[test]
    fn allow_list_filters_devices() {
        let allow: HashSet<String> = ["F5:FC:73:B9:9E:CA".to_string()].into_iter().collect();
        let records = parse_recording(RECORDING, Some(&allow)).unwrap();
        assert_eq!(records.len(), 2);
        assert!(records
            .iter()
            .all(|r| r.id.as_deref() == Some("F5:FC:73:B9:9E:CA")));
    }

    #[test]
    fn recording_must_be_an_array() {
        assert!(matches!(
            parse_recording("{\"sensor\": \"Bluetooth\"}", None),
            Err(ReplayError::Json(_))
        ));
    }

    #[tokio::test]
    async fn replay_sends_decoded_samples_in_recorded_order() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(RECORDING.as_bytes()).unwrap();
        let records = load_recording(file.path(), None).unwrap();

        let (tx, mut rx) = sample_queue(8);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = run_replay(records, &tx, shutdown_rx).await;
        drop(tx);

        assert_eq!(
            stats,
            ReplayStats {
                sent: 2,
                skipped: 1,
                failed: 1,
                dropped: 0
            }
        );

        let first = rx.recv().await.unwrap();
        assert_eq!(first.equipment_id, 3);
        assert_eq!(first.power, 210);
        assert!(first.timestamp.is_some());

        let second = rx.recv().await.unwrap();
        assert_eq!(second.equipment_id, 12);
        assert_eq!(second.gear, 1);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn replay_skips_offsets_beyond_duration_range() {
        let payload = "0645ff0cc801000006000000001e000001";
        let records = vec![
            RecordedAdvertisement {
                id: Some("C0:FF:EE:00:00:04".into()),
                manufacturer_data: Some(payload.into()),
                seconds_elapsed: 0.0,
            },
            RecordedAdvertisement {
                id: Some("C0:FF:EE:00:00:05".into()),
                manufacturer_data: Some(payload.into()),
                seconds_elapsed: "1e300".parse().unwrap(),
            },
        ];
        let (tx, mut rx) = sample_queue(4);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let stats = run_replay(records, &tx, shutdown_rx).await;
        drop(tx);

        assert_eq!(stats.sent, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(rx.recv().await.unwrap().equipment_id, 12);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn replay_stops_on_shutdown() {
        let records = vec![RecordedAdvertisement {
            id: None,
            manufacturer_data: Some("0645ff0cc801000006000000001e000001".into()),
            seconds_elapsed: 3600.0,
        }];
        let (tx, _rx) = sample_queue(1);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        shutdown_tx.send(true).unwrap();

        let stats = run_replay(records, &tx, shutdown_rx).await;
        assert_eq!(stats.sent, 0);
    }
}
