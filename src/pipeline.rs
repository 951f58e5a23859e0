/// Hand-off between the producers (scanner, simulator, replayer) and storage
///
/// Producers push samples onto a bounded queue without waiting; a single
/// persistence task drains it in arrival order and feeds the sink.
use log::{debug, error, info, warn};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};

use crate::bluetooth::BikeScanner;
use crate::config::IngestConfig;
use crate::models::{DecodedSample, LeaderboardEntry};
use crate::simulator::SyntheticRider;
use crate::sink::SampleSink;
use crate::utils::{format_datetime, Standings};

const LEADERBOARD_SIZE: usize = 10;

pub fn sample_queue(capacity: usize) -> (mpsc::Sender<DecodedSample>, mpsc::Receiver<DecodedSample>) {
    mpsc::channel(capacity)
}

/// Queue a sample without blocking the caller
///
/// A full queue drops the sample; producers must never stall on storage.
pub fn enqueue(tx: &mpsc::Sender<DecodedSample>, sample: DecodedSample) -> bool {
    match tx.try_send(sample) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(sample)) => {
            warn!(
                "Sample queue full, dropping sample from equipment {}",
                sample.equipment_id
            );
            false
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            warn!("Sample queue closed, dropping sample");
            false
        }
    }
}

/// Start the task that stores queued samples
///
/// The task ends once every sender is dropped and the queue is drained,
/// returning the final leaderboard.
pub fn spawn_persistence(
    mut rx: mpsc::Receiver<DecodedSample>,
    sink: Arc<dyn SampleSink>,
) -> JoinHandle<Vec<LeaderboardEntry>> {
    tokio::spawn(async move {
        let mut standings = Standings::new();
        let mut stored = 0u64;

        while let Some(sample) = rx.recv().await {
            if !sample.is_plausible() {
                warn!(
                    "Implausible heart rate {} bpm from equipment {}",
                    sample.heart_rate, sample.equipment_id
                );
            }
            if !standings.record(&sample) {
                info!(
                    "Equipment {} duration went back to {}s, treating as a new session",
                    sample.equipment_id,
                    sample.total_duration()
                );
            }

            match sink.accept(&sample).await {
                Ok(()) => {
                    stored += 1;
                    debug!(
                        "Stored sample from equipment {} in {} sink",
                        sample.equipment_id,
                        sink.name()
                    );
                }
                Err(e) => error!(
                    "Failed to store sample from equipment {} in {} sink: {}",
                    sample.equipment_id,
                    sink.name(),
                    e
                ),
            }
        }

        info!("Sample queue closed after {} stored samples", stored);
        standings.leaderboard(LEADERBOARD_SIZE)
    })
}

/// Scan for bikes until shutdown, falling back to the synthetic rider
///
/// Every round either enqueues the broadcast of every bike found or, when
/// none answered, one synthetic sample. The sender is dropped on return so
/// the persistence task can drain and finish.
pub async fn run_scan_loop<S>(
    config: IngestConfig,
    scanner: &S,
    tx: mpsc::Sender<DecodedSample>,
    mut shutdown: watch::Receiver<bool>,
) where
    S: BikeScanner + ?Sized,
{
    info!("Starting Keiser M3 scan loop");

    let mut rider = config
        .simulator_enabled
        .then(|| SyntheticRider::new(config.simulated_equipment_id));

    loop {
        if *shutdown.borrow() {
            break;
        }

        let round = tokio::select! {
            result = scanner.scan(&config) => result,
            _ = shutdown.changed() => break,
        };

        let now = OffsetDateTime::now_utc();
        let found = match round {
            Ok(bikes) => {
                info!(
                    "Scan at {} found {} bike(s)",
                    format_datetime(&now),
                    bikes.len()
                );
                let found = !bikes.is_empty();
                for (addr, decoded) in bikes {
                    debug!("Queueing broadcast from {}", addr);
                    enqueue(&tx, decoded.sample.stamped(now));
                }
                found
            }
            Err(e) => {
                error!("Scan failed: {}", e);
                false
            }
        };

        if !found {
            match rider.as_mut() {
                Some(rider) => {
                    warn!("No Keiser bikes found, sending synthetic sample");
                    enqueue(&tx, rider.tick_at(now));
                }
                None => warn!("No Keiser bikes found"),
            }
        }

        tokio::select! {
            _ = sleep(Duration::from_secs(config.poll_interval_secs)) => {}
            _ = shutdown.changed() => break,
        }
    }

    info!("Scan loop stopped");
}
