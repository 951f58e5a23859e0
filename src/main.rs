use log::{error, info, warn};
use std::sync::Arc;
use tokio::sync::watch;

use keiser_etl::bluetooth::BluezScanner;
use keiser_etl::config::IngestConfig;
use keiser_etl::pipeline::{run_scan_loop, sample_queue, spawn_persistence};
use keiser_etl::replay::{load_recording, run_replay};
use keiser_etl::sink::{LogSink, PostgresSink, SampleSink};

fn build_sink(config: &IngestConfig) -> Result<Arc<dyn SampleSink>, Box<dyn std::error::Error>> {
    match &config.database_url {
        Some(url) => Ok(Arc::new(PostgresSink::new(url)?)),
        None => Ok(Arc::new(LogSink)),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .format_timestamp_secs()
        .init();

    // Load configuration
    let config = match IngestConfig::new() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e);
        }
    };

    let sink = match build_sink(&config) {
        Ok(sink) => sink,
        Err(e) => {
            error!("Failed to set up sample sink: {}", e);
            return Err(e);
        }
    };
    info!("Storing samples in {} sink", sink.name());

    // Handle Ctrl+C gracefully
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown requested, finishing queued samples");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                error!("Failed to listen for Ctrl+C: {}", e);
                shutdown_tx.closed().await;
            }
        }
    });

    let (tx, rx) = sample_queue(config.queue_capacity);
    let persistence = spawn_persistence(rx, sink);

    match config.replay_file.clone() {
        Some(path) => match load_recording(&path, config.replay_devices.as_ref()) {
            Ok(records) => {
                run_replay(records, &tx, shutdown_rx).await;
            }
            Err(e) => error!("Failed to load recording {}: {}", path.display(), e),
        },
        None => run_scan_loop(config, &BluezScanner, tx.clone(), shutdown_rx).await,
    }
    drop(tx);

    match persistence.await {
        Ok(leaderboard) => {
            if leaderboard.is_empty() {
                warn!("No samples were stored");
            }
            for (rank, entry) in leaderboard.iter().enumerate() {
                info!(
                    "#{} equipment {}: max power {} W, max cadence {:.1} rpm, {} kcal ({} samples)",
                    rank + 1,
                    entry.equipment_id,
                    entry.max_power,
                    entry.max_cadence,
                    entry.caloric_burn,
                    entry.samples
                );
            }
        }
        Err(e) => error!("Persistence task failed: {}", e),
    }

    info!("Program terminated. Exiting gracefully.");
    Ok(())
}
