/// Bluetooth Low Energy scanning for Keiser M3 bikes
use async_trait::async_trait;
use futures_util::StreamExt;
use log::{debug, error, warn};
use std::collections::HashMap;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};

use crate::bluetooth::decoder::{decode_auto, Confidence, Decoded};
use crate::config::IngestConfig;

pub type ScanResult = Result<HashMap<String, Decoded>, Box<dyn std::error::Error>>;

/// One discovery round producing the bikes seen, keyed by address
#[async_trait(?Send)]
pub trait BikeScanner {
    async fn scan(&self, config: &IngestConfig) -> ScanResult;
}

/// Scanner backed by the BlueZ daemon
pub struct BluezScanner;

#[async_trait(?Send)]
impl BikeScanner for BluezScanner {
    async fn scan(&self, config: &IngestConfig) -> ScanResult {
        scan_for_bikes(config).await
    }
}

/// Aborts the wrapped task when dropped, including when the owning future is cancelled
pub struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> AbortOnDrop<T> {
    pub fn new(handle: JoinHandle<T>) -> Self {
        AbortOnDrop(handle)
    }
}

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Keep devices whose advertised name starts with the configured prefix
pub fn matches_prefix(name: Option<&str>, prefix: &str) -> bool {
    name.map_or(false, |name| name.starts_with(prefix))
}

/// Decode the manufacturer data of one advertisement
///
/// Returns None when the advertisement carries nothing under the configured
/// key or when decoding fails; failures are logged so the scan carries on.
pub fn decode_advertisement(
    addr: &str,
    manufacturer_data: &HashMap<u16, Vec<u8>>,
    manufacturer_id: u16,
) -> Option<Decoded> {
    let payload = manufacturer_data.get(&manufacturer_id)?;

    match decode_auto(payload) {
        Ok(decoded) => {
            if decoded.confidence == Confidence::Low {
                warn!(
                    "Unrecognized data type {:#04x} from {}, decoded with default scaling",
                    decoded.data_type, addr
                );
            }
            Some(decoded)
        }
        Err(e) => {
            warn!("Dropping advertisement from {}: {}", addr, e);
            None
        }
    }
}

/// Scan for Keiser M3 bikes and decode their broadcasts
///
/// Runs LE discovery for the configured duration, then inspects every
/// discovered device whose name matches the configured prefix.
///
/// # Returns
/// HashMap of device address -> decoded broadcast, or error if the adapter
/// cannot be used
pub async fn scan_for_bikes(config: &IngestConfig) -> ScanResult {
    let mut bikes = HashMap::new();

    let session = match bluer::Session::new().await {
        Ok(session) => session,
        Err(e) => {
            error!("Failed to create Bluetooth session: {}", e);
            return Err(e.into());
        }
    };

    let adapter = match session.default_adapter().await {
        Ok(adapter) => adapter,
        Err(e) => {
            error!("Failed to get default Bluetooth adapter: {}", e);
            return Err(e.into());
        }
    };

    if let Err(e) = adapter.set_powered(true).await {
        error!("Failed to power on adapter: {}", e);
        return Err(e.into());
    }

    // Bikes re-broadcast changing metrics, so duplicates must be reported
    let filter = bluer::DiscoveryFilter {
        transport: bluer::DiscoveryTransport::Le,
        duplicate_data: true,
        ..Default::default()
    };

    if let Err(e) = adapter.set_discovery_filter(filter).await {
        warn!("Failed to set discovery filter: {}", e);
    }

    let discovery = match adapter.discover_devices().await {
        Ok(discovery_stream) => AbortOnDrop::new(tokio::spawn(async move {
            let mut stream = discovery_stream;
            while let Some(event) = stream.next().await {
                debug!("Discovery event: {:?}", event);
            }
        })),
        Err(e) => {
            error!("Failed to start device discovery: {}", e);
            return Err(e.into());
        }
    };

    sleep(Duration::from_secs(config.scan_duration_secs)).await;

    drop(discovery);

    let devices = match adapter.device_addresses().await {
        Ok(devices) => devices,
        Err(e) => {
            error!("Failed to get device addresses: {}", e);
            return Err(e.into());
        }
    };

    for addr in devices {
        let device = match adapter.device(addr) {
            Ok(device) => device,
            Err(_) => continue,
        };

        let name = device.name().await.ok().flatten();
        if !matches_prefix(name.as_deref(), &config.name_prefix) {
            continue;
        }

        let addr_str = device.address().to_string().to_uppercase();

        match device.manufacturer_data().await {
            Ok(Some(manufacturer_data)) => {
                if let Some(decoded) =
                    decode_advertisement(&addr_str, &manufacturer_data, config.manufacturer_id)
                {
                    debug!(
                        "Bike {} ({}): power={} W, cadence={:.1} rpm, heart_rate={} bpm, gear={}",
                        addr_str,
                        decoded.sample.equipment_id,
                        decoded.sample.power,
                        decoded.sample.cadence,
                        decoded.sample.heart_rate,
                        decoded.sample.gear
                    );
                    bikes.insert(addr_str, decoded);
                }
            }
            Ok(None) => {
                debug!("No manufacturer data for {}", addr_str);
            }
            Err(e) => {
                debug!("Failed to get manufacturer data for {}: {}", addr_str, e);
            }
        }
    }

    Ok(bikes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::decoder::{parse_hex, KEISER_MANUFACTURER_ID};
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn discovery_task_is_aborted_when_scan_is_cancelled() {
        let (alive_tx, alive_rx) = oneshot::channel::<()>();
        let round = async move {
            let _discovery = AbortOnDrop::new(tokio::spawn(async move {
                let _alive = alive_tx;
                std::future::pending::<()>().await;
            }));
            sleep(Duration::from_secs(3600)).await;
        };

        // Cancel the round mid-sleep the way the scan loop does on shutdown
        let cancelled = tokio::time::timeout(Duration::from_millis(20), round).await;
        assert!(cancelled.is_err());

        // The aborted task drops its sender, so the receiver resolves with an error
        let outcome = tokio::time::timeout(Duration::from_secs(1), alive_rx).await;
        assert!(matches!(outcome, Ok(Err(_))));
    }

    #[test]
    fn name_prefix_filter() {
        assert!(matches_prefix(Some("M3"), "M3"));
        assert!(matches_prefix(Some("M3i-07"), "M3"));
        assert!(!matches_prefix(Some("Polar H10 8C2D"), "M3"));
        assert!(!matches_prefix(None, "M3"));
    }

    #[test]
    fn advertisement_under_other_key_is_ignored() {
        let mut data = HashMap::new();
        data.insert(0x0499, vec![0u8; 24]);
        assert!(decode_advertisement("AA", &data, KEISER_MANUFACTURER_ID).is_none());
    }

    #[test]
    fn bad_advertisement_is_dropped_not_fatal() {
        let mut data = HashMap::new();
        data.insert(KEISER_MANUFACTURER_ID, vec![0x06, 0x45, 0x01]);
        assert!(decode_advertisement("AA", &data, KEISER_MANUFACTURER_ID).is_none());

        data.insert(
            KEISER_MANUFACTURER_ID,
            parse_hex("0645ff0cc801000006000000001e000001").unwrap(),
        );
        let decoded = decode_advertisement("AA", &data, KEISER_MANUFACTURER_ID).unwrap();
        assert_eq!(decoded.sample.equipment_id, 12);
    }
}
