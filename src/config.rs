use log::info;
use std::collections::HashSet;
use std::env;
use std::path::PathBuf;

use crate::bluetooth::KEISER_MANUFACTURER_ID;

const DEFAULT_NAME_PREFIX: &str = "M3";
const DEFAULT_SCAN_SECS: u64 = 10;
const DEFAULT_POLL_SECS: u64 = 5;
const DEFAULT_QUEUE_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub database_url: Option<String>,
    pub name_prefix: String,
    pub manufacturer_id: u16,
    pub scan_duration_secs: u64,
    pub poll_interval_secs: u64,
    pub queue_capacity: usize,
    pub simulator_enabled: bool,
    pub simulated_equipment_id: u8,
    pub replay_file: Option<PathBuf>,
    pub replay_devices: Option<HashSet<String>>,
}

impl IngestConfig {
    pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
        // Load environment variables
        dotenv::dotenv().ok();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from any key lookup (the environment in production)
    pub fn from_lookup<F>(lookup: F) -> Result<Self, Box<dyn std::error::Error>>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let database_url = var("DATABASE_URL");
        if database_url.is_none() {
            info!("DATABASE_URL not set, samples will only be logged");
        }

        let manufacturer_id = match var("KEISER_MANUFACTURER_ID") {
            Some(raw) => parse_manufacturer_id(&raw)?,
            None => KEISER_MANUFACTURER_ID,
        };

        let queue_capacity = parse_or(
            "KEISER_QUEUE_CAPACITY",
            var("KEISER_QUEUE_CAPACITY"),
            DEFAULT_QUEUE_CAPACITY,
        )?;
        if queue_capacity == 0 {
            return Err("KEISER_QUEUE_CAPACITY must be greater than zero".into());
        }

        let simulator_enabled = match var("KEISER_SIMULATOR") {
            Some(raw) => parse_flag(&raw)
                .ok_or_else(|| format!("KEISER_SIMULATOR must be true or false, got '{}'", raw))?,
            None => true,
        };

        let replay_devices = var("KEISER_REPLAY_DEVICES").map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .collect::<HashSet<_>>()
        });

        let config = IngestConfig {
            database_url,
            name_prefix: var("KEISER_NAME_PREFIX")
                .unwrap_or_else(|| DEFAULT_NAME_PREFIX.to_string()),
            manufacturer_id,
            scan_duration_secs: parse_or("KEISER_SCAN_SECS", var("KEISER_SCAN_SECS"), DEFAULT_SCAN_SECS)?,
            poll_interval_secs: parse_or("KEISER_POLL_SECS", var("KEISER_POLL_SECS"), DEFAULT_POLL_SECS)?,
            queue_capacity,
            simulator_enabled,
            simulated_equipment_id: parse_or(
                "KEISER_SIMULATED_EQUIPMENT_ID",
                var("KEISER_SIMULATED_EQUIPMENT_ID"),
                0,
            )?,
            replay_file: var("KEISER_REPLAY_FILE").map(PathBuf::from),
            replay_devices,
        };

        info!(
            "Looking for devices named '{}*' with manufacturer id {:#06x}",
            config.name_prefix, config.manufacturer_id
        );

        Ok(config)
    }
}

/// Parse a manufacturer identifier given as `0x0645` or as decimal
pub fn parse_manufacturer_id(raw: &str) -> Result<u16, String> {
    let raw = raw.trim();
    let parsed = match raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
    {
        Some(hex_digits) => u16::from_str_radix(hex_digits, 16),
        None => raw.parse::<u16>(),
    };
    parsed.map_err(|e| format!("Invalid manufacturer id '{}': {}", raw, e))
}

fn parse_or<T>(key: &str, raw: Option<String>, default: T) -> Result<T, String>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        Some(raw) => raw
            .parse()
            .map_err(|e| format!("Invalid value '{}' for {}: {}", raw, key, e)),
        None => Ok(default),
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
