/// Keiser M3 manufacturer data decoding
///
/// The bike broadcasts its live metrics in the manufacturer-specific data of
/// every BLE advertisement. Multi-byte fields are big-endian. Two layouts are
/// known: the canonical 19-byte record and an older 17-byte record that still
/// carries the company identifier at its head.
use thiserror::Error;

use crate::models::DecodedSample;

/// Manufacturer data key used by Keiser M3 bikes
pub const KEISER_MANUFACTURER_ID: u16 = 0x0645;
/// Minimum payload length of the canonical layout
pub const CANONICAL_LEN: usize = 19;
/// Exact payload length of the legacy layout
pub const LEGACY_LEN: usize = 17;
/// Raw distance is broadcast in hundredths
pub const DISTANCE_DIVISOR: f64 = 100.0;
/// Tenths-scaled firmware broadcasts cadence in tenths of RPM
pub const CADENCE_DIVISOR: f64 = 10.0;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("payload truncated: got {actual} bytes, expected at least {expected}")]
    Truncated { actual: usize, expected: usize },
    #[error("malformed payload: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    Canonical,
    Legacy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confidence {
    Exact,
    /// Unrecognized data type, decoded with the default scaling
    Low,
}

/// Firmware data type byte of the canonical layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    /// Current firmware, cadence in tenths of RPM
    RealTime,
    /// Older firmware, cadence in whole RPM
    WholeRpm,
    Unknown(u8),
}

impl From<u8> for DataType {
    fn from(value: u8) -> Self {
        match value {
            0x00 => DataType::RealTime,
            0x01 => DataType::WholeRpm,
            other => DataType::Unknown(other),
        }
    }
}

impl DataType {
    fn cadence_divisor(self) -> f64 {
        match self {
            DataType::WholeRpm => 1.0,
            DataType::RealTime | DataType::Unknown(_) => CADENCE_DIVISOR,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareVersion {
    pub major: u8,
    pub minor: u8,
}

/// Result of a successful decode
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub layout: Layout,
    pub data_type: u8,
    pub firmware: Option<FirmwareVersion>,
    pub confidence: Confidence,
    pub sample: DecodedSample,
}

#[derive(Debug, Clone, Copy)]
enum Field {
    U8(usize),
    U16(usize),
}

impl Field {
    fn read(self, data: &[u8]) -> u16 {
        match self {
            Field::U8(at) => u16::from(data[at]),
            Field::U16(at) => u16::from_be_bytes([data[at], data[at + 1]]),
        }
    }

    fn write(self, buf: &mut [u8], value: u16) {
        match self {
            Field::U8(at) => buf[at] = value.min(u16::from(u8::MAX)) as u8,
            Field::U16(at) => buf[at..at + 2].copy_from_slice(&value.to_be_bytes()),
        }
    }
}

/// Byte offsets of one layout
struct FieldTable {
    len: usize,
    version: Option<(usize, usize)>,
    data_type: usize,
    equipment_id: usize,
    cadence: Field,
    heart_rate: Field,
    power: usize,
    caloric_burn: usize,
    duration_minutes: usize,
    duration_seconds: usize,
    distance: usize,
    gear: usize,
}

// 0-1 company id, 2-3 version, 4 data type, 5 equipment id, 6-7 cadence,
// 8-9 heart rate, 10-11 power, 12-13 calories, 14 minutes, 15 seconds,
// 16-17 distance, 18 gear
const CANONICAL: FieldTable = FieldTable {
    len: CANONICAL_LEN,
    version: Some((2, 3)),
    data_type: 4,
    equipment_id: 5,
    cadence: Field::U16(6),
    heart_rate: Field::U16(8),
    power: 10,
    caloric_burn: 12,
    duration_minutes: 14,
    duration_seconds: 15,
    distance: 16,
    gear: 18,
};

// 0-1 company id, 2 data type, 3 equipment id, 4 heart rate, 5 reserved,
// 6-7 power, 8 cadence, 9-10 calories, 11-12 distance, 13 minutes,
// 14 seconds, 15 reserved, 16 gear
const LEGACY: FieldTable = FieldTable {
    len: LEGACY_LEN,
    version: None,
    data_type: 2,
    equipment_id: 3,
    cadence: Field::U8(8),
    heart_rate: Field::U8(4),
    power: 6,
    caloric_burn: 9,
    duration_minutes: 13,
    duration_seconds: 14,
    distance: 11,
    gear: 16,
};

impl Layout {
    fn table(self) -> &'static FieldTable {
        match self {
            Layout::Canonical => &CANONICAL,
            Layout::Legacy => &LEGACY,
        }
    }
}

fn check_len(data: &[u8], expected: usize) -> Result<(), DecodeError> {
    if data.len() < expected {
        return Err(DecodeError::Truncated {
            actual: data.len(),
            expected,
        });
    }
    Ok(())
}

fn extract(data: &[u8], layout: Layout, cadence_divisor: f64) -> DecodedSample {
    let table = layout.table();
    DecodedSample {
        equipment_id: data[table.equipment_id],
        power: Field::U16(table.power).read(data),
        cadence: f64::from(table.cadence.read(data)) / cadence_divisor,
        heart_rate: table.heart_rate.read(data),
        gear: data[table.gear],
        caloric_burn: Field::U16(table.caloric_burn).read(data),
        duration_minutes: data[table.duration_minutes],
        duration_seconds: data[table.duration_seconds],
        distance: f64::from(Field::U16(table.distance).read(data)) / DISTANCE_DIVISOR,
        timestamp: None,
        low_confidence: false,
    }
}

/// Decode a canonical Keiser M3 broadcast
///
/// Requires at least 19 bytes; anything after byte 18 is ignored. An
/// unrecognized data type is still decoded, with tenths cadence scaling, and
/// flagged as low confidence.
pub fn decode(data: &[u8]) -> Result<Decoded, DecodeError> {
    check_len(data, CANONICAL_LEN)?;

    let table = Layout::Canonical.table();
    let raw_type = data[table.data_type];
    let data_type = DataType::from(raw_type);
    let confidence = match data_type {
        DataType::Unknown(_) => Confidence::Low,
        _ => Confidence::Exact,
    };

    let mut sample = extract(data, Layout::Canonical, data_type.cadence_divisor());
    sample.low_confidence = confidence == Confidence::Low;

    Ok(Decoded {
        layout: Layout::Canonical,
        data_type: raw_type,
        firmware: table.version.map(|(major, minor)| FirmwareVersion {
            major: data[major],
            minor: data[minor],
        }),
        confidence,
        sample,
    })
}

/// Decode the 17-byte legacy broadcast (8-bit heart rate, whole-RPM cadence)
pub fn decode_legacy(data: &[u8]) -> Result<Decoded, DecodeError> {
    check_len(data, LEGACY_LEN)?;

    if u16::from_be_bytes([data[0], data[1]]) != KEISER_MANUFACTURER_ID {
        return Err(DecodeError::Malformed(format!(
            "legacy payload must start with {:04x}, found {:02x}{:02x}",
            KEISER_MANUFACTURER_ID, data[0], data[1]
        )));
    }

    Ok(Decoded {
        layout: Layout::Legacy,
        data_type: data[LEGACY.data_type],
        firmware: None,
        confidence: Confidence::Exact,
        sample: extract(data, Layout::Legacy, 1.0),
    })
}

/// Pick the layout from the payload shape and decode it
pub fn decode_auto(data: &[u8]) -> Result<Decoded, DecodeError> {
    let legacy_prefix = KEISER_MANUFACTURER_ID.to_be_bytes();
    if data.len() >= CANONICAL_LEN {
        decode(data)
    } else if data.len() == LEGACY_LEN && data.starts_with(&legacy_prefix) {
        decode_legacy(data)
    } else {
        Err(DecodeError::Truncated {
            actual: data.len(),
            expected: CANONICAL_LEN,
        })
    }
}

/// Validate and convert a hex transport string
///
/// Lower and upper case digits are accepted. Odd lengths and foreign
/// characters are rejected before any byte is converted.
pub fn parse_hex(input: &str) -> Result<Vec<u8>, DecodeError> {
    let input = input.trim();

    if input.len() % 2 != 0 {
        return Err(DecodeError::Malformed(format!(
            "odd number of hex digits ({})",
            input.len()
        )));
    }
    if let Some(bad) = input.chars().find(|c| !c.is_ascii_hexdigit()) {
        return Err(DecodeError::Malformed(format!(
            "invalid hex character {:?}",
            bad
        )));
    }

    hex::decode(input).map_err(|e| DecodeError::Malformed(e.to_string()))
}

pub fn decode_hex(input: &str) -> Result<Decoded, DecodeError> {
    decode_auto(&parse_hex(input)?)
}

/// Write a decoded record back into its layout
pub fn encode(decoded: &Decoded) -> Vec<u8> {
    let table = decoded.layout.table();
    let sample = &decoded.sample;
    let mut buf = vec![0u8; table.len];

    Field::U16(0).write(&mut buf, KEISER_MANUFACTURER_ID);
    if let (Some((major, minor)), Some(version)) = (table.version, decoded.firmware) {
        buf[major] = version.major;
        buf[minor] = version.minor;
    }
    buf[table.data_type] = decoded.data_type;
    buf[table.equipment_id] = sample.equipment_id;

    let cadence_divisor = match decoded.layout {
        Layout::Canonical => DataType::from(decoded.data_type).cadence_divisor(),
        Layout::Legacy => 1.0,
    };
    table
        .cadence
        .write(&mut buf, scale_to_raw(sample.cadence, cadence_divisor));
    table.heart_rate.write(&mut buf, sample.heart_rate);
    Field::U16(table.power).write(&mut buf, sample.power);
    Field::U16(table.caloric_burn).write(&mut buf, sample.caloric_burn);
    buf[table.duration_minutes] = sample.duration_minutes;
    buf[table.duration_seconds] = sample.duration_seconds;
    Field::U16(table.distance).write(&mut buf, scale_to_raw(sample.distance, DISTANCE_DIVISOR));
    buf[table.gear] = sample.gear;

    buf
}

fn scale_to_raw(value: f64, divisor: f64) -> u16 {
    (value * divisor).round().clamp(0.0, f64::from(u16::MAX)) as u16
}
