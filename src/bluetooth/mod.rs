pub mod decoder;
pub mod scanner;

pub use decoder::{decode, decode_auto, decode_hex, decode_legacy, encode, parse_hex};
pub use decoder::{Confidence, DecodeError, Decoded, Layout, KEISER_MANUFACTURER_ID};
pub use scanner::{scan_for_bikes, AbortOnDrop, BikeScanner, BluezScanner, ScanResult};
