//! Keiser M3 bike telemetry: BLE broadcast decoding, a synthetic rider for
//! rides without hardware, recording replay and storage of the samples.

pub mod bluetooth;
pub mod config;
pub mod database;
pub mod models;
pub mod pipeline;
pub mod replay;
pub mod simulator;
pub mod sink;
pub mod utils;

pub use bluetooth::{decode, decode_auto, decode_hex, Confidence, DecodeError, Decoded, Layout};
pub use models::DecodedSample;
pub use simulator::{RiderState, SyntheticRider};
pub use sink::{LogSink, PostgresSink, SampleSink, SinkError};
