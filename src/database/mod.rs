pub mod connection;
pub mod operations;

pub use connection::{ConnectionSettings, Database};
pub use operations::store_sample;
