/// Destinations for decoded samples
use async_trait::async_trait;
use log::info;
use thiserror::Error;

use crate::database::{store_sample, ConnectionSettings, Database};
use crate::models::DecodedSample;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("database error: {0}")]
    Database(String),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[async_trait]
pub trait SampleSink: Send + Sync {
    fn name(&self) -> &str;

    async fn accept(&self, sample: &DecodedSample) -> Result<(), SinkError>;
}

/// Writes samples to PostgreSQL / TimescaleDB over one reused connection
pub struct PostgresSink {
    database: Database,
}

impl PostgresSink {
    pub fn new(database_url: &str) -> Result<Self, SinkError> {
        let settings = ConnectionSettings::from_url(database_url).map_err(SinkError::Database)?;
        Ok(PostgresSink {
            database: Database::new(settings),
        })
    }
}

#[async_trait]
impl SampleSink for PostgresSink {
    fn name(&self) -> &str {
        "postgres"
    }

    async fn accept(&self, sample: &DecodedSample) -> Result<(), SinkError> {
        store_sample(&self.database, sample)
            .await
            .map_err(SinkError::Database)
    }
}

/// Logs the flat key-value form of every sample
pub struct LogSink;

#[async_trait]
impl SampleSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn accept(&self, sample: &DecodedSample) -> Result<(), SinkError> {
        let map = serde_json::Value::Object(sample.to_map()?);
        info!("Sample: {}", map);
        Ok(())
    }
}
