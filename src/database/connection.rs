use log::{error, info, warn};
use openssl::ssl::{SslConnector, SslMethod, SslVerifyMode};
use postgres_openssl::MakeTlsConnector;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};
use tokio_postgres::types::ToSql;
use tokio_postgres::Client;
use url::Url;

const MAX_ATTEMPTS: usize = 2;
const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

/// Connection string split from its `sslrootcert` parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub url: String,
    pub sslrootcert: String,
}

impl ConnectionSettings {
    /// The CA path travels in the URL query but tokio-postgres must not see it
    pub fn from_url(database_url: &str) -> Result<Self, String> {
        let url = Url::parse(database_url).map_err(|e| format!("URL parse error: {}", e))?;

        let mut sslrootcert = None;
        let mut clean_params = Vec::new();
        for (key, value) in url.query_pairs() {
            if key == "sslrootcert" {
                sslrootcert = Some(value.to_string());
            } else {
                clean_params.push((key.into_owned(), value.into_owned()));
            }
        }

        let sslrootcert = sslrootcert.ok_or("sslrootcert parameter missing")?;

        let mut clean_url = url.clone();
        clean_url.set_query(None);
        if !clean_params.is_empty() {
            let query = clean_params
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join("&");
            clean_url.set_query(Some(&query));
        }

        Ok(ConnectionSettings {
            url: clean_url.to_string(),
            sslrootcert,
        })
    }
}

pub fn create_ssl_connector(sslrootcert_path: &str) -> Result<MakeTlsConnector, String> {
    let mut builder =
        SslConnector::builder(SslMethod::tls()).map_err(|e| format!("SSL builder error: {}", e))?;

    builder
        .set_ca_file(sslrootcert_path)
        .map_err(|e| format!("Error loading CA cert: {}", e))?;

    // TODO: verify the server certificate once the TimescaleDB host has a CA-signed cert
    builder.set_verify(SslVerifyMode::NONE);

    Ok(MakeTlsConnector::new(builder.build()))
}

/// One shared TLS connection, opened on first use
///
/// A dropped connection is re-opened and the statement retried once. After
/// a failed connect, statements fail fast until the backoff has passed so a
/// database outage cannot hold up the queue.
pub struct Database {
    settings: ConnectionSettings,
    state: Mutex<ConnectionState>,
}

#[derive(Default)]
struct ConnectionState {
    client: Option<Client>,
    retry_at: Option<Instant>,
}

impl Database {
    pub fn new(settings: ConnectionSettings) -> Self {
        Database {
            settings,
            state: Mutex::new(ConnectionState::default()),
        }
    }

    async fn connect(&self) -> Result<Client, String> {
        let connector = create_ssl_connector(&self.settings.sslrootcert)?;
        let (client, connection) = tokio_postgres::connect(&self.settings.url, connector)
            .await
            .map_err(|e| format!("Connection error: {}", e))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("Connection error: {}", e);
            }
        });

        info!("Connected to database");
        Ok(client)
    }

    pub async fn execute(
        &self,
        statement: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<u64, String> {
        let mut state = self.state.lock().await;

        for attempt in 1..=MAX_ATTEMPTS {
            if state.client.is_none() {
                if let Some(retry_at) = state.retry_at {
                    let now = Instant::now();
                    if now < retry_at {
                        return Err(format!(
                            "Database unavailable, reconnecting in {:.1} sec",
                            (retry_at - now).as_secs_f64()
                        ));
                    }
                }

                match self.connect().await {
                    Ok(client) => {
                        state.client = Some(client);
                        state.retry_at = None;
                    }
                    Err(e) => {
                        state.retry_at = Some(Instant::now() + RECONNECT_BACKOFF);
                        return Err(e);
                    }
                }
            }

            let Some(client) = state.client.as_ref() else {
                continue;
            };
            let result = client.execute(statement, params).await;
            let closed = client.is_closed();

            match result {
                Ok(rows) => return Ok(rows),
                Err(e) if closed => {
                    warn!("Attempt {}: connection lost: {}", attempt, e);
                    state.client = None;
                }
                Err(e) => return Err(format!("Query error: {}", e)),
            }
        }

        Err("Connection lost, giving up on this statement".into())
    }
}
