//! PostgreSQL source client for pg-cratedb-sync.

use crate::config::{PostgresConfig, SslMode, TrackingColumns};
use crate::error::{Error, Result};
use crate::source::{ChangeSelection, ChangeSource, Row};
use crate::sql;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, Connection, NoTls};
use tracing::{debug, info, instrument, warn};

#[cfg(feature = "tls-native")]
use native_tls::TlsConnector;
#[cfg(feature = "tls-native")]
use postgres_native_tls::MakeTlsConnector;

/// PostgreSQL client wrapper.
pub struct PostgresClient {
    client: Client,
}

impl PostgresClient {
    /// Connect to PostgreSQL.
    #[instrument(skip(config), fields(url = %mask_url(&config.url)))]
    pub async fn connect(config: &PostgresConfig) -> Result<Self> {
        info!("Connecting to PostgreSQL...");

        let conn_str = config.connection_string()?;

        let client = match config.ssl_mode {
            SslMode::Disable => {
                let (client, connection) = tokio_postgres::connect(&conn_str, NoTls)
                    .await
                    .map_err(|e| Error::postgres_connection("Failed to connect", e))?;
                spawn_connection(connection);
                client
            }
            mode => connect_tls(&conn_str, mode).await?,
        };

        info!("Connected to PostgreSQL");
        Ok(Self { client })
    }
}

#[async_trait]
impl ChangeSource for PostgresClient {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn ping(&self) -> Result<()> {
        self.client
            .query_one("SELECT 1", &[])
            .await
            .map_err(|e| Error::postgres_query("", "Ping failed", e))?;
        Ok(())
    }

    #[instrument(skip(self, columns), fields(selection = %selection))]
    async fn fetch_changes(
        &self,
        table: &str,
        columns: &TrackingColumns,
        selection: ChangeSelection,
    ) -> Result<Vec<Row>> {
        let query = change_query(table, columns, selection);
        debug!("Executing query: {}", query);

        let rows = match selection {
            ChangeSelection::LatestBatch => self.client.query(&query, &[]).await,
            ChangeSelection::SinceWatermark(ref since) => {
                let params: [&(dyn ToSql + Sync); 1] = [since];
                self.client.query(&query, &params).await
            }
        }
        .map_err(|e| Error::postgres_query(table, format!("Fetch failed: {}", e), e))?;

        let mut results = Vec::with_capacity(rows.len());
        for row in rows {
            let value: JsonValue = row
                .try_get(0)
                .map_err(|e| Error::postgres_query(table, "Decode failed", e))?;
            match value {
                JsonValue::Object(map) => results.push(map),
                other => warn!("Skipping non-object row from {}: {}", table, other),
            }
        }

        debug!("Fetched {} rows from {}", results.len(), table);
        Ok(results)
    }
}

/// Wrap the change query so every row comes back as one JSON object.
///
/// `row_to_json` keeps the column order and hands back every type as JSON.
/// Ordering sits on the outer select, where PostgreSQL honours it.
fn change_query(table: &str, columns: &TrackingColumns, selection: ChangeSelection) -> String {
    match selection {
        ChangeSelection::LatestBatch => format!(
            "SELECT row_to_json(changes) FROM ({}) AS changes",
            sql::latest_batch_query(table, columns)
        ),
        ChangeSelection::SinceWatermark(_) => format!(
            "SELECT row_to_json(changes) FROM ({}) AS changes {}",
            sql::changed_since_query(table, columns, "$1::timestamptz"),
            sql::order_by_updated_at("changes", columns)
        ),
    }
}

fn spawn_connection<S, T>(connection: Connection<S, T>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::error!("PostgreSQL connection error: {}", e);
        }
    });
}

#[cfg(feature = "tls-native")]
async fn connect_tls(conn_str: &str, mode: SslMode) -> Result<Client> {
    let connector = TlsConnector::builder()
        .danger_accept_invalid_certs(mode == SslMode::Prefer)
        .build()
        .map_err(|e| Error::postgres_connection("TLS setup failed", e))?;
    let connector = MakeTlsConnector::new(connector);
    let (client, connection) = tokio_postgres::connect(conn_str, connector)
        .await
        .map_err(|e| Error::postgres_connection("Failed to connect", e))?;
    spawn_connection(connection);
    Ok(client)
}

#[cfg(all(feature = "tls-rustls", not(feature = "tls-native")))]
async fn connect_tls(conn_str: &str, _mode: SslMode) -> Result<Client> {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    let connector = tokio_postgres_rustls::MakeRustlsConnect::new(tls_config);
    let (client, connection) = tokio_postgres::connect(conn_str, connector)
        .await
        .map_err(|e| Error::postgres_connection("Failed to connect", e))?;
    spawn_connection(connection);
    Ok(client)
}

#[cfg(not(any(feature = "tls-native", feature = "tls-rustls")))]
async fn connect_tls(_conn_str: &str, mode: SslMode) -> Result<Client> {
    Err(Error::config(format!(
        "ssl_mode {:?} needs the tls-native or tls-rustls feature",
        mode
    )))
}

/// Mask sensitive parts of URL for logging.
pub(crate) fn mask_url(url: &str) -> String {
    if let Ok(mut parsed) = url::Url::parse(url) {
        if parsed.password().is_some() {
            let _ = parsed.set_password(Some("***"));
        }
        parsed.to_string()
    } else {
        "[invalid url]".to_string()
    }
}
