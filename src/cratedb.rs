//! CrateDB destination over the HTTP `/_sql` endpoint.

use crate::config::{DestinationConfig, DestinationKind};
use crate::destination::Destination;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, info, instrument};
use url::Url;

/// CrateDB HTTP client.
pub struct CrateDbClient {
    http: reqwest::Client,
    endpoint: Url,
    username: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Serialize)]
struct SqlRequest<'a> {
    stmt: &'a str,
    args: &'a [JsonValue],
}

/// Successful `/_sql` response.
#[derive(Debug, Clone, Deserialize)]
pub struct SqlResponse {
    /// Column names
    #[serde(default)]
    pub cols: Vec<String>,
    /// Result rows
    #[serde(default)]
    pub rows: Vec<Vec<JsonValue>>,
    /// Affected or returned row count (-1 for DDL)
    #[serde(default)]
    pub rowcount: i64,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
    #[serde(default)]
    code: i64,
}

impl CrateDbClient {
    /// Create a client for the configured CrateDB URL.
    ///
    /// No request is made; use [`Destination::ping`] to check the server.
    #[instrument(skip(config), fields(url = %config.url))]
    pub fn connect(config: &DestinationConfig) -> Result<Self> {
        let base = Url::parse(&config.url)
            .map_err(|e| Error::config(format!("Invalid CrateDB URL: {}", e)))?;
        let endpoint = base
            .join("_sql")
            .map_err(|e| Error::config(format!("Invalid CrateDB URL: {}", e)))?;

        let http = reqwest::Client::builder()
            .user_agent(concat!("pg-cratedb-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::cratedb_connection("HTTP client setup failed", e))?;

        info!("Using CrateDB endpoint {}", endpoint);
        Ok(Self {
            http,
            endpoint,
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    /// Run a statement and return the raw response.
    pub async fn sql(&self, stmt: &str, args: &[JsonValue]) -> Result<SqlResponse> {
        debug!("CrateDB: {}", stmt);

        let mut request = self
            .http
            .post(self.endpoint.clone())
            .json(&SqlRequest { stmt, args });

        if let Some(ref username) = self.username {
            request = request.basic_auth(username, self.password.as_deref());
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::cratedb_connection("Request failed", e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::cratedb_connection("Reading response failed", e))?;

        if status.is_success() {
            serde_json::from_str(&body).map_err(|e| {
                Error::cratedb_query(0, format!("Unexpected response body: {}", e))
            })
        } else {
            Err(match serde_json::from_str::<ErrorResponse>(&body) {
                Ok(err) => Error::cratedb_query(err.error.code, err.error.message),
                Err(_) => Error::cratedb_query(i64::from(status.as_u16()), body),
            })
        }
    }
}

#[async_trait]
impl Destination for CrateDbClient {
    fn kind(&self) -> DestinationKind {
        DestinationKind::CrateDb
    }

    fn timestamp_type(&self) -> &'static str {
        "TIMESTAMP WITH TIME ZONE"
    }

    async fn ping(&self) -> Result<()> {
        self.sql("SELECT 1", &[]).await.map(|_| ())
    }

    async fn execute(&self, stmt: &str, args: &[JsonValue]) -> Result<u64> {
        let response = self.sql(stmt, args).await?;
        Ok(response.rowcount.max(0) as u64)
    }
}
