//! Error types for pg-cratedb-sync.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using the library's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for pg-cratedb-sync operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {message}")]
    Config {
        /// Error message
        message: String,
        /// Source error if any
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// PostgreSQL connection error
    #[error("PostgreSQL connection error: {message}")]
    PostgresConnection {
        /// Error message
        message: String,
        /// Source error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// PostgreSQL query error
    #[error("PostgreSQL query error on table '{table}': {message}")]
    PostgresQuery {
        /// Table name
        table: String,
        /// Error message
        message: String,
        /// Source error
        #[source]
        source: Option<tokio_postgres::Error>,
    },

    /// CrateDB transport error (request never produced a SQL response)
    #[error("CrateDB connection error: {message}")]
    CrateDbConnection {
        /// Error message
        message: String,
        /// Source error
        #[source]
        source: Option<reqwest::Error>,
    },

    /// CrateDB rejected a statement
    #[error("CrateDB error {code}: {message}")]
    CrateDbQuery {
        /// CrateDB error code (0 when the response carried none)
        code: i64,
        /// Error message as reported by CrateDB
        message: String,
    },

    /// DuckDB error
    #[error("DuckDB error on table '{table}': {message}")]
    DuckDb {
        /// Table name
        table: String,
        /// Error message
        message: String,
        /// Source error
        #[source]
        source: Option<duckdb::Error>,
    },

    /// Watermark file could not be read or parsed
    #[error("Watermark error ({}): {message}", .path.display())]
    Watermark {
        /// Watermark file path
        path: PathBuf,
        /// Error message
        message: String,
    },

    /// A row could not be turned into a statement
    #[error("Row error on table '{table}': {message}")]
    Row {
        /// Table name
        table: String,
        /// Error message
        message: String,
    },

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    /// Create a configuration error with source.
    pub fn config_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a PostgreSQL connection error.
    pub fn postgres_connection(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::PostgresConnection {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a PostgreSQL query error.
    pub fn postgres_query(
        table: impl Into<String>,
        message: impl Into<String>,
        source: tokio_postgres::Error,
    ) -> Self {
        Self::PostgresQuery {
            table: table.into(),
            message: message.into(),
            source: Some(source),
        }
    }

    /// Create a CrateDB transport error.
    pub fn cratedb_connection(message: impl Into<String>, source: reqwest::Error) -> Self {
        Self::CrateDbConnection {
            message: message.into(),
            source: Some(source),
        }
    }

    /// Create a CrateDB statement error.
    pub fn cratedb_query(code: i64, message: impl Into<String>) -> Self {
        Self::CrateDbQuery {
            code,
            message: message.into(),
        }
    }

    /// Create a DuckDB error.
    pub fn duckdb(table: impl Into<String>, message: impl Into<String>, source: duckdb::Error) -> Self {
        Self::DuckDb {
            table: table.into(),
            message: message.into(),
            source: Some(source),
        }
    }

    /// Create a watermark error.
    pub fn watermark(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Watermark {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a row error.
    pub fn row(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Row {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Full message including the underlying driver error, if any.
    ///
    /// Destination drivers put the interesting part ("already has a column",
    /// constraint names) in the source error, so classification looks here.
    pub fn detail(&self) -> String {
        let mut detail = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(err) = source {
            detail.push_str(": ");
            detail.push_str(&err.to_string());
            source = err.source();
        }
        detail
    }

    /// Get the error code for metrics/logging.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config { .. } => "CONFIG_ERROR",
            Error::PostgresConnection { .. } => "PG_CONNECTION_ERROR",
            Error::PostgresQuery { .. } => "PG_QUERY_ERROR",
            Error::CrateDbConnection { .. } => "CRATE_CONNECTION_ERROR",
            Error::CrateDbQuery { .. } => "CRATE_QUERY_ERROR",
            Error::DuckDb { .. } => "DUCKDB_ERROR",
            Error::Watermark { .. } => "WATERMARK_ERROR",
            Error::Row { .. } => "ROW_ERROR",
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::Io(_) => "IO_ERROR",
        }
    }
}
