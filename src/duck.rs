//! Embedded DuckDB store.
//!
//! Acts as a destination for local runs and implements the change reader as
//! well, so the sync path can be exercised without external services.

use crate::config::{DestinationKind, TrackingColumns};
use crate::destination::Destination;
use crate::error::{Error, Result};
use crate::source::{ChangeSelection, ChangeSource, Row};
use crate::sql;
use async_trait::async_trait;
use chrono::DateTime;
use duckdb::Connection;
use duckdb::types::{TimeUnit, Value};
use serde_json::Value as JsonValue;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, instrument};

/// DuckDB store wrapper.
pub struct DuckDbStore {
    conn: Mutex<Connection>,
}

impl DuckDbStore {
    /// Open a database file, or an in-memory database for `:memory:`.
    #[instrument]
    pub fn open(path: &str) -> Result<Self> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()
        } else {
            Connection::open(path)
        }
        .map_err(|e| Error::duckdb("", format!("Failed to open {}", path), e))?;

        info!("Opened DuckDB database: {}", path);
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Execute a batch of statements without parameters.
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.lock()?
            .execute_batch(sql)
            .map_err(|e| Error::duckdb("", "Execute batch failed", e))
    }

    /// Run a query and return each row as an ordered JSON map.
    pub fn query_rows(&self, query: &str, args: &[JsonValue]) -> Result<Vec<Row>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(query)
            .map_err(|e| Error::duckdb("", "Prepare failed", e))?;

        let mut rows = stmt
            .query(duckdb::params_from_iter(args.iter().map(json_to_value)))
            .map_err(|e| Error::duckdb("", "Query failed", e))?;

        let names: Vec<String> = rows.as_ref().map(|s| s.column_names()).unwrap_or_default();

        let mut results = Vec::new();
        while let Some(row) = rows
            .next()
            .map_err(|e| Error::duckdb("", "Row fetch failed", e))?
        {
            let mut map = Row::new();
            for (i, name) in names.iter().enumerate() {
                let value: Value = row
                    .get(i)
                    .map_err(|e| Error::duckdb("", format!("Reading column {} failed", name), e))?;
                map.insert(name.clone(), value_to_json(value));
            }
            results.push(map);
        }

        Ok(results)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| Error::DuckDb {
            table: String::new(),
            message: "connection lock poisoned".into(),
            source: None,
        })
    }
}

#[async_trait]
impl Destination for DuckDbStore {
    fn kind(&self) -> DestinationKind {
        DestinationKind::DuckDb
    }

    fn timestamp_type(&self) -> &'static str {
        "TIMESTAMP"
    }

    async fn ping(&self) -> Result<()> {
        self.lock()?
            .execute("SELECT 1", [])
            .map_err(|e| Error::duckdb("", "Ping failed", e))?;
        Ok(())
    }

    async fn execute(&self, stmt: &str, args: &[JsonValue]) -> Result<u64> {
        debug!("DuckDB: {}", stmt);
        let affected = self
            .lock()?
            .execute(stmt, duckdb::params_from_iter(args.iter().map(json_to_value)))
            .map_err(|e| Error::duckdb("", "Execute failed", e))?;
        Ok(affected as u64)
    }
}

#[async_trait]
impl ChangeSource for DuckDbStore {
    fn name(&self) -> &'static str {
        "duckdb"
    }

    async fn ping(&self) -> Result<()> {
        Destination::ping(self).await
    }

    async fn fetch_changes(
        &self,
        table: &str,
        columns: &TrackingColumns,
        selection: ChangeSelection,
    ) -> Result<Vec<Row>> {
        let result = match selection {
            ChangeSelection::LatestBatch => {
                self.query_rows(&sql::latest_batch_query(table, columns), &[])
            }
            ChangeSelection::SinceWatermark(since) => {
                let query = sql::since_watermark_query(table, columns, "CAST(? AS TIMESTAMP)");
                let bound = since.naive_utc().format("%Y-%m-%d %H:%M:%S%.6f").to_string();
                self.query_rows(&query, &[JsonValue::String(bound)])
            }
        };

        result.map_err(|e| match e {
            Error::DuckDb {
                message, source, ..
            } => Error::DuckDb {
                table: table.to_string(),
                message,
                source,
            },
            other => other,
        })
    }
}

/// Convert a JSON argument into a DuckDB parameter.
fn json_to_value(value: &JsonValue) -> Value {
    match value {
        JsonValue::Null => Value::Null,
        JsonValue::Bool(b) => Value::Boolean(*b),
        JsonValue::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => Value::BigInt(i),
            (None, Some(f)) => Value::Double(f),
            (None, None) => Value::Text(n.to_string()),
        },
        JsonValue::String(s) => Value::Text(s.clone()),
        JsonValue::Array(_) | JsonValue::Object(_) => Value::Text(value.to_string()),
    }
}

/// Convert a DuckDB value into JSON.
fn value_to_json(value: Value) -> JsonValue {
    match value {
        Value::Null => JsonValue::Null,
        Value::Boolean(b) => JsonValue::Bool(b),
        Value::TinyInt(i) => JsonValue::from(i),
        Value::SmallInt(i) => JsonValue::from(i),
        Value::Int(i) => JsonValue::from(i),
        Value::BigInt(i) => JsonValue::from(i),
        Value::UTinyInt(i) => JsonValue::from(i),
        Value::USmallInt(i) => JsonValue::from(i),
        Value::UInt(i) => JsonValue::from(i),
        Value::UBigInt(i) => JsonValue::from(i),
        Value::HugeInt(i) => i64::try_from(i)
            .map(JsonValue::from)
            .unwrap_or_else(|_| JsonValue::String(i.to_string())),
        Value::Float(f) => serde_json::Number::from_f64(f64::from(f))
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        Value::Double(f) => serde_json::Number::from_f64(f)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        Value::Decimal(d) => d
            .to_string()
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        Value::Text(s) => JsonValue::String(s),
        Value::Timestamp(unit, raw) => DateTime::from_timestamp_micros(to_micros(unit, raw))
            .map(|ts| {
                JsonValue::String(ts.naive_utc().format("%Y-%m-%d %H:%M:%S%.6f").to_string())
            })
            .unwrap_or(JsonValue::Null),
        Value::Date32(days) => DateTime::from_timestamp(i64::from(days) * 86_400, 0)
            .map(|ts| JsonValue::String(ts.date_naive().to_string()))
            .unwrap_or(JsonValue::Null),
        Value::List(items) => {
            JsonValue::Array(items.into_iter().map(value_to_json).collect())
        }
        other => JsonValue::String(format!("{:?}", other)),
    }
}

fn to_micros(unit: TimeUnit, raw: i64) -> i64 {
    match unit {
        TimeUnit::Second => raw.saturating_mul(1_000_000),
        TimeUnit::Millisecond => raw.saturating_mul(1_000),
        TimeUnit::Microsecond => raw,
        TimeUnit::Nanosecond => raw / 1_000,
    }
}
