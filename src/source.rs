//! Change reader abstraction.

use crate::config::TrackingColumns;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

/// A source row: column name to value, in the column order of the query.
pub type Row = serde_json::Map<String, JsonValue>;

/// Which rows the change reader returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeSelection {
    /// Rows whose `updated_at` equals the table's current maximum.
    ///
    /// Rows modified between two runs that no longer carry the newest
    /// timestamp are not returned.
    LatestBatch,
    /// Rows whose `updated_at` is strictly after the given instant.
    SinceWatermark(DateTime<Utc>),
}

impl std::fmt::Display for ChangeSelection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeSelection::LatestBatch => write!(f, "latest batch"),
            ChangeSelection::SinceWatermark(ts) => write!(f, "since {}", ts.to_rfc3339()),
        }
    }
}

/// Store that can report changed rows.
#[async_trait]
pub trait ChangeSource: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Test connectivity.
    async fn ping(&self) -> Result<()>;

    /// Fetch changed rows of `table`.
    ///
    /// An empty table, or one with no modification timestamps, yields no rows.
    async fn fetch_changes(
        &self,
        table: &str,
        columns: &TrackingColumns,
        selection: ChangeSelection,
    ) -> Result<Vec<Row>>;
}
