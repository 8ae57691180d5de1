//! Row classification, change application and tracking-column bootstrap.

use crate::config::TrackingColumns;
use crate::destination::{Destination, is_duplicate_column};
use crate::error::{Error, Result};
use crate::source::Row;
use crate::sql;
use crate::stats::{RowOutcome, TableStats};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{debug, info, instrument, warn};

/// What to do with a changed row.
#[derive(Debug, Clone, PartialEq)]
pub enum RowAction {
    /// Remove the row with this identifier.
    Delete {
        /// Identifier value
        id: JsonValue,
    },
    /// Insert or update the row; the deletion flag has been stripped.
    Upsert {
        /// Identifier value
        id: JsonValue,
        /// Remaining columns, in source order
        row: Row,
    },
}

impl RowAction {
    /// Identifier of the affected row.
    pub fn id(&self) -> &JsonValue {
        match self {
            RowAction::Delete { id } | RowAction::Upsert { id, .. } => id,
        }
    }
}

/// Decide between delete and upsert for a source row.
pub fn classify(mut row: Row, columns: &TrackingColumns, table: &str) -> Result<RowAction> {
    let id = match row.get(&columns.id) {
        Some(id) if !id.is_null() => id.clone(),
        _ => {
            return Err(Error::row(table, format!("row has no '{}' value", columns.id)));
        }
    };

    let deleted = row.get(&columns.deleted).is_some_and(is_truthy);
    if deleted {
        return Ok(RowAction::Delete { id });
    }

    row.shift_remove(&columns.deleted);
    Ok(RowAction::Upsert { id, row })
}

/// Interpret a deletion flag.
fn is_truthy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        JsonValue::String(s) => matches!(s.to_ascii_lowercase().as_str(), "true" | "t" | "1"),
        _ => false,
    }
}

/// Build the statement and arguments for an action.
pub fn statement_for(
    action: &RowAction,
    table: &str,
    columns: &TrackingColumns,
) -> (String, Vec<JsonValue>) {
    match action {
        RowAction::Delete { id } => (sql::delete_statement(table, &columns.id), vec![id.clone()]),
        RowAction::Upsert { row, .. } => {
            let names: Vec<&String> = row.keys().collect();
            let values: Vec<JsonValue> = row.values().cloned().collect();
            (sql::upsert_statement(table, &columns.id, &names), values)
        }
    }
}

/// Apply one row to the destination.
///
/// Failures are logged and reported as [`RowOutcome::Failed`]; they never
/// propagate.
pub async fn apply_row(
    destination: &dyn Destination,
    table: &str,
    columns: &TrackingColumns,
    row: Row,
) -> RowOutcome {
    let action = match classify(row, columns, table) {
        Ok(action) => action,
        Err(e) => {
            warn!("Skipping row: {}", e);
            return RowOutcome::Failed;
        }
    };

    let (stmt, args) = statement_for(&action, table, columns);

    match (destination.execute(&stmt, &args).await, &action) {
        (Ok(_), RowAction::Delete { .. }) => RowOutcome::Deleted,
        (Ok(_), RowAction::Upsert { .. }) => RowOutcome::Upserted,
        (Err(e), RowAction::Delete { id }) => {
            warn!("Delete failed for ID {} in {}: {}", id, table, e.detail());
            RowOutcome::Failed
        }
        (Err(e), RowAction::Upsert { id, .. }) => {
            warn!("Upsert failed for ID {} in {}: {}", id, table, e.detail());
            RowOutcome::Failed
        }
    }
}

/// Apply a batch of rows, one independent statement per row.
#[instrument(skip(destination, columns, rows, on_row), fields(count = rows.len()))]
pub async fn apply_rows<F>(
    destination: &dyn Destination,
    table: &str,
    columns: &TrackingColumns,
    rows: Vec<Row>,
    mut on_row: F,
) -> TableStats
where
    F: FnMut(usize),
{
    let mut stats = TableStats::default();
    for (i, row) in rows.into_iter().enumerate() {
        let outcome = apply_row(destination, table, columns, row).await;
        stats.record(table, outcome);
        on_row(i + 1);
    }
    debug!(
        "Applied batch to {}: {} upserted, {} deleted, {} failed",
        table, stats.inserted_or_updated, stats.deleted, stats.failed
    );
    stats
}

/// Result of adding one tracking column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "message")]
pub enum ColumnStatus {
    /// The column was added
    Added,
    /// The column was already present
    AlreadyPresent,
    /// The alteration failed for another reason
    Failed(String),
}

/// Bootstrap outcome for one table column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnBootstrap {
    /// Table name
    pub table: String,
    /// Column name
    pub column: String,
    /// What happened
    pub status: ColumnStatus,
}

/// Make sure every table carries the two tracking columns.
///
/// Rerunning is a no-op: "already exists" errors count as success, other
/// errors are logged and reported without stopping the remaining columns.
#[instrument(skip(destination, tables, columns))]
pub async fn ensure_tracking_columns<S: AsRef<str>>(
    destination: &dyn Destination,
    tables: &[S],
    columns: &TrackingColumns,
) -> Vec<ColumnBootstrap> {
    let tracking = [
        (columns.updated_at.as_str(), destination.timestamp_type()),
        (columns.deleted.as_str(), "BOOLEAN"),
    ];

    let mut results = Vec::with_capacity(tables.len() * tracking.len());
    for table in tables.iter().map(AsRef::as_ref) {
        for (column, column_type) in tracking {
            let stmt = sql::add_column_statement(table, column, column_type);
            let status = match destination.execute(&stmt, &[]).await {
                Ok(_) => {
                    info!("Added column '{}' to '{}'", column, table);
                    ColumnStatus::Added
                }
                Err(e) => {
                    let detail = e.detail();
                    if is_duplicate_column(&detail) {
                        info!("Column '{}' already exists in '{}', skipping", column, table);
                        ColumnStatus::AlreadyPresent
                    } else {
                        warn!("Error adding column '{}' to '{}': {}", column, table, detail);
                        ColumnStatus::Failed(detail)
                    }
                }
            };
            results.push(ColumnBootstrap {
                table: table.to_string(),
                column: column.to_string(),
                status,
            });
        }
    }
    results
}
