//! Per-run sync statistics and metrics.

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::time::Instant;

/// Outcome of applying one row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowOutcome {
    /// Upsert succeeded
    Upserted,
    /// Delete succeeded
    Deleted,
    /// Statement failed or row was unusable
    Failed,
}

impl RowOutcome {
    fn label(self) -> &'static str {
        match self {
            RowOutcome::Upserted => "inserted_or_updated",
            RowOutcome::Deleted => "deleted",
            RowOutcome::Failed => "failed",
        }
    }
}

/// Counters for one table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableStats {
    /// Rows inserted or updated
    pub inserted_or_updated: u64,
    /// Rows deleted
    pub deleted: u64,
    /// Rows that failed
    pub failed: u64,
    /// Table-level error that stopped this table, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TableStats {
    /// Record one row outcome.
    pub fn record(&mut self, table: &str, outcome: RowOutcome) {
        match outcome {
            RowOutcome::Upserted => self.inserted_or_updated += 1,
            RowOutcome::Deleted => self.deleted += 1,
            RowOutcome::Failed => self.failed += 1,
        }
        metrics::counter!(
            "sync_rows_total",
            "table" => table.to_string(),
            "outcome" => outcome.label()
        )
        .increment(1);
    }

    /// Rows processed, whatever the outcome.
    pub fn processed(&self) -> u64 {
        self.inserted_or_updated + self.deleted + self.failed
    }

    /// Whether the table finished without a table-level error.
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Per-table statistics for one run, kept in the order tables were synced.
///
/// Serializes as a JSON object whose keys follow that order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    tables: Vec<(String, TableStats)>,
}

impl SyncStats {
    /// Create empty stats.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the stats of a finished table, replacing earlier stats for it.
    pub fn insert(&mut self, table: impl Into<String>, stats: TableStats) {
        let table = table.into();
        match self.tables.iter_mut().find(|(name, _)| *name == table) {
            Some((_, existing)) => *existing = stats,
            None => self.tables.push((table, stats)),
        }
    }

    /// Stats of one table.
    pub fn get(&self, table: &str) -> Option<&TableStats> {
        self.tables
            .iter()
            .find(|(name, _)| name == table)
            .map(|(_, stats)| stats)
    }

    /// Iterate over tables in sync order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &TableStats)> {
        self.tables.iter().map(|(name, stats)| (name, stats))
    }

    /// Number of tables.
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// Whether no table was recorded.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Sum over all tables.
    pub fn totals(&self) -> TableStats {
        self.tables.iter().fold(TableStats::default(), |mut acc, (_, t)| {
            acc.inserted_or_updated += t.inserted_or_updated;
            acc.deleted += t.deleted;
            acc.failed += t.failed;
            acc
        })
    }

    /// Tables that stopped with a table-level error.
    pub fn failed_tables(&self) -> usize {
        self.tables.iter().filter(|(_, t)| !t.succeeded()).count()
    }
}

impl Serialize for SyncStats {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.iter())
    }
}

impl<'de> Deserialize<'de> for SyncStats {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct StatsVisitor;

        impl<'de> Visitor<'de> for StatsVisitor {
            type Value = SyncStats;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of table name to table stats")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<SyncStats, A::Error> {
                let mut stats = SyncStats::new();
                while let Some((table, table_stats)) = map.next_entry::<String, TableStats>()? {
                    stats.insert(table, table_stats);
                }
                Ok(stats)
            }
        }

        deserializer.deserialize_map(StatsVisitor)
    }
}

/// Timer for measuring operation duration.
pub struct Timer {
    start: Instant,
    label: String,
}

impl Timer {
    /// Start a new timer.
    pub fn start(label: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            label: label.into(),
        }
    }

    /// Get elapsed time in milliseconds.
    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    /// Stop timer and log duration.
    pub fn stop(self) -> u64 {
        let elapsed = self.elapsed_ms();
        tracing::debug!("{} completed in {}ms", self.label, elapsed);
        elapsed
    }
}
