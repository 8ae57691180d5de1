//! Core sync logic for pg-cratedb-sync.

use crate::apply::{self, ColumnBootstrap};
use crate::config::{DestinationKind, SelectionMode, SyncConfig, TrackingColumns};
use crate::cratedb::CrateDbClient;
use crate::destination::Destination;
use crate::duck::DuckDbStore;
use crate::error::{Error, Result};
use crate::postgres::PostgresClient;
use crate::source::{ChangeSelection, ChangeSource};
use crate::stats::{SyncStats, TableStats, Timer};
use crate::watermark::WatermarkStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument, warn};

/// Sync report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncReport {
    /// Whether every table synced without a table-level error
    pub success: bool,
    /// Row selection used
    pub selection: String,
    /// Watermark read at start
    pub previous_watermark: DateTime<Utc>,
    /// Watermark written at the end (None when it was not saved)
    pub watermark: Option<DateTime<Utc>>,
    /// Tracking-column bootstrap results
    #[serde(default, skip_deserializing)]
    pub bootstrap: Vec<ColumnBootstrap>,
    /// Per-table stats
    pub tables: SyncStats,
    /// Total duration in milliseconds
    pub duration_ms: u64,
    /// Timestamp when sync started
    pub started_at: DateTime<Utc>,
    /// Timestamp when sync completed
    pub completed_at: DateTime<Utc>,
}

impl SyncReport {
    /// Rows inserted or updated across all tables.
    pub fn total_inserted_or_updated(&self) -> u64 {
        self.tables.totals().inserted_or_updated
    }

    /// Rows deleted across all tables.
    pub fn total_deleted(&self) -> u64 {
        self.tables.totals().deleted
    }

    /// Rows failed across all tables.
    pub fn total_failed(&self) -> u64 {
        self.tables.totals().failed
    }
}

/// Sync progress callback.
pub type ProgressCallback = Box<dyn Fn(SyncProgress) + Send + Sync>;

/// Sync progress update.
#[derive(Debug, Clone)]
pub struct SyncProgress {
    /// Current table being synced
    pub table: String,
    /// Current phase
    pub phase: SyncPhase,
    /// Rows applied so far
    pub rows_processed: usize,
    /// Rows in the batch (once fetched)
    pub total_rows: Option<usize>,
}

/// Sync phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// Reading changed rows from the source
    Fetching,
    /// Applying rows to the destination
    Applying,
    /// Completed
    Completed,
    /// Failed
    Failed,
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncPhase::Fetching => write!(f, "fetching"),
            SyncPhase::Applying => write!(f, "applying"),
            SyncPhase::Completed => write!(f, "completed"),
            SyncPhase::Failed => write!(f, "failed"),
        }
    }
}

/// Main sync client.
pub struct SyncClient {
    config: SyncConfig,
    columns: TrackingColumns,
    source: Box<dyn ChangeSource>,
    destination: Box<dyn Destination>,
    watermark: WatermarkStore,
    progress_callback: Option<Arc<ProgressCallback>>,
}

impl SyncClient {
    /// Create a new sync client, opening both connections.
    #[instrument(skip(config))]
    pub async fn new(config: SyncConfig) -> Result<Self> {
        info!("Initializing sync client...");

        let source = PostgresClient::connect(&config.source).await?;
        let destination = open_destination(&config)?;

        Ok(Self::from_parts(config, Box::new(source), destination))
    }

    /// Create a client from already-open stores.
    pub fn from_parts(
        config: SyncConfig,
        source: Box<dyn ChangeSource>,
        destination: Box<dyn Destination>,
    ) -> Self {
        Self {
            columns: config.sync.columns(),
            watermark: WatermarkStore::new(config.sync.watermark_file.clone()),
            config,
            source,
            destination,
            progress_callback: None,
        }
    }

    /// Set progress callback.
    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(SyncProgress) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Arc::new(Box::new(callback)));
        self
    }

    /// The watermark store used by this client.
    pub fn watermark_store(&self) -> &WatermarkStore {
        &self.watermark
    }

    /// Test connectivity to both stores.
    pub async fn test_connectivity(&self) -> Result<()> {
        info!("Testing connectivity...");

        self.source.ping().await?;
        info!("{}: OK", self.source.name());

        self.destination.ping().await?;
        info!("{}: OK", self.destination.kind());

        Ok(())
    }

    /// Add the tracking columns to every configured destination table.
    pub async fn bootstrap(&self) -> Vec<ColumnBootstrap> {
        apply::ensure_tracking_columns(
            self.destination.as_ref(),
            &self.config.sync.tables,
            &self.columns,
        )
        .await
    }

    /// Run one sync pass over every configured table.
    #[instrument(skip(self), fields(selection = %self.config.sync.selection))]
    pub async fn sync(&self) -> Result<SyncReport> {
        let started_at = Utc::now();
        let start = Instant::now();

        let bootstrap = if self.config.sync.bootstrap_tracking_columns {
            self.bootstrap().await
        } else {
            Vec::new()
        };

        let previous_watermark = self.watermark.load()?;

        let selection = self.selection_from(previous_watermark);
        info!(
            "Starting sync of {} tables ({}), last sync at {}",
            self.config.sync.tables.len(),
            selection,
            previous_watermark.to_rfc3339()
        );
        if selection == ChangeSelection::LatestBatch {
            warn!(
                "latest_batch selection only reads rows sharing the newest {}; \
                 older changes since the last sync are skipped",
                self.columns.updated_at
            );
        }

        // Rows changed while tables are being read must stay above the next cursor.
        let cursor = Utc::now();

        let mut stats = SyncStats::new();
        for table in &self.config.sync.tables {
            let timer = Timer::start(format!("sync {}", table));
            let table_stats = match self.sync_table(table, selection).await {
                Ok(table_stats) => table_stats,
                Err(e) => {
                    error!("Error syncing {}: {}", table, e.detail());
                    self.report_progress(table, SyncPhase::Failed, 0, None);
                    TableStats {
                        error: Some(e.to_string()),
                        ..Default::default()
                    }
                }
            };
            timer.stop();
            stats.insert(table.clone(), table_stats);
        }

        let watermark = match selection {
            ChangeSelection::LatestBatch => self.watermark.save()?,
            ChangeSelection::SinceWatermark(_) => {
                self.watermark.save_at(cursor)?;
                cursor
            }
        };

        let report = SyncReport {
            success: stats.failed_tables() == 0,
            selection: selection.to_string(),
            previous_watermark,
            watermark: Some(watermark),
            bootstrap,
            tables: stats,
            duration_ms: start.elapsed().as_millis() as u64,
            started_at,
            completed_at: Utc::now(),
        };

        if report.success {
            info!(
                "Sync completed in {}ms: {} inserted/updated, {} deleted, {} failed",
                report.duration_ms,
                report.total_inserted_or_updated(),
                report.total_deleted(),
                report.total_failed()
            );
        } else {
            warn!(
                "Sync completed with errors in {}ms: {} of {} tables failed",
                report.duration_ms,
                report.tables.failed_tables(),
                report.tables.len()
            );
        }

        Ok(report)
    }

    /// Sync a single table.
    #[instrument(skip(self))]
    async fn sync_table(&self, table: &str, selection: ChangeSelection) -> Result<TableStats> {
        info!("Syncing changes from '{}'...", table);
        self.report_progress(table, SyncPhase::Fetching, 0, None);

        let rows = self
            .source
            .fetch_changes(table, &self.columns, selection)
            .await?;
        let total = rows.len();

        if total == 0 {
            info!("No changed rows in {}", table);
            self.report_progress(table, SyncPhase::Completed, 0, Some(0));
            return Ok(TableStats::default());
        }

        info!("Fetched {} changed rows from {}", total, table);
        self.report_progress(table, SyncPhase::Applying, 0, Some(total));

        let stats = apply::apply_rows(
            self.destination.as_ref(),
            table,
            &self.columns,
            rows,
            |done| self.report_progress(table, SyncPhase::Applying, done, Some(total)),
        )
        .await;

        self.report_progress(table, SyncPhase::Completed, total, Some(total));
        info!(
            "Synced {}: {} inserted/updated, {} deleted, {} failed",
            table, stats.inserted_or_updated, stats.deleted, stats.failed
        );

        Ok(stats)
    }

    /// Rows the next run would read, per table.
    pub async fn pending_counts(&self) -> Result<BTreeMap<String, usize>> {
        let selection = self.selection_from(self.watermark.load()?);
        let mut counts = BTreeMap::new();

        for table in &self.config.sync.tables {
            let rows = self
                .source
                .fetch_changes(table, &self.columns, selection)
                .await?;
            counts.insert(table.clone(), rows.len());
        }

        Ok(counts)
    }

    fn selection_from(&self, watermark: DateTime<Utc>) -> ChangeSelection {
        match self.config.sync.selection {
            SelectionMode::LatestBatch => ChangeSelection::LatestBatch,
            SelectionMode::SinceWatermark => ChangeSelection::SinceWatermark(watermark),
        }
    }

    /// Report progress via callback.
    fn report_progress(
        &self,
        table: &str,
        phase: SyncPhase,
        rows_processed: usize,
        total_rows: Option<usize>,
    ) {
        if let Some(ref callback) = self.progress_callback {
            callback(SyncProgress {
                table: table.to_string(),
                phase,
                rows_processed,
                total_rows,
            });
        }
    }
}

/// Open the configured destination store.
pub fn open_destination(config: &SyncConfig) -> Result<Box<dyn Destination>> {
    match config.destination.kind {
        DestinationKind::CrateDb => Ok(Box::new(CrateDbClient::connect(&config.destination)?)),
        DestinationKind::DuckDb => {
            let path = config
                .destination
                .path
                .as_deref()
                .ok_or_else(|| Error::config("DuckDB destination requires a path"))?;
            Ok(Box::new(DuckDbStore::open(path)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watermark::default_watermark;
    use chrono::TimeZone;
    use serde_json::{Value as JsonValue, json};
    use crate::source::Row;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::TempDir;

    const SOURCE_DDL: &str = "
        CREATE TABLE products (
            id INTEGER PRIMARY KEY,
            name VARCHAR,
            price DOUBLE,
            updated_at TIMESTAMP,
            is_deleted BOOLEAN
        );
        INSERT INTO products VALUES
            (1, 'Product 1', 10.0, TIMESTAMP '2024-01-01 09:00:00', false),
            (2, 'Product 2', 20.0, TIMESTAMP '2024-01-02 10:00:00', false),
            (3, 'Product 3', 30.0, TIMESTAMP '2024-01-02 10:00:00', true),
            (4, 'Product 4', 40.0, TIMESTAMP '2024-01-02 10:00:00', false),
            (5, 'Product 5', 50.0, TIMESTAMP '2024-01-01 09:30:00', true);
    ";

    const DESTINATION_DDL: &str = "
        CREATE TABLE products (
            id INTEGER PRIMARY KEY,
            name VARCHAR,
            price DOUBLE,
            updated_at TIMESTAMP,
            is_deleted BOOLEAN
        );
        INSERT INTO products (id, name, price) VALUES (3, 'stale', 1.0), (5, 'stale', 1.0);
    ";

    fn destination_path(dir: &TempDir) -> String {
        dir.path().join("destination.duckdb").display().to_string()
    }

    fn config(dir: &TempDir, selection: SelectionMode, tables: &[&str]) -> SyncConfig {
        SyncConfig::builder()
            .postgres_url("postgres://postgres@localhost:5433/test")
            .duckdb_path(destination_path(dir))
            .tables(tables.iter().copied())
            .watermark_file(dir.path().join("last_sync_time.txt"))
            .selection(selection)
            .build()
            .unwrap()
    }

    fn source_store() -> DuckDbStore {
        let source = DuckDbStore::open(":memory:").unwrap();
        source.execute_batch(SOURCE_DDL).unwrap();
        source
    }

    fn client_with_source(
        dir: &TempDir,
        selection: SelectionMode,
        tables: &[&str],
        source: Box<dyn ChangeSource>,
    ) -> SyncClient {
        let config = config(dir, selection, tables);
        DuckDbStore::open(&destination_path(dir))
            .unwrap()
            .execute_batch(DESTINATION_DDL)
            .unwrap();
        let destination = open_destination(&config).unwrap();

        SyncClient::from_parts(config, source, destination)
    }

    fn client(dir: &TempDir, selection: SelectionMode, tables: &[&str]) -> SyncClient {
        client_with_source(dir, selection, tables, Box::new(source_store()))
    }

    /// Source that writes one more changed row right after its first read.
    struct ChangesDuringRun {
        store: DuckDbStore,
        written: AtomicBool,
    }

    #[async_trait::async_trait]
    impl ChangeSource for ChangesDuringRun {
        fn name(&self) -> &'static str {
            "duckdb"
        }

        async fn ping(&self) -> Result<()> {
            ChangeSource::ping(&self.store).await
        }

        async fn fetch_changes(
            &self,
            table: &str,
            columns: &TrackingColumns,
            selection: ChangeSelection,
        ) -> Result<Vec<Row>> {
            let rows = self.store.fetch_changes(table, columns, selection).await?;
            if !self.written.swap(true, Ordering::SeqCst) {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                let now = Utc::now().naive_utc().format("%Y-%m-%d %H:%M:%S%.6f").to_string();
                self.store
                    .execute(
                        "INSERT INTO products VALUES (6, 'Product 6', 60.0, CAST(? AS TIMESTAMP), false)",
                        &[JsonValue::String(now)],
                    )
                    .await?;
            }
            Ok(rows)
        }
    }

    fn destination_ids(dir: &TempDir, client: SyncClient) -> Vec<JsonValue> {
        drop(client);
        let store = DuckDbStore::open(&destination_path(dir)).unwrap();
        store
            .query_rows("SELECT id FROM products ORDER BY id", &[])
            .unwrap()
            .into_iter()
            .map(|mut row| row.shift_remove("id").unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_latest_batch_sync() {
        let dir = TempDir::new().unwrap();
        let client = client(&dir, SelectionMode::LatestBatch, &["products"]);

        let report = client.sync().await.unwrap();

        assert!(report.success);
        assert_eq!(report.previous_watermark, default_watermark());
        let products = report.tables.get("products").unwrap();
        assert_eq!(products.inserted_or_updated, 2);
        assert_eq!(products.deleted, 1);
        assert_eq!(products.failed, 0);

        // Watermark moved forward and is readable again.
        let saved = client.watermark_store().load().unwrap();
        assert_eq!(Some(saved), report.watermark);
        assert!(saved > report.previous_watermark);

        // Rows 1 and 5 are older than the newest batch and stay untouched.
        assert_eq!(destination_ids(&dir, client), vec![json!(2), json!(4), json!(5)]);
    }

    #[tokio::test]
    async fn test_since_watermark_sync_reads_all_newer_rows() {
        let dir = TempDir::new().unwrap();
        let client = client(&dir, SelectionMode::SinceWatermark, &["products"]);
        client
            .watermark_store()
            .save_at(Utc.with_ymd_and_hms(2024, 1, 1, 9, 15, 0).unwrap())
            .unwrap();

        let report = client.sync().await.unwrap();
        let products = report.tables.get("products").unwrap();

        // Rows 2, 4 upserted; rows 3, 5 deleted; row 1 is older than the watermark.
        assert_eq!(products.inserted_or_updated, 2);
        assert_eq!(products.deleted, 2);
        assert_eq!(destination_ids(&dir, client), vec![json!(2), json!(4)]);
    }

    #[tokio::test]
    async fn test_table_failure_does_not_stop_run() {
        let dir = TempDir::new().unwrap();
        let client = client(&dir, SelectionMode::LatestBatch, &["missing", "products"]);

        let report = client.sync().await.unwrap();

        assert!(!report.success);
        assert_eq!(report.tables.failed_tables(), 1);
        assert!(report.tables.get("missing").unwrap().error.is_some());
        assert_eq!(report.tables.get("products").unwrap().inserted_or_updated, 2);
        assert!(report.watermark.is_some());
    }

    #[tokio::test]
    async fn test_malformed_watermark_aborts() {
        let dir = TempDir::new().unwrap();
        let client = client(&dir, SelectionMode::LatestBatch, &["products"]);
        std::fs::write(client.watermark_store().path(), "not a timestamp").unwrap();

        let err = client.sync().await.unwrap_err();
        assert_eq!(err.code(), "WATERMARK_ERROR");
    }

    #[tokio::test]
    async fn test_rows_changed_during_run_are_read_next_run() {
        let dir = TempDir::new().unwrap();
        let source = ChangesDuringRun {
            store: source_store(),
            written: AtomicBool::new(false),
        };
        let client = client_with_source(
            &dir,
            SelectionMode::SinceWatermark,
            &["products"],
            Box::new(source),
        );
        client
            .watermark_store()
            .save_at(Utc.with_ymd_and_hms(2024, 1, 1, 9, 15, 0).unwrap())
            .unwrap();

        let first = client.sync().await.unwrap();
        assert_eq!(first.tables.get("products").unwrap().inserted_or_updated, 2);
        assert!(first.watermark.unwrap() <= first.completed_at);

        let second = client.sync().await.unwrap();
        let products = second.tables.get("products").unwrap();
        assert_eq!(products.inserted_or_updated, 1);
        assert_eq!(products.deleted, 0);
        assert_eq!(
            destination_ids(&dir, client),
            vec![json!(2), json!(4), json!(6)]
        );
    }

    #[tokio::test]
    async fn test_bootstrap_runs_before_watermark_is_read() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir, SelectionMode::LatestBatch, &["products"]);
        DuckDbStore::open(&destination_path(&dir))
            .unwrap()
            .execute_batch("CREATE TABLE products (id INTEGER)")
            .unwrap();
        std::fs::write(&config.sync.watermark_file, "garbage").unwrap();

        let destination = open_destination(&config).unwrap();
        let client = SyncClient::from_parts(config, Box::new(source_store()), destination);
        let err = client.sync().await.unwrap_err();
        assert_eq!(err.code(), "WATERMARK_ERROR");
        drop(client);

        let store = DuckDbStore::open(&destination_path(&dir)).unwrap();
        let columns: Vec<JsonValue> = store
            .query_rows(
                "SELECT column_name FROM information_schema.columns \
                 WHERE table_name = 'products' ORDER BY ordinal_position",
                &[],
            )
            .unwrap()
            .into_iter()
            .map(|mut row| row.shift_remove("column_name").unwrap())
            .collect();
        assert_eq!(columns, vec![json!("id"), json!("updated_at"), json!("is_deleted")]);
    }

    #[tokio::test]
    async fn test_report_lists_tables_in_config_order() {
        let dir = TempDir::new().unwrap();
        let client = client(&dir, SelectionMode::LatestBatch, &["products", "categories"]);

        let report = client.sync().await.unwrap();

        let names: Vec<&String> = report.tables.iter().map(|(name, _)| name).collect();
        assert_eq!(names, ["products", "categories"]);
    }

    #[tokio::test]
    async fn test_bootstrap_disabled_skips_alter() {
        let dir = TempDir::new().unwrap();
        let mut client = client(&dir, SelectionMode::LatestBatch, &["products"]);
        client.config.sync.bootstrap_tracking_columns = false;

        let report = client.sync().await.unwrap();
        assert!(report.bootstrap.is_empty());
    }

    #[tokio::test]
    async fn test_pending_counts() {
        let dir = TempDir::new().unwrap();
        let client = client(&dir, SelectionMode::LatestBatch, &["products"]);

        let counts = client.pending_counts().await.unwrap();
        assert_eq!(counts.get("products"), Some(&3));
    }

    #[tokio::test]
    async fn test_progress_phases() {
        let dir = TempDir::new().unwrap();
        let phases = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&phases);
        let client = client(&dir, SelectionMode::LatestBatch, &["products"])
            .with_progress(move |p| seen.lock().unwrap().push(p.phase));

        client.sync().await.unwrap();

        let phases = phases.lock().unwrap();
        assert_eq!(phases.first(), Some(&SyncPhase::Fetching));
        assert_eq!(phases.last(), Some(&SyncPhase::Completed));
        assert!(phases.contains(&SyncPhase::Applying));
    }

    #[test]
    fn test_sync_phase_display() {
        assert_eq!(SyncPhase::Fetching.to_string(), "fetching");
        assert_eq!(SyncPhase::Failed.to_string(), "failed");
    }

    #[test]
    fn test_report_totals() {
        let mut tables = SyncStats::new();
        tables.insert(
            "products",
            TableStats {
                inserted_or_updated: 100,
                deleted: 4,
                failed: 5,
                error: None,
            },
        );
        tables.insert(
            "orders",
            TableStats {
                inserted_or_updated: 50,
                ..Default::default()
            },
        );

        let report = SyncReport {
            success: true,
            selection: "latest batch".into(),
            previous_watermark: default_watermark(),
            watermark: None,
            bootstrap: Vec::new(),
            tables,
            duration_ms: 1500,
            started_at: default_watermark(),
            completed_at: default_watermark(),
        };

        assert_eq!(report.total_inserted_or_updated(), 150);
        assert_eq!(report.total_deleted(), 4);
        assert_eq!(report.total_failed(), 5);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["tables"]["orders"], json!({"inserted_or_updated": 50, "deleted": 0, "failed": 0}));
    }
}
