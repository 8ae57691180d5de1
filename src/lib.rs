//! # pg-cratedb-sync
//!
//! Incremental sync of PostgreSQL tables into CrateDB.
//!
//! ## Features
//!
//! - **Change reader**: Reads the newest batch of changed rows per table (or,
//!   optionally, every row changed since the last run)
//! - **Soft deletes**: Rows flagged as deleted in the source are removed downstream
//! - **Upserts**: Everything else is inserted or updated by primary key
//! - **Watermark**: The time of the last run is kept in a plain text file
//! - **Bootstrap**: Tracking columns are added to destination tables on demand
//! - **Progress tracking**: Real-time progress updates via callbacks
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pg_cratedb_sync::{SyncClient, SyncConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SyncConfig::builder()
//!         .postgres_url("postgres://postgres@localhost:5433/test")
//!         .cratedb_url("http://localhost:4200")
//!         .tables(["products", "orders"])
//!         .build()?;
//!
//!     let client = SyncClient::new(config).await?;
//!     let report = client.sync().await?;
//!
//!     println!(
//!         "{} upserted, {} deleted",
//!         report.total_inserted_or_updated(),
//!         report.total_deleted()
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Local runs
//!
//! The destination can be an embedded DuckDB file instead of CrateDB, which
//! is handy for trying a config without a cluster:
//!
//! ```rust,no_run
//! use pg_cratedb_sync::SyncConfig;
//!
//! let config = SyncConfig::builder()
//!     .postgres_url("postgres://postgres@localhost:5433/test")
//!     .duckdb_path("local.duckdb")
//!     .build();
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod apply;
pub mod config;
pub mod cratedb;
pub mod destination;
pub mod duck;
pub mod error;
pub mod postgres;
pub mod source;
pub mod sql;
pub mod stats;
pub mod sync;
pub mod watermark;

// Re-exports for convenience
pub use apply::{ColumnBootstrap, ColumnStatus, RowAction};
pub use config::{
    DestinationKind, SelectionMode, SyncConfig, SyncConfigBuilder, TrackingColumns,
};
pub use cratedb::CrateDbClient;
pub use destination::Destination;
pub use duck::DuckDbStore;
pub use error::{Error, Result};
pub use postgres::PostgresClient;
pub use source::{ChangeSelection, ChangeSource, Row};
pub use stats::{RowOutcome, SyncStats, TableStats};
pub use sync::{SyncClient, SyncPhase, SyncProgress, SyncReport};
pub use watermark::WatermarkStore;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
