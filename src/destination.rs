//! Destination store abstraction.

use crate::config::DestinationKind;
use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value as JsonValue;

/// Store that receives synced rows.
///
/// Destinations only execute parameterized statements; the statements
/// themselves come from [`crate::sql`].
#[async_trait]
pub trait Destination: Send + Sync {
    /// Which kind of store this is.
    fn kind(&self) -> DestinationKind;

    /// Column type used for the `updated_at` tracking column.
    fn timestamp_type(&self) -> &'static str;

    /// Test connectivity.
    async fn ping(&self) -> Result<()>;

    /// Execute one statement with positional `?` arguments, returning the
    /// number of affected rows.
    async fn execute(&self, stmt: &str, args: &[JsonValue]) -> Result<u64>;
}

/// Whether a schema-alteration error means the column was already there.
///
/// CrateDB reports "already has a column", DuckDB "already exists".
pub fn is_duplicate_column(message: &str) -> bool {
    message.contains("already has a column") || message.contains("already exists")
}
