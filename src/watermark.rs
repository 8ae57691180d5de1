//! Persisted sync watermark.
//!
//! The watermark is a single RFC 3339 timestamp in a text file. It is read
//! once when a run starts and overwritten once when it ends.

use crate::error::{Error, Result};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Watermark used when no file has been written yet.
pub fn default_watermark() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// File-backed watermark store.
#[derive(Debug, Clone)]
pub struct WatermarkStore {
    path: PathBuf,
}

impl WatermarkStore {
    /// Create a store for the given file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the watermark file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the persisted watermark.
    ///
    /// A missing or blank file yields [`default_watermark`]; anything else
    /// that is not a timestamp is an error.
    pub fn load(&self) -> Result<DateTime<Utc>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No watermark at {}, using default", self.path.display());
                return Ok(default_watermark());
            }
            Err(e) => return Err(Error::watermark(&self.path, e.to_string())),
        };

        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Ok(default_watermark());
        }

        parse_timestamp(trimmed).ok_or_else(|| {
            Error::watermark(&self.path, format!("'{}' is not an ISO-8601 timestamp", trimmed))
        })
    }

    /// Overwrite the watermark with the current time.
    pub fn save(&self) -> Result<DateTime<Utc>> {
        let now = Utc::now();
        self.save_at(now)?;
        Ok(now)
    }

    /// Overwrite the watermark with `at`.
    pub fn save_at(&self, at: DateTime<Utc>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(&self.path, at.to_rfc3339())?;
        info!("Watermark saved: {}", at.to_rfc3339());
        Ok(())
    }
}

/// Parse an ISO-8601 timestamp; naive values are taken as UTC.
fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }

    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_yields_default() {
        let dir = TempDir::new().unwrap();
        let store = WatermarkStore::new(dir.path().join("last_sync_time.txt"));
        assert_eq!(store.load().unwrap(), default_watermark());
        assert_eq!(default_watermark().to_rfc3339(), "2000-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_empty_file_yields_default() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("last_sync_time.txt");
        std::fs::write(&path, "  \n").unwrap();
        assert_eq!(WatermarkStore::new(path).load().unwrap(), default_watermark());
    }

    #[test]
    fn test_malformed_file_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("last_sync_time.txt");
        std::fs::write(&path, "yesterday").unwrap();
        let err = WatermarkStore::new(path).load().unwrap_err();
        assert_eq!(err.code(), "WATERMARK_ERROR");
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let store = WatermarkStore::new(dir.path().join("state").join("wm.txt"));
        let at = Utc.with_ymd_and_hms(2024, 5, 17, 8, 30, 0).unwrap();

        store.save_at(at).unwrap();
        assert_eq!(store.load().unwrap(), at);

        let saved = store.save().unwrap();
        assert!(saved > at);
        assert_eq!(store.load().unwrap(), saved);
    }

    #[test]
    fn test_offsets_normalised_to_utc() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wm.txt");
        std::fs::write(&path, "2024-05-17T10:30:00+02:00\n").unwrap();
        let expected = Utc.with_ymd_and_hms(2024, 5, 17, 8, 30, 0).unwrap();
        assert_eq!(WatermarkStore::new(path).load().unwrap(), expected);
    }

    #[test]
    fn test_naive_timestamp_read_as_utc() {
        assert_eq!(
            parse_timestamp("2024-05-17 08:30:00.250"),
            Some(Utc.with_ymd_and_hms(2024, 5, 17, 8, 30, 0).unwrap()
                + chrono::Duration::milliseconds(250))
        );
    }
}
